//! Session client
//!
//! Single source of truth for outbound request authentication.
//!
//! # Responsibilities
//! - Holds the current [`Session`] (access token, refresh token, tenant id)
//!   and persists it through a [`SessionStore`]
//! - Attaches `Authorization` and `X-Tenant-ID` to every call; refuses to send
//!   anything while no session exists
//! - On a 401, performs one refresh and retries the original request once
//! - Serializes refreshes so concurrent callers that all hit expiry share a
//!   single refresh request and its outcome, failure included (the service
//!   may invalidate a refresh token after its first use)
//!
//! # Session scope
//! Each session owns a [`CancellationToken`]. Work bound to the session
//! (status polling) derives from it and is cancelled when the session ends,
//! whether by logout or by an unrecoverable refresh failure.
//!
//! The client only *reports* an unrecoverable session (`Unauthenticated` plus
//! a `SessionExpired` event); deciding to navigate to the login entry point is
//! left to the presentation layer.

pub mod request;
pub mod store;

pub use request::{ApiRequest, RequestBody, UploadFile};
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore};

use crate::error::{ClientError, ClientResult};
use chrono::Utc;
use fdash_common::api::{
    ErrorBody, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, UserProfile,
    TENANT_HEADER,
};
use fdash_common::config::ClientConfig;
use fdash_common::events::{DashEvent, EventBus};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const USER_AGENT: &str = concat!("fdash/", env!("CARGO_PKG_VERSION"));

/// Authenticated context used to authorize requests
///
/// Access token and tenant id live in the same value, so they are either both
/// present (`Some(Session)`) or both absent (`None`).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub tenant_id: String,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("profile", &self.profile)
            .finish()
    }
}

impl From<LoginResponse> for Session {
    fn from(response: LoginResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            tenant_id: response.tenant_id,
            profile: response.user,
        }
    }
}

/// Most recent finished refresh attempt
#[derive(Default)]
struct RefreshState {
    generation: u64,
    /// `None` when the attempt renewed the session
    failure: Option<ClientError>,
}

/// Authenticating HTTP client for the document service
pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    session: RwLock<Option<Session>>,
    /// Held for the whole refresh exchange
    refresh: Mutex<RefreshState>,
    /// Mirror of `refresh.generation`, readable without waiting on the lock
    refresh_generation: AtomicU64,
    scope: StdMutex<CancellationToken>,
    event_bus: EventBus,
}

impl SessionClient {
    /// Create a client without a session
    ///
    /// # Arguments
    /// * `base_url` - Service base URL (no trailing slash)
    /// * `request_timeout` - Upper bound for every network call
    /// * `store` - Durable session store
    /// * `event_bus` - Receives session lifecycle events
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        store: Arc<dyn SessionStore>,
        event_bus: EventBus,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        // No session yet: the scope starts out cancelled
        let scope = CancellationToken::new();
        scope.cancel();

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            session: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
            refresh_generation: AtomicU64::new(0),
            scope: StdMutex::new(scope),
            event_bus,
        })
    }

    /// Create a client from resolved configuration
    pub fn from_config(
        config: &ClientConfig,
        store: Arc<dyn SessionStore>,
        event_bus: EventBus,
    ) -> ClientResult<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.request_timeout,
            store,
            event_bus,
        )
    }

    /// Load the persisted session (if any) into memory
    pub async fn restore(&self) -> ClientResult<Option<Session>> {
        let Some(session) = self.store.load().await? else {
            debug!("No persisted session");
            return Ok(None);
        };

        info!(tenant_id = %session.tenant_id, "Restored persisted session");
        *self.session.write().await = Some(session.clone());
        self.open_scope();
        self.event_bus.emit_lossy(DashEvent::SessionStarted {
            tenant_id: session.tenant_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(Some(session))
    }

    /// Log in and establish a new session
    ///
    /// Fails with `InvalidCredentials` when the service rejects the pair.
    pub async fn authenticate(&self, identifier: &str, secret: &str) -> ClientResult<Session> {
        let body = LoginRequest {
            email: identifier.to_string(),
            password: secret.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/auth/login", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            warn!(status = status.as_u16(), "Login rejected");
            return Err(ClientError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        let session = Session::from(login);

        self.store.save(&session).await?;
        *self.session.write().await = Some(session.clone());
        self.open_scope();

        info!(tenant_id = %session.tenant_id, "Authenticated");
        self.event_bus.emit_lossy(DashEvent::SessionStarted {
            tenant_id: session.tenant_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(session)
    }

    /// Send an authenticated request
    ///
    /// Returns the response for any status other than 401. A 401 triggers one
    /// refresh and one retry; if either fails the session is cleared and
    /// `Unauthenticated` is returned.
    pub async fn call(&self, request: &ApiRequest) -> ClientResult<reqwest::Response> {
        let session = self
            .current_session()
            .await
            .ok_or(ClientError::Unauthenticated)?;

        let generation = self.refresh_generation.load(Ordering::Acquire);
        let response = self.send(request, &session).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path = %request.path(), "Access token rejected, refreshing");
        let renewed = self
            .refresh_after_rejection(generation, &session.access_token)
            .await?;

        let retry = self.send(request, &renewed).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            self.expire("request rejected after token refresh").await;
            return Err(ClientError::Unauthenticated);
        }

        Ok(retry)
    }

    /// Clear the session unconditionally
    ///
    /// Memory and scope are always cleared; a store failure is still reported.
    pub async fn end_session(&self) -> ClientResult<()> {
        let had_session = self.session.write().await.take().is_some();
        self.close_scope();

        if had_session {
            info!("Session ended");
        }
        self.event_bus.emit_lossy(DashEvent::SessionEnded {
            timestamp: Utc::now(),
        });

        self.store.clear().await?;
        Ok(())
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Token cancelled when the current session ends
    ///
    /// Already cancelled while no session exists.
    pub fn session_scope(&self) -> CancellationToken {
        match self.scope.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // ========================================
    // Internals
    // ========================================

    async fn send(
        &self,
        request: &ApiRequest,
        session: &Session,
    ) -> ClientResult<reqwest::Response> {
        let builder = request.build(&self.http, &self.base_url)?;

        let response = builder
            .bearer_auth(&session.access_token)
            .header(TENANT_HEADER, &session.tenant_id)
            .send()
            .await?;

        debug!(
            method = %request.method,
            path = %request.path(),
            status = response.status().as_u16(),
            "Service call"
        );
        Ok(response)
    }

    /// Obtain a usable session after `rejected_access` got a 401
    ///
    /// `observed` is the refresh generation read before the rejected request
    /// was sent. Callers queue on the refresh lock; the first one performs the
    /// refresh, and every caller that observed an older generation takes the
    /// finished attempt's outcome instead of sending the refresh token again.
    async fn refresh_after_rejection(
        &self,
        observed: u64,
        rejected_access: &str,
    ) -> ClientResult<Session> {
        let mut state = self.refresh.lock().await;

        if state.generation != observed {
            debug!(generation = state.generation, "Sharing concurrent refresh outcome");
            if let Some(failure) = &state.failure {
                return Err(failure.replay());
            }
            return self
                .current_session()
                .await
                .ok_or(ClientError::Unauthenticated);
        }

        let current = self
            .current_session()
            .await
            .ok_or(ClientError::Unauthenticated)?;
        if current.access_token != rejected_access {
            // Replaced by a login since the request went out
            return Ok(current);
        }

        let outcome = self.exchange_refresh_token(current).await;

        state.generation += 1;
        state.failure = outcome.as_ref().err().map(ClientError::replay);
        self.refresh_generation
            .store(state.generation, Ordering::Release);

        outcome
    }

    /// One refresh request; persists and publishes the renewed session
    async fn exchange_refresh_token(&self, current: Session) -> ClientResult<Session> {
        let response = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&RefreshRequest {
                refresh_token: current.refresh_token.clone(),
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            warn!(status = status.as_u16(), "Token refresh rejected");
            self.expire("refresh token rejected").await;
            return Err(ClientError::Unauthenticated);
        }
        if !status.is_success() {
            // Service trouble, not a verdict on the refresh token
            warn!(status = status.as_u16(), "Token refresh failed");
            return Err(api_error(response).await);
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        let mut renewed = current;
        renewed.access_token = refreshed.access_token;
        if let Some(rotated) = refreshed.refresh_token {
            renewed.refresh_token = rotated;
        }

        if let Err(e) = self.store.save(&renewed).await {
            // Session stays valid in memory; only the restart path is affected
            error!("Failed to persist refreshed session: {}", e);
        }
        *self.session.write().await = Some(renewed.clone());

        info!("Access token refreshed");
        self.event_bus.emit_lossy(DashEvent::SessionRefreshed {
            timestamp: Utc::now(),
        });

        Ok(renewed)
    }

    /// Drop an unrecoverable session and tell the presentation layer
    async fn expire(&self, reason: &str) {
        self.session.write().await.take();
        self.close_scope();

        if let Err(e) = self.store.clear().await {
            error!("Failed to clear persisted session: {}", e);
        }

        warn!(reason, "Session expired");
        self.event_bus.emit_lossy(DashEvent::SessionExpired {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn open_scope(&self) {
        let fresh = CancellationToken::new();
        let previous = match self.scope.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, fresh),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), fresh),
        };
        previous.cancel();
    }

    fn close_scope(&self) {
        self.session_scope().cancel();
    }
}

/// Turn a non-success response into `ClientError::Api`
pub(crate) async fn api_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let raw = response.text().await.unwrap_or_default();
    ClientError::Api {
        status,
        message: ErrorBody::message_from(&raw),
    }
}
