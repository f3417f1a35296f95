//! Processing orchestrator
//!
//! Drives each uploaded document through
//! `idle → uploading → started → polling → {completed | completed-with-incomplete-results | failed}`.
//!
//! # Architecture
//! - Work items and poll handles live in one [`Registry`] behind a mutex
//! - Each polling work item owns exactly one [`PollHandle`]: a spawned task,
//!   its cancellation token and a generation number. Registering a new handle
//!   for an id cancels the previous one.
//! - Poll tokens are children of the orchestrator's root token; the tasks
//!   also watch the session scope handed out by [`JobApi::session_scope`]
//! - A poll task applies a response only while its handle is still current
//!   (same generation, not cancelled), checked under the registry lock that
//!   `cancel` also takes
//!
//! State changes are published on the [`EventBus`] as
//! [`DashEvent::WorkItemStateChanged`] and friends.

mod poller;
mod work_item;

pub use work_item::{ResultBundle, WorkItem};

use self::poller::{PollHandle, PollKind};
use crate::api::JobApi;
use crate::error::{ClientError, ClientResult};
use crate::session::UploadFile;
use chrono::Utc;
use fdash_common::api::{ExportFormat, LifecycleStatus};
use fdash_common::config::ClientConfig;
use fdash_common::events::{DashEvent, EventBus, WorkflowState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Wait between the end of one status request and the next
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before an item is marked failed
    pub max_poll_failures: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_failures: 5,
        }
    }
}

impl From<&ClientConfig> for OrchestratorSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_poll_failures: config.max_poll_failures,
        }
    }
}

/// Work items plus the live poll handle (if any) for each
///
/// Handles leave only through [`Registry::take`], [`Registry::retire`] and
/// [`Registry::take_all`], which wake `settled` waiters.
#[derive(Default)]
struct Registry {
    items: HashMap<String, WorkItem>,
    polls: HashMap<String, PollHandle>,
    settled: Arc<Notify>,
}

impl Registry {
    /// Handle `generation` is still the live handle for `id`
    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.polls
            .get(id)
            .is_some_and(|h| h.generation == generation && !h.token.is_cancelled())
    }

    /// Remove the handle if it is still current
    fn retire(&mut self, id: &str, generation: u64) -> bool {
        if self.is_current(id, generation) {
            self.take(id);
            true
        } else {
            false
        }
    }

    fn take(&mut self, id: &str) -> Option<PollHandle> {
        let handle = self.polls.remove(id);
        if handle.is_some() {
            self.settled.notify_waiters();
        }
        handle
    }

    fn take_all(&mut self) -> Vec<(String, PollHandle)> {
        let handles: Vec<(String, PollHandle)> = self.polls.drain().collect();
        if !handles.is_empty() {
            self.settled.notify_waiters();
        }
        handles
    }
}

/// State shared between the orchestrator and its poll tasks
struct Inner<A> {
    api: A,
    settings: OrchestratorSettings,
    event_bus: EventBus,
    registry: Mutex<Registry>,
    next_generation: AtomicU64,
}

impl<A: JobApi> Inner<A> {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `item` to `new_state`, publishing the change
    fn transition(&self, item: &mut WorkItem, new_state: WorkflowState) {
        let old_state = item.state;
        if old_state == new_state {
            return;
        }

        item.state = new_state;
        item.touch();
        info!(
            work_item_id = %item.id,
            from = %old_state,
            to = %new_state,
            lifecycle = %item.lifecycle_status,
            "Work item state changed"
        );
        self.announce(item, old_state);
    }

    fn announce(&self, item: &WorkItem, old_state: WorkflowState) {
        self.event_bus.emit_lossy(DashEvent::WorkItemStateChanged {
            work_item_id: item.id.clone(),
            old_state,
            new_state: item.state,
            lifecycle_status: Some(item.lifecycle_status),
            timestamp: Utc::now(),
        });
    }

    fn announce_abandoned(&self, id: &str, reason: &str) {
        self.event_bus.emit_lossy(DashEvent::PollAbandoned {
            work_item_id: id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Processing orchestrator
///
/// Dropping the orchestrator cancels every poll it started.
pub struct Orchestrator<A: JobApi> {
    inner: Arc<Inner<A>>,
    root: CancellationToken,
}

impl<A: JobApi> Orchestrator<A> {
    pub fn new(api: A, settings: OrchestratorSettings, event_bus: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                event_bus,
                registry: Mutex::new(Registry::default()),
                next_generation: AtomicU64::new(0),
            }),
            root: CancellationToken::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// Upload a document, start processing and begin polling
    ///
    /// # Errors
    /// - Upload refused or failed: the error is returned and no item is kept
    /// - Start refused or failed: the item stays visible with lifecycle
    ///   `failed` and the error is returned
    pub async fn submit(&self, file: UploadFile, fund_type: &str) -> ClientResult<WorkItem> {
        info!(file = %file.file_name, fund_type, "Submitting document");

        let id = match self.inner.api.upload(&file, fund_type).await {
            Ok(id) => id,
            Err(e) => {
                warn!(file = %file.file_name, error = %e, "Upload failed");
                return Err(e);
            }
        };

        {
            let mut reg = self.inner.registry();
            if let Some(previous) = reg.take(&id) {
                previous.cancel();
            }
            let mut item = WorkItem::new(id.clone(), Some(fund_type.to_string()));
            self.inner.transition(&mut item, WorkflowState::Uploading);
            reg.items.insert(id.clone(), item);
        }

        if let Err(e) = self.inner.api.start(&id).await {
            error!(work_item_id = %id, error = %e, "Processing start failed");
            let mut reg = self.inner.registry();
            if let Some(item) = reg.items.get_mut(&id) {
                item.lifecycle_status = LifecycleStatus::Failed;
                item.error_message = Some(match &e {
                    ClientError::StartRejected(message) => message.clone(),
                    other => other.to_string(),
                });
                self.inner.transition(item, WorkflowState::Failed);
            }
            return Err(e);
        }

        let mut reg = self.inner.registry();
        let Some(item) = reg.items.get_mut(&id) else {
            // Session ended while the start request was in flight
            warn!(work_item_id = %id, "Work item forgotten before polling began");
            return Err(ClientError::Unauthenticated);
        };
        self.inner.transition(item, WorkflowState::Started);
        self.inner.transition(item, WorkflowState::Polling);
        let snapshot = item.clone();

        self.spawn_handle(&mut reg, &id, PollKind::Status);
        Ok(snapshot)
    }

    /// Re-enter a work item (e.g. the user navigates to it)
    ///
    /// - already polling: no-op
    /// - `draft`/`processing`: polling resumes
    /// - `completed`: results are re-fetched
    /// - `failed`: returned as is
    /// - unknown id: status is fetched once and the item adopted
    pub async fn select(&self, id: &str) -> ClientResult<WorkItem> {
        {
            let mut reg = self.inner.registry();
            if let Some(item) = self.reenter(&mut reg, id) {
                return Ok(item);
            }
        }

        let status = self.inner.api.status(id).await?;

        let mut reg = self.inner.registry();
        if !reg.items.contains_key(id) {
            info!(work_item_id = %id, lifecycle = %status.status, "Adopting work item");
            reg.items
                .insert(id.to_string(), WorkItem::adopted(id, &status));
        }

        let adopted = WorkItem::adopted(id, &status);
        Ok(self.reenter(&mut reg, id).unwrap_or(adopted))
    }

    /// Stop polling an item
    ///
    /// Idempotent: returns `false` when no poll was active. A cancelled poll
    /// never applies a response, even one already in flight.
    pub fn cancel(&self, id: &str) -> bool {
        let mut reg = self.inner.registry();
        let Some(handle) = reg.take(id) else {
            return false;
        };

        handle.cancel();
        info!(work_item_id = %id, "Polling cancelled");
        self.inner.announce_abandoned(id, "cancelled");
        true
    }

    /// Cancel every active poll (view torn down)
    ///
    /// Returns the number of polls cancelled.
    pub fn teardown(&self) -> usize {
        let mut reg = self.inner.registry();
        let handles = reg.take_all();

        for (id, handle) in &handles {
            handle.cancel();
            self.inner.announce_abandoned(id, "teardown");
        }

        if !handles.is_empty() {
            info!(count = handles.len(), "Cancelled active polls");
        }
        handles.len()
    }

    /// Log out: cancel all polls, forget all items and end the session
    pub async fn end_session(&self) -> ClientResult<()> {
        self.teardown();
        self.inner.registry().items.clear();
        self.inner.api.end_session().await
    }

    pub fn snapshot(&self, id: &str) -> Option<WorkItem> {
        self.inner.registry().items.get(id).cloned()
    }

    /// All known items, ordered by id
    pub fn items(&self) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self.inner.registry().items.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    pub fn is_polling(&self, id: &str) -> bool {
        self.inner.registry().polls.contains_key(id)
    }

    pub fn active_poll_count(&self) -> usize {
        self.inner.registry().polls.len()
    }

    /// Download a rendered export of a work item
    pub async fn export(&self, id: &str, format: ExportFormat) -> ClientResult<Vec<u8>> {
        debug!(work_item_id = %id, format = %format, "Exporting work item");
        self.inner.api.export(id, format).await
    }

    /// Wait until `id` has no live poll handle, then return its snapshot
    ///
    /// Returns immediately when the item is not being polled.
    pub async fn wait_until_settled(&self, id: &str) -> Option<WorkItem> {
        let settled = Arc::clone(&self.inner.registry().settled);

        loop {
            let notified = settled.notified();
            tokio::pin!(notified);
            // Registered before the check so a removal in between still wakes us
            notified.as_mut().enable();

            {
                let reg = self.inner.registry();
                if !reg.polls.contains_key(id) {
                    return reg.items.get(id).cloned();
                }
            }

            notified.await;
        }
    }

    // ========================================
    // Internals
    // ========================================

    /// Re-entry decision for a known item; `None` if the id is unknown
    fn reenter(&self, reg: &mut Registry, id: &str) -> Option<WorkItem> {
        if reg.polls.contains_key(id) {
            debug!(work_item_id = %id, "Already polling");
            return reg.items.get(id).cloned();
        }

        let item = reg.items.get_mut(id)?;
        let kind = match (item.state, item.lifecycle_status) {
            // Start not acknowledged yet; submit owns the item
            (WorkflowState::Uploading, _) => None,
            (_, LifecycleStatus::Draft | LifecycleStatus::Processing) => {
                self.inner.transition(item, WorkflowState::Polling);
                Some(PollKind::Status)
            }
            (_, LifecycleStatus::Completed) => Some(PollKind::Results),
            (_, LifecycleStatus::Failed) => None,
        };
        let snapshot = item.clone();

        if let Some(kind) = kind {
            self.spawn_handle(reg, id, kind);
        }
        Some(snapshot)
    }

    /// Start a poll task for `id`, replacing any previous handle
    fn spawn_handle(&self, reg: &mut Registry, id: &str, kind: PollKind) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.root.child_token();
        let scope = self.inner.api.session_scope();

        let task = tokio::spawn(poller::run(
            Arc::clone(&self.inner),
            id.to_string(),
            generation,
            token.clone(),
            scope,
            kind,
        ));

        debug!(work_item_id = %id, generation, ?kind, "Poll handle registered");
        let handle = PollHandle::new(generation, token, task);
        if let Some(previous) = reg.polls.insert(id.to_string(), handle) {
            debug!(work_item_id = %id, generation = previous.generation, "Replaced poll handle");
            previous.cancel();
        }
    }
}

impl<A: JobApi> Drop for Orchestrator<A> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
