//! HTTP implementation of [`JobApi`]

use super::JobApi;
use crate::error::{ClientError, ClientResult};
use crate::session::{api_error, ApiRequest, SessionClient, UploadFile};
use async_trait::async_trait;
use fdash_common::api::{
    ComplianceResult, ErrorBody, ExportFormat, FinancialMetrics, StatusResponse, UploadResponse,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Document service client routed through the session client
#[derive(Clone)]
pub struct HttpJobApi {
    session: Arc<SessionClient>,
}

impl HttpJobApi {
    pub fn new(session: Arc<SessionClient>) -> Self {
        Self { session }
    }

    async fn get_json<T: DeserializeOwned>(&self, request: ApiRequest) -> ClientResult<T> {
        let response = self.session.call(&request).await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }
}

/// `/documents/{id}/{action}`
fn document(method: Method, work_item_id: &str, action: &str) -> ApiRequest {
    ApiRequest::new(method, "/documents")
        .segment(work_item_id)
        .segment(action)
}

/// Map a 4xx refusal to `reject`, anything else to `Api`
async fn rejection(
    response: reqwest::Response,
    reject: fn(String) -> ClientError,
) -> ClientError {
    let status = response.status();
    if status.is_client_error() {
        let raw = response.text().await.unwrap_or_default();
        let message = ErrorBody::message_from(&raw);
        warn!(status = status.as_u16(), %message, "Request refused by service");
        return reject(message);
    }
    api_error(response).await
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn upload(&self, file: &UploadFile, fund_type: &str) -> ClientResult<String> {
        let request = ApiRequest::post("/documents/upload").multipart(
            file.clone(),
            vec![("fund_type".to_string(), fund_type.to_string())],
        );

        let response = self.session.call(&request).await?;
        if !response.status().is_success() {
            return Err(rejection(response, ClientError::UploadRejected).await);
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        debug!(work_item_id = %uploaded.id, file = %file.file_name, "Upload accepted");

        Ok(uploaded.id)
    }

    async fn start(&self, work_item_id: &str) -> ClientResult<()> {
        let request = document(Method::POST, work_item_id, "process");

        let response = self.session.call(&request).await?;
        if !response.status().is_success() {
            return Err(rejection(response, ClientError::StartRejected).await);
        }

        debug!(work_item_id, "Processing start acknowledged");
        Ok(())
    }

    async fn status(&self, work_item_id: &str) -> ClientResult<StatusResponse> {
        self.get_json(document(Method::GET, work_item_id, "status"))
            .await
    }

    async fn metrics(&self, work_item_id: &str) -> ClientResult<FinancialMetrics> {
        self.get_json(document(Method::GET, work_item_id, "metrics"))
            .await
    }

    async fn compliance(&self, work_item_id: &str) -> ClientResult<ComplianceResult> {
        self.get_json(document(Method::GET, work_item_id, "compliance"))
            .await
    }

    async fn export(&self, work_item_id: &str, format: ExportFormat) -> ClientResult<Vec<u8>> {
        let request = document(Method::GET, work_item_id, "export")
            .query("format", format.as_str());

        let response = self.session.call(&request).await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    fn session_scope(&self) -> CancellationToken {
        self.session.session_scope()
    }

    async fn end_session(&self) -> ClientResult<()> {
        self.session.end_session().await
    }
}
