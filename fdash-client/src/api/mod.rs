//! Document service operations
//!
//! [`JobApi`] is the seam between the orchestrator and the network: the
//! orchestrator only sees typed operations and [`ClientError`] kinds, never
//! HTTP. [`HttpJobApi`] is the production implementation on top of
//! [`SessionClient`](crate::session::SessionClient).

mod http;

pub use http::HttpJobApi;

use crate::error::ClientResult;
use crate::session::UploadFile;
use async_trait::async_trait;
use fdash_common::api::{ComplianceResult, ExportFormat, FinancialMetrics, StatusResponse};
use tokio_util::sync::CancellationToken;

/// Remote document processing operations
#[async_trait]
pub trait JobApi: Send + Sync + 'static {
    /// Upload a document, returning the server-assigned work item id
    ///
    /// Errors: `UploadRejected` (with the service's message), `Transport`,
    /// `Unauthenticated`.
    async fn upload(&self, file: &UploadFile, fund_type: &str) -> ClientResult<String>;

    /// Request that processing begin for an uploaded document
    ///
    /// Errors: `StartRejected` (with the service's message), `Transport`,
    /// `Unauthenticated`.
    async fn start(&self, work_item_id: &str) -> ClientResult<()>;

    /// Current lifecycle status of a work item
    async fn status(&self, work_item_id: &str) -> ClientResult<StatusResponse>;

    /// Computed financial metrics (only meaningful once completed)
    async fn metrics(&self, work_item_id: &str) -> ClientResult<FinancialMetrics>;

    /// Compliance evaluation (only meaningful once completed)
    async fn compliance(&self, work_item_id: &str) -> ClientResult<ComplianceResult>;

    /// Rendered export of a work item
    async fn export(&self, work_item_id: &str, format: ExportFormat) -> ClientResult<Vec<u8>>;

    /// Token cancelled when the authenticated session ends
    ///
    /// Polling derived from a session stops when it is cancelled.
    fn session_scope(&self) -> CancellationToken;

    /// End the authenticated session (logout)
    async fn end_session(&self) -> ClientResult<()>;
}

#[async_trait]
impl<T: JobApi + ?Sized> JobApi for std::sync::Arc<T> {
    async fn upload(&self, file: &UploadFile, fund_type: &str) -> ClientResult<String> {
        (**self).upload(file, fund_type).await
    }

    async fn start(&self, work_item_id: &str) -> ClientResult<()> {
        (**self).start(work_item_id).await
    }

    async fn status(&self, work_item_id: &str) -> ClientResult<StatusResponse> {
        (**self).status(work_item_id).await
    }

    async fn metrics(&self, work_item_id: &str) -> ClientResult<FinancialMetrics> {
        (**self).metrics(work_item_id).await
    }

    async fn compliance(&self, work_item_id: &str) -> ClientResult<ComplianceResult> {
        (**self).compliance(work_item_id).await
    }

    async fn export(&self, work_item_id: &str, format: ExportFormat) -> ClientResult<Vec<u8>> {
        (**self).export(work_item_id, format).await
    }

    fn session_scope(&self) -> CancellationToken {
        (**self).session_scope()
    }

    async fn end_session(&self) -> ClientResult<()> {
        (**self).end_session().await
    }
}
