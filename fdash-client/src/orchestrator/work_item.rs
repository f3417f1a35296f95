//! Work item model

use chrono::{DateTime, Utc};
use fdash_common::api::{ComplianceResult, FinancialMetrics, LifecycleStatus, StatusResponse};
use fdash_common::events::WorkflowState;
use serde::Serialize;

/// Metrics and compliance for a completed item
///
/// Only ever attached as a pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultBundle {
    pub metrics: FinancialMetrics,
    pub compliance: ComplianceResult,
}

/// One uploaded document and its processing job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    /// Server-assigned id
    pub id: String,
    /// `None` for items adopted by id rather than submitted here
    pub fund_type: Option<String>,
    pub lifecycle_status: LifecycleStatus,
    pub state: WorkflowState,
    pub progress: Option<f64>,
    pub stage: Option<String>,
    /// Service-reported failure text, or the local reason the item failed
    pub error_message: Option<String>,
    pub results: Option<ResultBundle>,
    /// Why the result pair is missing for a completed item
    pub result_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub(crate) fn new(id: impl Into<String>, fund_type: Option<String>) -> Self {
        Self {
            id: id.into(),
            fund_type,
            lifecycle_status: LifecycleStatus::Draft,
            state: WorkflowState::Idle,
            progress: None,
            stage: None,
            error_message: None,
            results: None,
            result_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Item known only from a status response
    pub(crate) fn adopted(id: impl Into<String>, status: &StatusResponse) -> Self {
        let mut item = Self::new(id, None);
        item.lifecycle_status = status.status;
        item.progress = status.progress;
        item.stage = status.stage.clone();
        item.error_message = status.error_message.clone();
        if status.status == LifecycleStatus::Failed {
            item.state = WorkflowState::Failed;
        }
        item
    }

    /// Results are attached and complete
    pub fn has_results(&self) -> bool {
        self.results.is_some()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
