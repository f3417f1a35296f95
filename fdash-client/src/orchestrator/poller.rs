//! Poll tasks
//!
//! Request-then-wait: the next status request is issued only after the
//! previous one resolved and the interval elapsed, so each item has at most
//! one outstanding request.

use super::{Inner, Registry, ResultBundle};
use crate::api::JobApi;
use crate::error::{ClientError, ClientResult};
use chrono::Utc;
use fdash_common::api::{ComplianceResult, FinancialMetrics, LifecycleStatus, StatusResponse};
use fdash_common::events::{DashEvent, WorkflowState};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SESSION_ENDED: &str = "session ended";

/// What a poll task does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PollKind {
    /// Poll status until terminal, then fetch results
    Status,
    /// Fetch results only (item already completed)
    Results,
}

/// Live poll task for one work item
pub(super) struct PollHandle {
    pub(super) generation: u64,
    pub(super) token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub(super) fn new(generation: u64, token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            generation,
            token,
            task,
        }
    }

    pub(super) fn cancel(&self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// Outcome of applying one status response
enum Step {
    Continue,
    FetchResults,
    Stop,
}

pub(super) async fn run<A: JobApi>(
    inner: Arc<Inner<A>>,
    id: String,
    generation: u64,
    token: CancellationToken,
    scope: CancellationToken,
    kind: PollKind,
) {
    match kind {
        PollKind::Status => poll_status(&inner, &id, generation, &token, &scope).await,
        PollKind::Results => fetch_results(&inner, &id, generation, &token, &scope).await,
    }
    debug!(work_item_id = %id, generation, "Poll task finished");
}

async fn poll_status<A: JobApi>(
    inner: &Inner<A>,
    id: &str,
    generation: u64,
    token: &CancellationToken,
    scope: &CancellationToken,
) {
    let max_failures = inner.settings.max_poll_failures;
    let mut failures: u32 = 0;

    loop {
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = scope.cancelled() => return inner.abandon(id, generation, SESSION_ENDED),
            response = inner.api.status(id) => response,
        };

        match response {
            Ok(status) => {
                failures = 0;
                match inner.apply_status(id, generation, scope, &status) {
                    Step::Continue => {}
                    Step::FetchResults => {
                        return fetch_results(inner, id, generation, token, scope).await
                    }
                    Step::Stop => return,
                }
            }
            Err(ClientError::Unauthenticated) => {
                warn!(work_item_id = %id, "Polling stopped: not authenticated");
                return inner.abandon(id, generation, SESSION_ENDED);
            }
            Err(e) => {
                failures += 1;
                warn!(
                    work_item_id = %id,
                    failures,
                    max_failures,
                    error = %e,
                    "Status poll failed"
                );
                if failures >= max_failures {
                    return inner.give_up(id, generation, failures, &e);
                }
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = scope.cancelled() => return inner.abandon(id, generation, SESSION_ENDED),
            _ = tokio::time::sleep(inner.settings.poll_interval) => {}
        }
    }
}

/// Fetch metrics and compliance concurrently and attach them as a pair
async fn fetch_results<A: JobApi>(
    inner: &Inner<A>,
    id: &str,
    generation: u64,
    token: &CancellationToken,
    scope: &CancellationToken,
) {
    debug!(work_item_id = %id, "Fetching results");

    let (metrics, compliance) = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        _ = scope.cancelled() => return inner.abandon(id, generation, SESSION_ENDED),
        pair = async { tokio::join!(inner.api.metrics(id), inner.api.compliance(id)) } => pair,
    };

    inner.apply_results(id, generation, scope, metrics, compliance);
}

impl<A: JobApi> Inner<A> {
    fn apply_status(
        &self,
        id: &str,
        generation: u64,
        scope: &CancellationToken,
        status: &StatusResponse,
    ) -> Step {
        let mut reg = self.registry();
        if !reg.is_current(id, generation) {
            debug!(work_item_id = %id, generation, "Discarding stale status response");
            return Step::Stop;
        }
        if scope.is_cancelled() {
            self.abandon_locked(&mut reg, id, generation, SESSION_ENDED);
            return Step::Stop;
        }
        if !reg.items.contains_key(id) {
            reg.retire(id, generation);
            return Step::Stop;
        }
        let Some(item) = reg.items.get_mut(id) else {
            return Step::Stop;
        };

        let old_state = item.state;
        let lifecycle_changed = item.lifecycle_status != status.status;
        let progress_changed = item.progress != status.progress || item.stage != status.stage;

        item.lifecycle_status = status.status;
        item.progress = status.progress;
        item.stage = status.stage.clone();
        if status.error_message.is_some() {
            item.error_message = status.error_message.clone();
        }
        if lifecycle_changed || progress_changed {
            item.touch();
        }

        if progress_changed {
            self.event_bus.emit_lossy(DashEvent::WorkItemProgress {
                work_item_id: id.to_string(),
                progress: status.progress,
                stage: status.stage.clone(),
                timestamp: Utc::now(),
            });
        }

        if !status.status.is_terminal() {
            if lifecycle_changed {
                debug!(work_item_id = %id, lifecycle = %status.status, "Lifecycle changed");
                self.announce(item, old_state);
            }
            return Step::Continue;
        }

        if status.status == LifecycleStatus::Failed {
            error!(
                work_item_id = %id,
                error_message = item.error_message.as_deref().unwrap_or(""),
                "Processing failed"
            );
            self.transition(item, WorkflowState::Failed);
            reg.retire(id, generation);
            return Step::Stop;
        }

        if lifecycle_changed {
            self.announce(item, old_state);
        }
        info!(work_item_id = %id, "Processing completed");
        Step::FetchResults
    }

    fn apply_results(
        &self,
        id: &str,
        generation: u64,
        scope: &CancellationToken,
        metrics: ClientResult<FinancialMetrics>,
        compliance: ClientResult<ComplianceResult>,
    ) {
        let mut reg = self.registry();
        if !reg.is_current(id, generation) {
            debug!(work_item_id = %id, generation, "Discarding stale results");
            return;
        }
        if scope.is_cancelled() {
            self.abandon_locked(&mut reg, id, generation, SESSION_ENDED);
            return;
        }
        reg.retire(id, generation);
        let Some(item) = reg.items.get_mut(id) else {
            return;
        };

        match (metrics, compliance) {
            (Ok(metrics), Ok(compliance)) => {
                item.results = Some(ResultBundle {
                    metrics,
                    compliance,
                });
                item.result_error = None;
                item.touch();
                self.transition(item, WorkflowState::Completed);
                self.event_bus.emit_lossy(DashEvent::ResultsReady {
                    work_item_id: id.to_string(),
                    timestamp: Utc::now(),
                });
            }
            (metrics, compliance) => {
                let cause = [
                    metrics.err().map(|e| format!("metrics: {}", e)),
                    compliance.err().map(|e| format!("compliance: {}", e)),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ");
                let err = ClientError::ResultIncomplete(cause);

                warn!(work_item_id = %id, error = %err, "Result fetch incomplete");
                item.results = None;
                item.result_error = Some(err.to_string());
                item.touch();
                self.transition(item, WorkflowState::CompletedIncomplete);
            }
        }
    }

    /// Stop polling after too many consecutive failures
    fn give_up(&self, id: &str, generation: u64, failures: u32, last_error: &ClientError) {
        let mut reg = self.registry();
        if !reg.retire(id, generation) {
            return;
        }

        let reason = format!("{} consecutive poll failures: {}", failures, last_error);
        error!(work_item_id = %id, %reason, "Giving up on work item");

        if let Some(item) = reg.items.get_mut(id) {
            item.error_message = Some(reason.clone());
            self.transition(item, WorkflowState::Failed);
        }
        self.announce_abandoned(id, &reason);
    }

    /// Stop polling without changing the item
    fn abandon(&self, id: &str, generation: u64, reason: &str) {
        let mut reg = self.registry();
        self.abandon_locked(&mut reg, id, generation, reason);
    }

    fn abandon_locked(&self, reg: &mut Registry, id: &str, generation: u64, reason: &str) {
        if reg.retire(id, generation) {
            warn!(work_item_id = %id, reason, "Polling abandoned");
            self.announce_abandoned(id, reason);
        }
    }
}
