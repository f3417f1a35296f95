//! Event types for the fdash event system
//!
//! Provides the shared event definitions and the EventBus used to notify the
//! presentation layer of session and workflow changes.

use crate::api::LifecycleStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Client-side workflow state of a work item
///
/// `idle → uploading → started → polling → {completed | completed_incomplete | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Nothing submitted yet (or upload rejected)
    Idle,
    /// Upload accepted and an id assigned; start request in flight
    ///
    /// Items are registered only once the service has assigned an id, so
    /// the upload request itself happens before this state.
    Uploading,
    /// Upload accepted, job start acknowledged
    Started,
    /// Status polling loop active (or resumable)
    Polling,
    /// Job completed and both results fetched
    Completed,
    /// Job completed but the result pair could not be fetched
    #[serde(rename = "completed_with_incomplete_results")]
    CompletedIncomplete,
    /// Job failed, start was refused, or polling gave up
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::CompletedIncomplete | WorkflowState::Failed
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Uploading => "uploading",
            WorkflowState::Started => "started",
            WorkflowState::Polling => "polling",
            WorkflowState::Completed => "completed",
            WorkflowState::CompletedIncomplete => "completed-with-incomplete-results",
            WorkflowState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// fdash event types
///
/// Broadcast via EventBus; serializable so a presentation layer can forward
/// them as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DashEvent {
    /// Login succeeded or a persisted session was restored
    SessionStarted {
        tenant_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Access token transparently renewed
    SessionRefreshed {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session could not be recovered; the user must log in again
    ///
    /// Triggers:
    /// - Presentation layer: navigate to the login entry point
    SessionExpired {
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Explicit logout
    SessionEnded {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Work item moved to a new workflow state
    WorkItemStateChanged {
        work_item_id: String,
        old_state: WorkflowState,
        new_state: WorkflowState,
        lifecycle_status: Option<LifecycleStatus>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress metadata changed while polling
    WorkItemProgress {
        work_item_id: String,
        progress: Option<f64>,
        stage: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Metrics and compliance results fetched for a completed item
    ResultsReady {
        work_item_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Polling stopped without reaching a terminal status
    PollAbandoned {
        work_item_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers.
///
/// # Examples
///
/// ```
/// use fdash_common::events::{DashEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(DashEvent::SessionRefreshed {
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(DashEvent::SessionRefreshed { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DashEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DashEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DashEvent) -> Result<usize, broadcast::error::SendError<DashEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DashEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
