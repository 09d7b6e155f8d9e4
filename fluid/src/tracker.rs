//! Task tracker - correlation id to lifecycle state.
//!
//! Records are inserted by `submit` and updated by inbound events (result
//! envelopes, host status callbacks) that may arrive on other threads, so the
//! map is a DashMap: insert and update never contend on a global lock.
//!
//! ```text
//! Queued ──► Running ──► Complete
//!   │           │
//!   └───────────┴──────► Failed
//! ```
//!
//! A result for a `Queued` task goes straight to `Complete`; the service sends
//! no separate start event on the wire.
//!
//! The service may report a task before `submit` has registered its id. Such
//! events are held in a small bounded queue and replayed by `register`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tokio_util::bytes::Bytes;

use crate::envelope::{TaskKind, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Numeric code used by the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Complete => 2,
            Self::Failed => 3,
        }
    }
}

/// What a caller sees when querying a record. Terminal states carry their
/// payload; non-terminal states carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Complete(Bytes),
    Failed(String),
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Queued => TaskStatus::Queued,
            Self::Running => TaskStatus::Running,
            Self::Complete(_) => TaskStatus::Complete,
            Self::Failed(_) => TaskStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Inbound status change for one correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started { id: String },
    Completed(TaskResult),
    Failed { id: String, diagnostic: String },
}

impl TaskEvent {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Started { id } | Self::Failed { id, .. } => id,
            Self::Completed(result) => &result.uuid,
        }
    }
}

/// Outcome of applying an event. None of these are errors: unknown ids and
/// stale events are expected under retransmission and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Transitioned { from: TaskStatus, to: TaskStatus },
    /// No record for this id. The event is held until the id is registered
    /// or it is evicted by newer unmatched events.
    UnknownId,
    /// Transition not allowed from `current`; event dropped.
    Rejected { current: TaskStatus },
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("correlation id '{0}' is already outstanding")]
    DuplicateCorrelationId(String),
}

struct TaskEntry {
    kind: TaskKind,
    state: TaskState,
    submitted_at: Instant,
    completed_at: Option<Instant>,
    completion: Arc<Notify>,
}

/// Snapshot of one record, for diagnostics and host bridges.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub state: TaskState,
    pub submitted_at: Instant,
    pub completed_at: Option<Instant>,
}

impl TaskRecord {
    pub fn elapsed(&self) -> Duration {
        self.completed_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.submitted_at)
    }
}

/// Unmatched events held for ids that may still be registered.
pub const EARLY_EVENT_CAPACITY: usize = 64;

/// Concurrent correlation-id → record map.
pub struct TaskTracker {
    tasks: DashMap<String, TaskEntry>,
    /// Lock order: `early` before any `tasks` shard.
    early: Mutex<VecDeque<TaskEvent>>,
}

impl TaskTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: DashMap::new(),
            early: Mutex::new(VecDeque::new()),
        })
    }

    fn early(&self) -> MutexGuard<'_, VecDeque<TaskEvent>> {
        self.early.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly submitted task as `Queued`, then replay any events
    /// that arrived for it before registration.
    ///
    /// Never overwrites an existing record, terminal or not.
    pub fn register(
        self: &Arc<Self>,
        id: String,
        kind: TaskKind,
    ) -> Result<TaskHandle, TrackerError> {
        let completion = Arc::new(Notify::new());
        let mut early = self.early();
        let mut entry = match self.tasks.entry(id.clone()) {
            Entry::Occupied(_) => return Err(TrackerError::DuplicateCorrelationId(id)),
            Entry::Vacant(slot) => slot.insert(TaskEntry {
                kind,
                state: TaskState::Queued,
                submitted_at: Instant::now(),
                completed_at: None,
                completion: Arc::clone(&completion),
            }),
        };
        tracing::debug!(%id, %kind, "Task queued");

        if early.iter().any(|event| event.correlation_id() == id) {
            let (replay, rest): (VecDeque<_>, VecDeque<_>) = early
                .drain(..)
                .partition(|event| event.correlation_id() == id);
            *early = rest;
            for event in replay {
                tracing::debug!(%id, "Replaying event that arrived before registration");
                Self::transition(&id, &mut entry, event);
            }
        }
        drop(entry);
        drop(early);

        Ok(TaskHandle {
            id,
            completion,
            tracker: Arc::clone(self),
        })
    }

    pub fn apply(&self, event: TaskEvent) -> Applied {
        let id = event.correlation_id().to_string();
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            return Self::transition(&id, &mut entry, event);
        }

        // Re-check under the queue lock so a concurrent `register` either
        // sees this event or has already inserted the record.
        let mut early = self.early();
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            return Self::transition(&id, &mut entry, event);
        }
        tracing::warn!(%id, "Holding event for unknown correlation id");
        if early.len() == EARLY_EVENT_CAPACITY
            && let Some(evicted) = early.pop_front()
        {
            tracing::warn!(id = %evicted.correlation_id(), "Dropping event for unknown correlation id");
        }
        early.push_back(event);
        Applied::UnknownId
    }

    fn transition(id: &str, entry: &mut TaskEntry, event: TaskEvent) -> Applied {
        let from = entry.state.status();
        let next = match (from, event) {
            (TaskStatus::Queued, TaskEvent::Started { .. }) => TaskState::Running,
            (TaskStatus::Queued | TaskStatus::Running, TaskEvent::Completed(result)) => {
                TaskState::Complete(result.value)
            }
            (TaskStatus::Queued | TaskStatus::Running, TaskEvent::Failed { diagnostic, .. }) => {
                TaskState::Failed(diagnostic)
            }
            (current, event) => {
                tracing::warn!(%id, status = current.as_str(), ?event, "Rejecting out-of-order task event");
                return Applied::Rejected { current };
            }
        };

        let to = next.status();
        entry.state = next;
        if to.is_terminal() {
            entry.completed_at = Some(Instant::now());
            entry.completion.notify_waiters();
        }
        tracing::debug!(%id, from = from.as_str(), to = to.as_str(), "Task transitioned");

        Applied::Transitioned { from, to }
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.tasks.get(id).map(|entry| entry.state.clone())
    }

    pub fn record(&self, id: &str) -> Option<TaskRecord> {
        self.tasks.get(id).map(|entry| TaskRecord {
            id: id.to_string(),
            kind: entry.kind,
            state: entry.state.clone(),
            submitted_at: entry.submitted_at,
            completed_at: entry.completed_at,
        })
    }

    /// Consume a terminal record. Non-terminal records are left in place and
    /// their current state returned.
    pub fn take(&self, id: &str) -> Option<TaskState> {
        if let Some((_, entry)) = self.tasks.remove_if(id, |_, entry| entry.state.is_terminal()) {
            return Some(entry.state);
        }
        self.state(id)
    }

    /// Number of records not yet terminal.
    pub fn outstanding(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| !entry.state.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every record that never reached a terminal state, and any held
    /// events. Terminal records stay available to `take`. Returns the number
    /// of records dropped.
    pub fn abandon_outstanding(&self) -> usize {
        self.early().clear();
        let mut abandoned = 0;
        self.tasks.retain(|id, entry| {
            if entry.state.is_terminal() {
                return true;
            }
            tracing::info!(%id, status = entry.state.status().as_str(), "Abandoning outstanding task");
            entry.completion.notify_waiters();
            abandoned += 1;
            false
        });
        abandoned
    }
}

/// Handle to a submitted task for polling and waiting.
pub struct TaskHandle {
    id: String,
    completion: Arc<Notify>,
    tracker: Arc<TaskTracker>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> Option<TaskState> {
        self.tracker.state(&self.id)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().map(|s| s.is_terminal()).unwrap_or(true)
    }

    /// Wait for a terminal state. Returns `None` if the record was abandoned.
    pub async fn wait(&self) -> Option<TaskState> {
        loop {
            let notified = self.completion.notified();
            tokio::pin!(notified);
            // Register before checking so a notify between the check and the
            // await is not lost.
            notified.as_mut().enable();

            match self.state() {
                Some(state) if state.is_terminal() => return Some(state),
                Some(_) => notified.await,
                None => return None,
            }
        }
    }

    /// Wait at most `timeout`. On expiry the returned state is a local
    /// `Failed`; the tracked record is left untouched.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(state) => state,
            Err(_) => {
                tracing::debug!(id = %self.id, ?timeout, "Task wait deadline exceeded");
                Some(TaskState::Failed(format!(
                    "no result within {:.3}s",
                    timeout.as_secs_f64()
                )))
            }
        }
    }
}
