//! Rate-limited, retrying, persistent work queue.
//!
//! One cooperative scheduler dispatches queued items on a timer tick,
//! bounded by a process-wide requests-per-minute window and per-tenant
//! hourly quotas. Every state transition is written through a [`QueueStore`]
//! so the queue survives restarts; items stuck in `processing` at shutdown
//! are recovered as `pending` (at-least-once — downstream dedup makes
//! posting at-most-once).

mod scheduler;

pub use scheduler::{QueueRuntimeStats, WorkQueue};

use chrono::{DateTime, Utc};
use commitcast_core::{PipelineError, QueueItem};
use thiserror::Error;

/// Tunables. Defaults match the documented configuration keys.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Process-wide dispatch ceiling over any sliding 60 s window.
    pub max_requests_per_minute: usize,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Scheduler tick.
    pub processing_interval_ms: u64,
    /// Raised delay floor for rate-limit-like failures.
    pub rate_limit_floor_ms: u64,
    /// Terminal items older than this are pruned.
    pub prune_after_hours: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 15,
            max_retries: 3,
            base_retry_delay_ms: 2_000,
            max_retry_delay_ms: 60_000,
            processing_interval_ms: 1_000,
            rate_limit_floor_ms: 30_000,
            prune_after_hours: 24,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// An equal-id item is already pending, processing, or recently done.
    #[error("duplicate queue item: {0}")]
    Duplicate(String),

    /// The tenant's hourly quota is exhausted.
    #[error("hourly quota exceeded for tenant {0}")]
    QuotaExceeded(String),

    /// The item exhausted its retries or hit a terminal error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The item was cancelled before dispatch.
    #[error("task cancelled")]
    Cancelled,

    #[error("queue store error: {0}")]
    Store(String),
}

/// Persistence hooks the queue drives on every state transition.
///
/// Implementations are synchronous; the scheduler calls them between
/// suspension points, never while awaiting a task.
pub trait QueueStore: Send + Sync + 'static {
    /// Upsert the full item row.
    fn persist(&self, item: &QueueItem) -> anyhow::Result<()>;

    /// Delete the item row (cancellation).
    fn remove(&self, id: &str) -> anyhow::Result<()>;

    /// Reset `processing` items to `pending`, then return all runnable items
    /// ordered by (priority, created_at).
    fn recover(&self) -> anyhow::Result<Vec<QueueItem>>;

    /// Delete terminal items last updated before `cutoff`. Returns the count.
    fn prune_terminal(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;

    /// Bump the tenant's hourly usage counter.
    fn record_usage(&self, tenant_id: &str, endpoint: &str, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Usage in the hour bucket containing `at`.
    fn usage_count(&self, tenant_id: &str, endpoint: &str, at: DateTime<Utc>)
        -> anyhow::Result<i64>;
}

/// Work requested by a completing task, admitted through the same gate as
/// external enqueues.
#[derive(Debug)]
pub struct FollowUp {
    pub item: QueueItem,
    /// Per-tenant hourly quota to enforce at admission; `None` skips the
    /// quota gate (used for post dispatch, which is not an AI call).
    pub quota: Option<i64>,
}

/// Result of a successfully executed task.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Serialized task result, delivered to the completion promise.
    pub result: String,
    pub follow_up: Option<FollowUp>,
}

impl TaskOutcome {
    pub fn done(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            follow_up: None,
        }
    }

    pub fn then(result: impl Into<String>, follow_up: FollowUp) -> Self {
        Self {
            result: result.into(),
            follow_up: Some(follow_up),
        }
    }
}

/// Executes one queue item. The scheduler awaits the returned future inline;
/// there is exactly one logical worker.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(
        &self,
        item: QueueItem,
    ) -> impl std::future::Future<Output = Result<TaskOutcome, PipelineError>> + Send;
}
