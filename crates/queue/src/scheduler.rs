//! The cooperative queue scheduler.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use commitcast_core::{QueueItem, TaskStatus};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{FollowUp, QueueConfig, QueueError, QueueStore, TaskOutcome, TaskRunner};

const RPM_WINDOW: Duration = Duration::from_secs(60);
const RECENT_COMPLETED_CAP: usize = 1000;
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Completion promise resolved when an item terminates.
pub type CompletionRx = oneshot::Receiver<Result<String, QueueError>>;

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct QueueRuntimeStats {
    pub pending: i64,
    pub processing: i64,
    pub retrying: i64,
    pub rpm_remaining: i64,
    pub avg_processing_ms: i64,
}

struct QueueState {
    /// Dispatch order: priority ascending, FIFO within a priority.
    ready: Vec<QueueItem>,
    /// Items waiting out a retry delay, reinserted at the head when due.
    delayed: Vec<(Instant, QueueItem)>,
    in_flight: Option<String>,
    /// Dispatch timestamps within the rolling RPM window.
    dispatched: VecDeque<Instant>,
    /// Bounded cache of recently completed ids for deduplication.
    recent_ids: HashSet<String>,
    recent_order: VecDeque<String>,
    waiters: HashMap<String, oneshot::Sender<Result<String, QueueError>>>,
    total_processing: Duration,
    completed: u64,
    last_prune: Instant,
}

impl QueueState {
    fn knows(&self, id: &str) -> bool {
        self.in_flight.as_deref() == Some(id)
            || self.ready.iter().any(|i| i.id == id)
            || self.delayed.iter().any(|(_, i)| i.id == id)
            || self.recent_ids.contains(id)
    }

    fn remember_completed(&mut self, id: String) {
        if self.recent_ids.insert(id.clone()) {
            self.recent_order.push_back(id);
            while self.recent_order.len() > RECENT_COMPLETED_CAP {
                if let Some(old) = self.recent_order.pop_front() {
                    self.recent_ids.remove(&old);
                }
            }
        }
    }

    /// Stable insert: after the last item of equal-or-higher priority.
    fn insert_sorted(&mut self, item: QueueItem) {
        let pos = self
            .ready
            .iter()
            .position(|i| i.priority > item.priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, item);
    }
}

struct Inner<S, R> {
    store: S,
    runner: R,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

/// The rate-limited work queue. Cheap to clone; all clones share state.
pub struct WorkQueue<S, R> {
    inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for WorkQueue<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: QueueStore, R: TaskRunner> WorkQueue<S, R> {
    /// Build the queue and recover persisted work: `processing` rows are
    /// reset to `pending` and all runnable items are re-hydrated in
    /// (priority, created_at) order.
    pub fn new(store: S, runner: R, config: QueueConfig) -> anyhow::Result<Self> {
        let recovered = store.recover()?;
        if !recovered.is_empty() {
            info!("recovered {} queue items from store", recovered.len());
        }
        let state = QueueState {
            ready: recovered,
            delayed: Vec::new(),
            in_flight: None,
            dispatched: VecDeque::new(),
            recent_ids: HashSet::new(),
            recent_order: VecDeque::new(),
            waiters: HashMap::new(),
            total_processing: Duration::ZERO,
            completed: 0,
            last_prune: Instant::now(),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                runner,
                config,
                state: Mutex::new(state),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().expect("queue state mutex poisoned")
    }

    /// Admit an item. Checks deduplication and (when `quota` is set) the
    /// tenant's hourly budget, then persists the item as `pending`.
    ///
    /// The returned promise resolves when the item terminates.
    pub fn enqueue(
        &self,
        mut item: QueueItem,
        quota: Option<i64>,
    ) -> Result<CompletionRx, QueueError> {
        let now = Utc::now();

        // One lock spans the dedup check, the quota charge, and the insert:
        // concurrent deliveries of the same id must not both be admitted,
        // and a rejected duplicate must not have consumed quota.
        let mut state = self.lock();
        if state.knows(&item.id) {
            return Err(QueueError::Duplicate(item.id));
        }

        if let Some(limit) = quota {
            let used = self
                .inner
                .store
                .usage_count(&item.tenant_id, item.kind.as_str(), now)
                .map_err(|e| QueueError::Store(e.to_string()))?;
            if used >= limit {
                return Err(QueueError::QuotaExceeded(item.tenant_id));
            }
            self.inner
                .store
                .record_usage(&item.tenant_id, item.kind.as_str(), now)
                .map_err(|e| QueueError::Store(e.to_string()))?;
        }

        item.status = TaskStatus::Pending;
        item.updated_at = now;
        self.inner
            .store
            .persist(&item)
            .map_err(|e| QueueError::Store(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        state.waiters.insert(item.id.clone(), tx);
        debug!(id = %item.id, kind = item.kind.as_str(), "enqueued");
        state.insert_sorted(item);
        Ok(rx)
    }

    /// Cancel a not-yet-dispatched item. In-flight tasks run to completion.
    pub fn cancel(&self, id: &str) -> Result<bool, QueueError> {
        let mut state = self.lock();
        let before = state.ready.len() + state.delayed.len();
        state.ready.retain(|i| i.id != id);
        state.delayed.retain(|(_, i)| i.id != id);
        let removed = before != state.ready.len() + state.delayed.len();
        if removed {
            if let Some(tx) = state.waiters.remove(id) {
                let _ = tx.send(Err(QueueError::Cancelled));
            }
            drop(state);
            self.inner
                .store
                .remove(id)
                .map_err(|e| QueueError::Store(e.to_string()))?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> QueueRuntimeStats {
        let state = self.lock();
        let now = Instant::now();
        let in_window = state
            .dispatched
            .iter()
            .filter(|t| now.duration_since(**t) < RPM_WINDOW)
            .count();
        let avg = if state.completed > 0 {
            (state.total_processing.as_millis() as i64) / state.completed as i64
        } else {
            0
        };
        QueueRuntimeStats {
            pending: state.ready.len() as i64,
            processing: state.in_flight.is_some() as i64,
            retrying: state.delayed.len() as i64,
            rpm_remaining: (self.inner.config.max_requests_per_minute as i64 - in_window as i64)
                .max(0),
            avg_processing_ms: avg,
        }
    }

    /// Run the scheduler until the shutdown signal flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.inner.config.processing_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.on_tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("queue scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn on_tick(&self) {
        self.promote_due();

        // Dispatch while the queue is non-empty and the RPM window allows.
        loop {
            let item = {
                let mut state = self.lock();
                let now = Instant::now();
                while let Some(front) = state.dispatched.front() {
                    if now.duration_since(*front) >= RPM_WINDOW {
                        state.dispatched.pop_front();
                    } else {
                        break;
                    }
                }
                if state.dispatched.len() >= self.inner.config.max_requests_per_minute
                    || state.ready.is_empty()
                {
                    None
                } else {
                    let item = state.ready.remove(0);
                    state.in_flight = Some(item.id.clone());
                    state.dispatched.push_back(now);
                    Some(item)
                }
            };

            let Some(mut item) = item else { break };

            item.status = TaskStatus::Processing;
            item.updated_at = Utc::now();
            if let Err(e) = self.inner.store.persist(&item) {
                // Queue persistence has no fallback; keep going on memory alone.
                error!(id = %item.id, "persist processing state: {e}");
            }

            let started = Instant::now();
            let result = self.inner.runner.run(item.clone()).await;
            let elapsed = started.elapsed();
            self.settle(item, elapsed, result);
        }

        self.maybe_prune();
    }

    fn promote_due(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        let mut due: Vec<QueueItem> = Vec::new();
        state.delayed.retain(|(at, item)| {
            if *at <= now {
                due.push(item.clone());
                false
            } else {
                true
            }
        });
        // Retried items go back to the head, earliest-due first.
        for item in due.into_iter().rev() {
            state.ready.insert(0, item);
        }
    }

    fn settle(
        &self,
        mut item: QueueItem,
        elapsed: Duration,
        result: Result<TaskOutcome, commitcast_core::PipelineError>,
    ) {
        match result {
            Ok(outcome) => {
                item.status = TaskStatus::Completed;
                item.updated_at = Utc::now();
                item.last_error = None;
                if let Err(e) = self.inner.store.persist(&item) {
                    error!(id = %item.id, "persist completed state: {e}");
                }
                let waiter = {
                    let mut state = self.lock();
                    state.in_flight = None;
                    state.total_processing += elapsed;
                    state.completed += 1;
                    state.remember_completed(item.id.clone());
                    state.waiters.remove(&item.id)
                };
                if let Some(tx) = waiter {
                    let _ = tx.send(Ok(outcome.result));
                }
                if let Some(FollowUp { item: next, quota }) = outcome.follow_up {
                    match self.enqueue(next, quota) {
                        Ok(_) | Err(QueueError::Duplicate(_)) => {}
                        Err(e) => warn!(after = %item.id, "follow-up rejected: {e}"),
                    }
                }
            }
            Err(err) => {
                let exhausted = item.retry_count >= self.inner.config.max_retries;
                if err.is_terminal() || exhausted {
                    item.status = TaskStatus::Failed;
                    item.updated_at = Utc::now();
                    item.last_error = Some(err.to_string());
                    warn!(id = %item.id, retries = item.retry_count, "task failed: {err}");
                    if let Err(e) = self.inner.store.persist(&item) {
                        error!(id = %item.id, "persist failed state: {e}");
                    }
                    let waiter = {
                        let mut state = self.lock();
                        state.in_flight = None;
                        state.waiters.remove(&item.id)
                    };
                    if let Some(tx) = waiter {
                        let _ = tx.send(Err(QueueError::Failed(err.to_string())));
                    }
                } else {
                    item.retry_count += 1;
                    item.status = TaskStatus::Retrying;
                    item.updated_at = Utc::now();
                    item.last_error = Some(err.to_string());
                    let delay = retry_delay(
                        &self.inner.config,
                        item.retry_count,
                        err.is_rate_limit_like(),
                        random_jitter(),
                    );
                    debug!(
                        id = %item.id,
                        retry = item.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "task retrying: {err}"
                    );
                    if let Err(e) = self.inner.store.persist(&item) {
                        error!(id = %item.id, "persist retrying state: {e}");
                    }
                    let mut state = self.lock();
                    state.in_flight = None;
                    state.delayed.push((Instant::now() + delay, item));
                }
            }
        }
    }

    fn maybe_prune(&self) {
        let due = {
            let mut state = self.lock();
            if state.last_prune.elapsed() >= PRUNE_INTERVAL {
                state.last_prune = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            let cutoff = Utc::now() - chrono::Duration::hours(self.inner.config.prune_after_hours);
            match self.inner.store.prune_terminal(cutoff) {
                Ok(0) => {}
                Ok(n) => info!("pruned {n} terminal queue items"),
                Err(e) => error!("queue prune: {e}"),
            }
        }
    }
}

/// Compute the retry delay for the n-th retry (n ≥ 1):
/// `min(max, base · 2^(n-1) · (1 + jitter))`, with the floor raised for
/// rate-limit-like failures. `jitter` must lie in [-0.25, 0.25].
pub fn retry_delay(config: &QueueConfig, retry_count: u32, rate_limited: bool, jitter: f64) -> Duration {
    let exp = retry_count.saturating_sub(1).min(16);
    let base = config.base_retry_delay_ms.saturating_mul(1u64 << exp) as f64;
    let mut ms = (base * (1.0 + jitter)) as u64;
    ms = ms.min(config.max_retry_delay_ms);
    if rate_limited {
        ms = ms.max(config.rate_limit_floor_ms);
    }
    Duration::from_millis(ms)
}

/// Uniform jitter in [-0.25, 0.25].
fn random_jitter() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.0;
    }
    let frac = u64::from_le_bytes(bytes) as f64 / u64::MAX as f64;
    frac * 0.5 - 0.25
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitcast_core::{PipelineError, TaskKind};
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Test doubles ───────────────────────────────────────────────────

    #[derive(Default)]
    struct MemStore {
        rows: Mutex<StdHashMap<String, QueueItem>>,
        usage: Mutex<StdHashMap<(String, String, String), i64>>,
    }

    impl MemStore {
        fn status_of(&self, id: &str) -> Option<TaskStatus> {
            self.rows.lock().unwrap().get(id).map(|i| i.status)
        }
    }

    impl QueueStore for Arc<MemStore> {
        fn persist(&self, item: &QueueItem) -> anyhow::Result<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(item.id.clone(), item.clone());
            Ok(())
        }

        fn remove(&self, id: &str) -> anyhow::Result<()> {
            self.rows.lock().unwrap().remove(id);
            Ok(())
        }

        fn recover(&self) -> anyhow::Result<Vec<QueueItem>> {
            let mut rows = self.rows.lock().unwrap();
            let mut runnable: Vec<QueueItem> = rows
                .values_mut()
                .filter_map(|item| {
                    if item.status == TaskStatus::Processing {
                        item.status = TaskStatus::Pending;
                    }
                    matches!(item.status, TaskStatus::Pending | TaskStatus::Retrying)
                        .then(|| item.clone())
                })
                .collect();
            runnable.sort_by(|a, b| {
                (a.priority, a.created_at).cmp(&(b.priority, b.created_at))
            });
            Ok(runnable)
        }

        fn prune_terminal(&self, cutoff: chrono::DateTime<Utc>) -> anyhow::Result<usize> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, i| !(i.status.is_terminal() && i.updated_at < cutoff));
            Ok(before - rows.len())
        }

        fn record_usage(
            &self,
            tenant_id: &str,
            endpoint: &str,
            at: chrono::DateTime<Utc>,
        ) -> anyhow::Result<()> {
            let bucket = at.format("%Y-%m-%d %H").to_string();
            *self
                .usage
                .lock()
                .unwrap()
                .entry((tenant_id.into(), endpoint.into(), bucket))
                .or_insert(0) += 1;
            Ok(())
        }

        fn usage_count(
            &self,
            tenant_id: &str,
            endpoint: &str,
            at: chrono::DateTime<Utc>,
        ) -> anyhow::Result<i64> {
            let bucket = at.format("%Y-%m-%d %H").to_string();
            Ok(*self
                .usage
                .lock()
                .unwrap()
                .get(&(tenant_id.into(), endpoint.into(), bucket))
                .unwrap_or(&0))
        }
    }

    /// Runner that fails each item a scripted number of times, then succeeds.
    struct FlakyRunner {
        failures: Mutex<StdHashMap<String, u32>>,
        runs: AtomicUsize,
        rate_limited: bool,
    }

    impl FlakyRunner {
        fn new(failures: &[(&str, u32)]) -> Self {
            Self {
                failures: Mutex::new(
                    failures
                        .iter()
                        .map(|(id, n)| (id.to_string(), *n))
                        .collect(),
                ),
                runs: AtomicUsize::new(0),
                rate_limited: false,
            }
        }
    }

    impl TaskRunner for Arc<FlakyRunner> {
        async fn run(&self, item: QueueItem) -> Result<TaskOutcome, PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            let left = failures.entry(item.id.clone()).or_insert(0);
            if *left > 0 {
                *left -= 1;
                if self.rate_limited {
                    return Err(PipelineError::RateLimited("429".into()));
                }
                return Err(PipelineError::Transient("boom".into()));
            }
            Ok(TaskOutcome::done(format!("ok:{}", item.id)))
        }
    }

    fn item(id: &str, tenant: &str) -> QueueItem {
        QueueItem::new(
            id.into(),
            TaskKind::DiffAnalysis,
            tenant.into(),
            serde_json::json!({}),
        )
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            max_requests_per_minute: 100,
            base_retry_delay_ms: 10,
            max_retry_delay_ms: 100,
            processing_interval_ms: 10,
            rate_limit_floor_ms: 50,
            ..QueueConfig::default()
        }
    }

    // ── Pure backoff math ──────────────────────────────────────────────

    #[test]
    fn backoff_doubles_and_caps() {
        let config = QueueConfig::default();
        assert_eq!(retry_delay(&config, 1, false, 0.0).as_millis(), 2_000);
        assert_eq!(retry_delay(&config, 2, false, 0.0).as_millis(), 4_000);
        assert_eq!(retry_delay(&config, 3, false, 0.0).as_millis(), 8_000);
        // Cap at max_retry_delay_ms.
        assert_eq!(retry_delay(&config, 10, false, 0.25).as_millis(), 60_000);
    }

    #[test]
    fn backoff_jitter_bounds() {
        let config = QueueConfig::default();
        let low = retry_delay(&config, 1, false, -0.25).as_millis();
        let high = retry_delay(&config, 1, false, 0.25).as_millis();
        assert_eq!(low, 1_500);
        assert_eq!(high, 2_500);
    }

    #[test]
    fn backoff_rate_limit_floor() {
        let config = QueueConfig::default();
        // First retry would be 2 s; rate-limit-like raises it to 30 s.
        assert_eq!(retry_delay(&config, 1, true, 0.0).as_millis(), 30_000);
        // Beyond the floor the computed delay wins.
        assert_eq!(retry_delay(&config, 5, true, 0.0).as_millis(), 32_000);
    }

    #[test]
    fn backoff_monotone_without_jitter() {
        let config = QueueConfig::default();
        let mut last = Duration::ZERO;
        for n in 1..=8 {
            let d = retry_delay(&config, n, false, 0.0);
            assert!(d >= last);
            last = d;
        }
    }

    // ── Admission ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_ids_rejected() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[]));
        let queue = WorkQueue::new(store, runner, fast_config()).unwrap();

        queue.enqueue(item("a", "t1"), None).unwrap();
        let err = queue.enqueue(item("a", "t1"), None).unwrap_err();
        assert!(matches!(err, QueueError::Duplicate(_)));
    }

    #[tokio::test]
    async fn quota_enforced_at_admission() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[]));
        let queue = WorkQueue::new(store, runner, fast_config()).unwrap();

        queue.enqueue(item("a", "t1"), Some(2)).unwrap();
        queue.enqueue(item("b", "t1"), Some(2)).unwrap();
        let err = queue.enqueue(item("c", "t1"), Some(2)).unwrap_err();
        assert!(matches!(err, QueueError::QuotaExceeded(_)));

        // Other tenants are unaffected.
        queue.enqueue(item("d", "t2"), Some(2)).unwrap();
    }

    #[test]
    fn concurrent_enqueue_admits_exactly_once() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[]));
        let queue = WorkQueue::new(store.clone(), runner, fast_config()).unwrap();

        let barrier = Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    queue.enqueue(item("same", "t1"), Some(10)).is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(queue.stats().pending, 1);
        // The losing deliveries must not have consumed quota.
        let charged: i64 = store.usage.lock().unwrap().values().sum();
        assert_eq!(charged, 1);
    }

    #[tokio::test]
    async fn priority_orders_dispatch_fifo_on_ties() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[]));
        let queue = WorkQueue::new(store, runner, fast_config()).unwrap();

        queue.enqueue(item("low-1", "t").with_priority(9), None).unwrap();
        queue.enqueue(item("norm-1", "t").with_priority(5), None).unwrap();
        queue.enqueue(item("norm-2", "t").with_priority(5), None).unwrap();
        queue.enqueue(item("high-1", "t").with_priority(1), None).unwrap();

        let order: Vec<String> = {
            let state = queue.lock();
            state.ready.iter().map(|i| i.id.clone()).collect()
        };
        assert_eq!(order, ["high-1", "norm-1", "norm-2", "low-1"]);
    }

    // ── Execution & retry ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn completes_and_resolves_promise() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[]));
        let queue = WorkQueue::new(store.clone(), runner, fast_config()).unwrap();

        let rx = queue.enqueue(item("a", "t"), None).unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let worker = queue.clone();
        tokio::spawn(async move { worker.run(shutdown).await });

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, "ok:a");
        assert_eq!(store.status_of("a"), Some(TaskStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[("a", 2)]));
        let queue = WorkQueue::new(store.clone(), runner.clone(), fast_config()).unwrap();

        let rx = queue.enqueue(item("a", "t"), None).unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let worker = queue.clone();
        tokio::spawn(async move { worker.run(shutdown).await });

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, "ok:a");
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
        let row = store.rows.lock().unwrap().get("a").cloned().unwrap();
        assert_eq!(row.retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_item() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[("a", 10)]));
        let queue = WorkQueue::new(store.clone(), runner, fast_config()).unwrap();

        let rx = queue.enqueue(item("a", "t"), None).unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let worker = queue.clone();
        tokio::spawn(async move { worker.run(shutdown).await });

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, QueueError::Failed(_)));
        assert_eq!(store.status_of("a"), Some(TaskStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_skip_retries() {
        struct TerminalRunner;
        impl TaskRunner for TerminalRunner {
            async fn run(&self, item: QueueItem) -> Result<TaskOutcome, PipelineError> {
                Err(PipelineError::ReauthRequired(item.tenant_id))
            }
        }

        let store = Arc::new(MemStore::default());
        let queue = WorkQueue::new(store.clone(), TerminalRunner, fast_config()).unwrap();

        let rx = queue.enqueue(item("a", "t"), None).unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let worker = queue.clone();
        tokio::spawn(async move { worker.run(shutdown).await });

        rx.await.unwrap().unwrap_err();
        let row = store.rows.lock().unwrap().get("a").cloned().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert_eq!(row.retry_count, 0);
    }

    // ── Recovery ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn startup_resets_processing_to_pending() {
        let store = Arc::new(MemStore::default());
        let mut stuck = item("stuck", "t");
        stuck.status = TaskStatus::Processing;
        store.persist(&stuck).unwrap();
        let mut waiting = item("waiting", "t");
        waiting.status = TaskStatus::Pending;
        store.persist(&waiting).unwrap();
        let mut done = item("done", "t");
        done.status = TaskStatus::Completed;
        store.persist(&done).unwrap();

        let runner = Arc::new(FlakyRunner::new(&[]));
        let queue = WorkQueue::new(store.clone(), runner, fast_config()).unwrap();

        assert_eq!(store.status_of("stuck"), Some(TaskStatus::Pending));
        let ids: Vec<String> = {
            let state = queue.lock();
            state.ready.iter().map(|i| i.id.clone()).collect()
        };
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"stuck".to_string()));
        assert!(!ids.contains(&"done".to_string()));
    }

    // ── Cancellation ───────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_removes_pending_item() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[]));
        let queue = WorkQueue::new(store.clone(), runner, fast_config()).unwrap();

        let rx = queue.enqueue(item("a", "t"), None).unwrap();
        assert!(queue.cancel("a").unwrap());
        assert!(store.rows.lock().unwrap().get("a").is_none());
        assert!(matches!(rx.await.unwrap(), Err(QueueError::Cancelled)));
        assert!(!queue.cancel("a").unwrap());
    }

    // ── RPM window ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn rpm_window_defers_excess_dispatches() {
        let store = Arc::new(MemStore::default());
        let runner = Arc::new(FlakyRunner::new(&[]));
        let config = QueueConfig {
            max_requests_per_minute: 3,
            processing_interval_ms: 10,
            ..fast_config()
        };
        let queue = WorkQueue::new(store.clone(), runner.clone(), config).unwrap();

        let mut receivers = Vec::new();
        for i in 0..5 {
            receivers.push(queue.enqueue(item(&format!("i{i}"), "t"), None).unwrap());
        }
        let (_tx, shutdown) = watch::channel(false);
        let worker = queue.clone();
        tokio::spawn(async move { worker.run(shutdown).await });

        // Let a few ticks pass within the first minute: only 3 may dispatch.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);

        // After the window rolls over the rest complete; nothing is lost.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 5);
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
    }

    // ── Follow-ups ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn follow_up_is_admitted_and_run() {
        struct ChainRunner;
        impl TaskRunner for ChainRunner {
            async fn run(&self, item: QueueItem) -> Result<TaskOutcome, PipelineError> {
                if item.kind == TaskKind::DiffAnalysis {
                    let next = QueueItem::new(
                        format!("{}-render", item.id),
                        TaskKind::ChangelogRender,
                        item.tenant_id.clone(),
                        serde_json::json!({}),
                    );
                    Ok(TaskOutcome::then(
                        "analyzed",
                        FollowUp {
                            item: next,
                            quota: None,
                        },
                    ))
                } else {
                    Ok(TaskOutcome::done("rendered"))
                }
            }
        }

        let store = Arc::new(MemStore::default());
        let queue = WorkQueue::new(store.clone(), ChainRunner, fast_config()).unwrap();

        queue.enqueue(item("a", "t"), None).unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let worker = queue.clone();
        tokio::spawn(async move { worker.run(shutdown).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.status_of("a"), Some(TaskStatus::Completed));
        assert_eq!(store.status_of("a-render"), Some(TaskStatus::Completed));
    }
}
