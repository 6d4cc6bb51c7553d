//! The queue manager: admission, concurrency ceiling, retry, introspection.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::pressure::{PressureProbe, fallback_pressure};
use super::record::RequestRecord;
use super::retry::RetryPolicy;
use super::state::RequestState;
use crate::domain::{OpError, OpFn, OpType, Priority, RequestId};
use crate::status::{QueueCounts, QueueSnapshot, RequestStatusView};

/// Tunables for the queue. `Default` is the production profile.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrency ceiling at startup.
    pub initial_concurrent: usize,

    /// Bounds the adaptive controller moves the ceiling between.
    pub min_concurrent: usize,
    pub max_concurrent: usize,

    /// Backoff for transient failures.
    pub retry: RetryPolicy,

    /// How often memory pressure is sampled and the ceiling adjusted.
    pub sampler_interval: Duration,

    /// Disable to pin the ceiling at `initial_concurrent`.
    pub adaptive: bool,

    /// Pressure above which the ceiling drops one slot per sample.
    pub pressure_high_mark: f64,

    /// Pressure below which, given enough successes, it grows one slot.
    pub pressure_low_mark: f64,

    /// Successes since the last raise needed before the ceiling grows.
    pub raise_after_successes: u32,

    /// Failures since the last adjustment that drop the ceiling one slot.
    pub failure_trip: u32,

    /// Pressure above which bulk uploads are skipped over at admission.
    pub bulk_skip_mark: f64,

    /// Pressure above which non-urgent uploads are deferred at enqueue.
    pub shed_mark: f64,

    /// How long a shed upload waits before joining the queue.
    pub shed_delay: Duration,

    /// Uploads at this priority value or better are never shed.
    pub shed_priority_floor: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_concurrent: 3,
            min_concurrent: 1,
            max_concurrent: 6,
            retry: RetryPolicy::default(),
            sampler_interval: Duration::from_secs(5),
            adaptive: true,
            pressure_high_mark: 80.0,
            pressure_low_mark: 30.0,
            raise_after_successes: 5,
            failure_trip: 3,
            bulk_skip_mark: 70.0,
            shed_mark: 90.0,
            shed_delay: Duration::from_secs(2),
            shed_priority_floor: 2,
        }
    }
}

/// The operation closure and the channel that settles its ticket.
///
/// Travels outside the record so records stay `Clone`; the `oneshot::Sender`
/// is consumed exactly once, which makes double-settlement unrepresentable.
struct OpHandle<T> {
    op: OpFn<T>,
    done: oneshot::Sender<Result<T, OpError>>,
}

/// All mutable queue state, guarded by a single lock.
///
/// Every mutation is a synchronous step between suspension points; nothing
/// holds the lock across an await.
struct QueueState<T> {
    /// Live (non-terminal) records.
    records: HashMap<RequestId, RequestRecord>,

    /// Pending queue, priority-ordered, ids only.
    pending: VecDeque<RequestId>,

    /// Handles for requests not yet admitted.
    handles: HashMap<RequestId, OpHandle<T>>,

    active: usize,
    max_concurrent: usize,
    memory_pressure: f64,

    /// Rolling counters, reset by the adaptive controller.
    success_count: u32,
    failure_count: u32,
}

impl<T> QueueState<T> {
    /// Insert before the first strictly-lower-priority item, so equal
    /// priorities keep arrival order.
    fn insert_by_priority(&mut self, id: RequestId) {
        let Some(priority) = self.records.get(&id).map(|r| r.priority) else {
            return;
        };
        let records = &self.records;
        let pos = self
            .pending
            .iter()
            .position(|other| records.get(other).is_some_and(|r| r.priority > priority));
        match pos {
            Some(i) => self.pending.insert(i, id),
            None => self.pending.push_back(id),
        }
    }

    /// Pick the next request to admit. Under high pressure, bulk uploads
    /// are passed over if anything smaller is waiting.
    fn select_next(&mut self, skip_bulk: bool) -> Option<RequestId> {
        if skip_bulk {
            let records = &self.records;
            if let Some(pos) = self
                .pending
                .iter()
                .position(|id| records.get(id).is_some_and(|r| !r.op_type.is_bulk()))
            {
                return self.pending.remove(pos);
            }
        }
        self.pending.pop_front()
    }

    fn status_views(&self) -> Vec<RequestStatusView> {
        let mut views: Vec<_> = self.records.values().map(RequestStatusView::of).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    fn adjust_concurrency(&mut self, config: &QueueConfig) {
        let prev = self.max_concurrent;

        if self.memory_pressure > config.pressure_high_mark {
            self.max_concurrent = self
                .max_concurrent
                .saturating_sub(1)
                .max(config.min_concurrent);
        } else if self.memory_pressure < config.pressure_low_mark
            && self.success_count > config.raise_after_successes
        {
            self.max_concurrent = (self.max_concurrent + 1).min(config.max_concurrent);
            self.success_count = 0;
        }

        // Failure-driven reduction is evaluated on every pass, on top of
        // whatever the pressure branch did.
        if self.failure_count >= config.failure_trip {
            self.max_concurrent = self
                .max_concurrent
                .saturating_sub(1)
                .max(config.min_concurrent);
            self.failure_count = 0;
        }

        if prev != self.max_concurrent {
            info!(
                prev,
                now = self.max_concurrent,
                pressure = self.memory_pressure.round(),
                "adjusted concurrency ceiling"
            );
        }
    }
}

/// Handle for one enqueued request.
pub struct Ticket<T> {
    id: RequestId,
    done: oneshot::Receiver<Result<T, OpError>>,
}

impl<T> Ticket<T> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the final settlement of this request, across all retries.
    /// Settles exactly once; a torn-down queue settles as cancelled.
    pub async fn outcome(self) -> Result<T, OpError> {
        self.done.await.unwrap_or_else(|_| Err(OpError::Cancelled))
    }
}

/// Arbitrates concurrent IPFS operations.
///
/// One instance per process, constructed explicitly and shared by handle.
/// Admission is priority-ordered; the number of in-flight operations is
/// bounded by a ceiling the pressure sampler moves between
/// `min_concurrent` and `max_concurrent`; transient failures retry with
/// exponential backoff and a one-step priority raise per attempt.
///
/// Must be created inside a tokio runtime: construction spawns the drain
/// loop and the pressure sampler.
pub struct QueueManager<T: Send + 'static> {
    state: Arc<Mutex<QueueState<T>>>,
    notify: Arc<Notify>,
    config: QueueConfig,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> QueueManager<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self::start(config, None)
    }

    /// Use an injected pressure source instead of the load-based estimate.
    pub fn with_probe(config: QueueConfig, probe: Arc<dyn PressureProbe>) -> Self {
        Self::start(config, Some(probe))
    }

    fn start(config: QueueConfig, probe: Option<Arc<dyn PressureProbe>>) -> Self {
        let state = Arc::new(Mutex::new(QueueState {
            records: HashMap::new(),
            pending: VecDeque::new(),
            handles: HashMap::new(),
            active: 0,
            max_concurrent: config.initial_concurrent,
            memory_pressure: 0.0,
            success_count: 0,
            failure_count: 0,
        }));
        let notify = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let drain = tokio::spawn(drain_loop(
            Arc::clone(&state),
            Arc::clone(&notify),
            config.clone(),
            shutdown_rx.clone(),
        ));
        let sampler = tokio::spawn(sampler_loop(
            Arc::clone(&state),
            probe,
            config.clone(),
            shutdown_rx,
        ));

        Self {
            state,
            notify,
            config,
            shutdown_tx,
            joins: vec![drain, sampler],
        }
    }

    /// Queue an operation and hand back its ticket.
    ///
    /// The closure is invoked once per attempt; its result settles the
    /// ticket unless the failure was transient and retries remain.
    /// Non-urgent uploads under severe memory pressure are admitted late
    /// (load shedding); the caller is not blocked by the deferral.
    pub async fn enqueue<F, Fut>(&self, op: F, priority: Priority, op_type: OpType) -> Ticket<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, OpError>> + Send + 'static,
    {
        let op: OpFn<T> = Arc::new(move || Box::pin(op()));
        let (done_tx, done_rx) = oneshot::channel();
        let id = RequestId::generate();
        let record = RequestRecord::new(id, op_type.clone(), priority);

        let mut st = self.state.lock().await;
        let shed = st.memory_pressure > self.config.shed_mark
            && op_type == OpType::Upload
            && priority.get() > self.config.shed_priority_floor;

        st.records.insert(id, record);
        st.handles.insert(id, OpHandle { op, done: done_tx });

        if shed {
            drop(st);
            debug!(id = %id, %priority, "deferring admission under memory pressure");
            let state = Arc::clone(&self.state);
            let notify = Arc::clone(&self.notify);
            let delay = self.config.shed_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                let mut st = state.lock().await;
                if st.records.contains_key(&id) {
                    st.insert_by_priority(id);
                    drop(st);
                    notify.notify_one();
                }
            });
        } else {
            st.insert_by_priority(id);
            drop(st);
            debug!(id = %id, op = %op_type, %priority, "enqueued");
            self.notify.notify_one();
        }

        Ticket { id, done: done_rx }
    }

    /// Cancel every request still waiting for admission. Returns how many
    /// were cleared. In-flight requests, and requests waiting out a retry
    /// backoff, are untouched.
    pub async fn clear_queue(&self) -> usize {
        let mut st = self.state.lock().await;
        let ids: Vec<RequestId> = st.pending.drain(..).collect();
        for id in &ids {
            if let Some(mut rec) = st.records.remove(id) {
                rec.cancel();
                debug!(id = %rec.id, op = %rec.op_type, "cancelled before start");
            }
            if let Some(handle) = st.handles.remove(id) {
                let _ = handle.done.send(Err(OpError::Cancelled));
            }
        }
        drop(st);
        if !ids.is_empty() {
            info!(cleared = ids.len(), "cleared pending queue");
        }
        ids.len()
    }

    /// Snapshot of every live request.
    pub async fn request_status(&self) -> Vec<RequestStatusView> {
        self.state.lock().await.status_views()
    }

    pub async fn counts_by_state(&self) -> QueueCounts {
        let st = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for rec in st.records.values() {
            match rec.state {
                RequestState::Queued => counts.queued += 1,
                RequestState::Processing => counts.processing += 1,
                RequestState::Requeued => counts.requeued += 1,
                // Terminal records leave the map.
                RequestState::Completed | RequestState::Failed | RequestState::Cancelled => {}
            }
        }
        counts
    }

    /// Aggregate view for a health endpoint.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let st = self.state.lock().await;
        QueueSnapshot {
            queue_len: st.pending.len(),
            active: st.active,
            memory_pressure: st.memory_pressure,
            max_concurrent: st.max_concurrent,
            requests: st.status_views(),
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active
    }

    pub async fn memory_pressure(&self) -> f64 {
        self.state.lock().await.memory_pressure
    }

    pub async fn max_concurrent(&self) -> usize {
        self.state.lock().await.max_concurrent
    }

    /// Stop admitting work. In-flight operations still run to completion.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

/// Delay before re-checking for a free slot, stretched by memory pressure
/// and capped at 200ms. A freed slot wakes the loop early via `Notify`.
fn slot_backoff(pressure: f64) -> Duration {
    let ms = (50.0 * 1.5_f64.powf(pressure / 20.0)).min(200.0);
    Duration::from_millis(ms as u64)
}

enum Step<T> {
    Admit(RequestId, OpHandle<T>),
    Wait(Option<Duration>),
    Skip,
}

/// The single drain loop: admits pending requests up to the ceiling.
///
/// Admitted operations run in their own spawned task; the loop never awaits
/// a completion, only slot availability.
async fn drain_loop<T: Send + 'static>(
    state: Arc<Mutex<QueueState<T>>>,
    notify: Arc<Notify>,
    config: QueueConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let step = {
            let mut st = state.lock().await;
            if st.pending.is_empty() {
                Step::Wait(None)
            } else if st.active >= st.max_concurrent {
                Step::Wait(Some(slot_backoff(st.memory_pressure)))
            } else {
                let skip_bulk = st.memory_pressure > config.bulk_skip_mark;
                match st.select_next(skip_bulk) {
                    Some(id) => match st.handles.remove(&id) {
                        Some(handle) => {
                            if let Some(rec) = st.records.get_mut(&id) {
                                rec.start();
                            }
                            st.active += 1;
                            Step::Admit(id, handle)
                        }
                        None => {
                            // Orphaned id; drop its record and move on.
                            st.records.remove(&id);
                            Step::Skip
                        }
                    },
                    None => Step::Wait(None),
                }
            }
        };

        match step {
            Step::Admit(id, handle) => {
                debug!(id = %id, "admitted");
                tokio::spawn(run_operation(
                    id,
                    handle,
                    Arc::clone(&state),
                    Arc::clone(&notify),
                    config.retry.clone(),
                ));
            }
            Step::Wait(Some(delay)) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = sleep(delay) => {}
                    res = shutdown_rx.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            Step::Wait(None) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    res = shutdown_rx.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            Step::Skip => {}
        }
    }
}

/// One attempt of one operation, and what follows from its result.
async fn run_operation<T: Send + 'static>(
    id: RequestId,
    handle: OpHandle<T>,
    state: Arc<Mutex<QueueState<T>>>,
    notify: Arc<Notify>,
    policy: RetryPolicy,
) {
    let result = (handle.op)().await;

    match result {
        Ok(value) => {
            let mut st = state.lock().await;
            st.active -= 1;
            st.success_count += 1;
            if let Some(mut rec) = st.records.remove(&id) {
                rec.complete();
                debug!(
                    id = %id,
                    op = %rec.op_type,
                    elapsed_ms = rec.process_time().map(|d| d.as_millis() as u64),
                    "operation completed"
                );
            }
            drop(st);
            let _ = handle.done.send(Ok(value));
            notify.notify_one();
        }
        Err(err) => {
            let mut st = state.lock().await;
            st.active -= 1;
            st.failure_count += 1;

            let retries_so_far = st.records.get(&id).map_or(0, |r| r.retry_count);
            if err.is_transient() && retries_so_far < policy.max_retries {
                if let Some(rec) = st.records.get_mut(&id) {
                    rec.requeue_pending(err.to_string());
                }
                let retry = retries_so_far + 1;
                let delay = policy.next_delay(retry);
                drop(st);
                warn!(
                    id = %id,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, requeuing"
                );
                notify.notify_one();
                tokio::spawn(reinsert_after(delay, id, handle, state, notify));
            } else {
                if let Some(mut rec) = st.records.remove(&id) {
                    rec.fail(err.to_string());
                }
                drop(st);
                warn!(id = %id, error = %err, "operation failed");
                let _ = handle.done.send(Err(err));
                notify.notify_one();
            }
        }
    }
}

/// After the backoff, put a requeued request back in the pending queue,
/// one priority step more urgent.
async fn reinsert_after<T: Send + 'static>(
    delay: Duration,
    id: RequestId,
    handle: OpHandle<T>,
    state: Arc<Mutex<QueueState<T>>>,
    notify: Arc<Notify>,
) {
    sleep(delay).await;

    let mut st = state.lock().await;
    let present = if let Some(rec) = st.records.get_mut(&id) {
        rec.requeue();
        true
    } else {
        false
    };
    if present {
        st.handles.insert(id, handle);
        st.insert_by_priority(id);
        drop(st);
        notify.notify_one();
    } else {
        // Record vanished while we slept; settle rather than drop silently.
        drop(st);
        let _ = handle.done.send(Err(OpError::Cancelled));
    }
}

/// Periodic pressure sample plus, when adaptive mode is on, the
/// concurrency adjustment step.
async fn sampler_loop<T: Send + 'static>(
    state: Arc<Mutex<QueueState<T>>>,
    probe: Option<Arc<dyn PressureProbe>>,
    config: QueueConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.sampler_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = shutdown_rx.changed() => {
                if res.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let mut st = state.lock().await;
        st.memory_pressure = match probe.as_ref().and_then(|p| p.sample()) {
            Some(p) => p.clamp(0.0, 100.0),
            None => fallback_pressure(st.pending.len(), st.active, st.max_concurrent),
        };
        if config.adaptive {
            st.adjust_concurrency(&config);
        }
    }
}
