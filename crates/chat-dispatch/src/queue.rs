//! Bucketed dispatch queue
//!
//! One ordered worker per bucket. Callers hand a [`Dispatchable`] to
//! [`DispatchQueue::enqueue`] and await its outcome; the worker holds the
//! request until the bucket has quota, performs it, feeds the response's quota
//! headers back into the gate and re-sends on quota-exceeded responses.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bucket::Bucket;
use crate::error::DispatchError;
use crate::gate::BucketGate;
use crate::headers::RateLimitInfo;

/// Result of one performed request
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub status: u16,
    pub body: Bytes,
    pub rate_limit: Option<RateLimitInfo>,
}

impl DispatchOutcome {
    /// Outcome of a fire-and-forget send (gateway frames)
    #[must_use]
    pub fn sent() -> Self {
        Self {
            status: 200,
            ..Default::default()
        }
    }
}

/// A request the queue can perform, possibly more than once
#[async_trait]
pub trait Dispatchable: Send + 'static {
    async fn dispatch(&mut self) -> Result<DispatchOutcome, DispatchError>;
}

#[async_trait]
impl<F, Fut> Dispatchable for F
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<DispatchOutcome, DispatchError>> + Send + 'static,
{
    async fn dispatch(&mut self) -> Result<DispatchOutcome, DispatchError> {
        (self)().await
    }
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Shard that owns the request; cleared by [`DispatchQueue::clear_shard`]
    pub owner: Option<u32>,
    /// Skip the bucket entirely (heartbeats)
    pub ignore_quota: bool,
    /// Abandon the request while it is still waiting
    pub cancel: Option<CancellationToken>,
}

impl EnqueueOptions {
    #[must_use]
    pub fn owned_by(shard_id: u32) -> Self {
        Self {
            owner: Some(shard_id),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn ignore_quota(mut self) -> Self {
        self.ignore_quota = true;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Published whenever a request hits a quota-exceeded response
#[derive(Debug, Clone)]
pub struct RateLimitNotice {
    pub bucket: Bucket,
    pub retry_after: Duration,
    pub global: bool,
    /// 1 for the first quota-exceeded response of this request
    pub attempt: u32,
}

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Quota-exceeded re-sends before the error reaches the caller
    pub max_retries: u32,
    /// Frames per window for each shard's gateway bucket
    pub gateway_quota: u32,
    pub gateway_window: Duration,
    /// Identify frames are limited to one per cool-down per slot
    pub identify_cooldown: Duration,
    /// A route bucket worker with nothing queued exits after this long
    pub worker_idle: Duration,
    pub notice_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            gateway_quota: 120,
            gateway_window: Duration::from_secs(60),
            identify_cooldown: Duration::from_secs(5),
            worker_idle: Duration::from_secs(300),
            notice_capacity: 64,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn from_config(
        dispatch: &chat_common::DispatchConfig,
        shards: &chat_common::ShardConfig,
    ) -> Self {
        Self {
            max_retries: dispatch.max_retries,
            gateway_quota: dispatch.gateway_quota,
            gateway_window: dispatch.gateway_window(),
            identify_cooldown: shards.identify_cooldown(),
            ..Default::default()
        }
    }

    fn gate_for(&self, bucket: &Bucket) -> BucketGate {
        match bucket {
            Bucket::Route(_) => BucketGate::reactive(),
            Bucket::GatewayIdentify { .. } => BucketGate::preemptive(1, self.identify_cooldown),
            Bucket::Gateway { .. } => {
                BucketGate::preemptive(self.gateway_quota, self.gateway_window)
            }
        }
    }
}

type Reply = oneshot::Sender<Result<DispatchOutcome, DispatchError>>;

struct Job {
    request: Box<dyn Dispatchable>,
    owner: Option<u32>,
    epoch: u64,
    cancel: Option<CancellationToken>,
    reply: Reply,
}

/// Registry entry for a running bucket worker
struct Worker {
    id: u64,
    tx: mpsc::UnboundedSender<Job>,
}

type Workers = DashMap<Bucket, Worker>;

/// State shared between the queue handle and its workers
struct Shared {
    config: QueueConfig,
    workers: Workers,
    next_worker: AtomicU64,
    epochs: DashMap<u32, u64>,
    global_until: Mutex<Option<Instant>>,
    notices: broadcast::Sender<RateLimitNotice>,
}

impl Shared {
    fn epoch(&self, owner: Option<u32>) -> u64 {
        owner
            .and_then(|shard| self.epochs.get(&shard).map(|e| *e))
            .unwrap_or(0)
    }

    fn is_stale(&self, owner: Option<u32>, epoch: u64) -> bool {
        owner.is_some() && self.epoch(owner) != epoch
    }

    /// Take one send from the bucket, honouring a global pause for routes
    fn acquire(
        &self,
        bucket: &Bucket,
        gate: &mut BucketGate,
        now: Instant,
    ) -> Result<(), Duration> {
        if bucket.is_route() {
            let global = self
                .global_until
                .lock()
                .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
            if !global.is_zero() {
                return Err(global);
            }
        }
        gate.acquire(now)
    }

    fn block_global(&self, until: Instant) {
        let mut global = self.global_until.lock();
        if global.map_or(true, |current| current < until) {
            *global = Some(until);
        }
    }
}

/// Single choke point for every outbound request
#[derive(Clone)]
pub struct DispatchQueue {
    shared: Arc<Shared>,
    closed: Arc<AtomicBool>,
}

impl DispatchQueue {
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                workers: DashMap::new(),
                next_worker: AtomicU64::new(0),
                epochs: DashMap::new(),
                global_until: Mutex::new(None),
                notices,
            }),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Perform `request` once `bucket` has quota
    pub async fn enqueue<R>(
        &self,
        bucket: Bucket,
        request: R,
        options: EnqueueOptions,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        R: Dispatchable,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }

        if options.ignore_quota {
            let mut request = request;
            return match options.cancel {
                Some(token) => tokio::select! {
                    result = request.dispatch() => result,
                    () = token.cancelled() => Err(DispatchError::Cancelled),
                },
                None => request.dispatch().await,
            };
        }

        let (reply, response) = oneshot::channel();
        let mut job = Job {
            request: Box::new(request),
            owner: options.owner,
            epoch: self.shared.epoch(options.owner),
            cancel: options.cancel,
            reply,
        };

        // A worker retiring between lookup and send closes its channel;
        // the second lookup spawns a fresh one
        for _ in 0..2 {
            match self.sender_for(&bucket).send(job) {
                Ok(()) => return response.await.map_err(|_| DispatchError::Closed)?,
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
        }
        Err(DispatchError::Closed)
    }

    /// Discard every queued-but-unsent request owned by `shard_id`.
    ///
    /// Returns immediately; discarded requests resolve to `Cancelled`.
    pub fn clear_shard(&self, shard_id: u32) {
        *self.shared.epochs.entry(shard_id).or_insert(0) += 1;
        // The next connection starts with a fresh frame quota
        self.shared.workers.remove(&Bucket::Gateway { shard_id });
        tracing::debug!(shard_id, "Cleared queued gateway frames");
    }

    /// Receive a notice for every quota-exceeded response
    pub fn subscribe_notices(&self) -> broadcast::Receiver<RateLimitNotice> {
        self.shared.notices.subscribe()
    }

    /// Number of live bucket workers
    pub fn bucket_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Reject new requests and let workers drain
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.workers.clear();
    }

    fn sender_for(&self, bucket: &Bucket) -> mpsc::UnboundedSender<Job> {
        if let Some(worker) = self.shared.workers.get(bucket) {
            if !worker.tx.is_closed() {
                return worker.tx.clone();
            }
        }

        let mut entry = self
            .shared
            .workers
            .entry(bucket.clone())
            .or_insert_with(|| spawn_worker(&self.shared, bucket.clone()));
        if entry.tx.is_closed() {
            *entry = spawn_worker(&self.shared, bucket.clone());
        }
        entry.tx.clone()
    }
}

fn spawn_worker(shared: &Arc<Shared>, bucket: Bucket) -> Worker {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = shared.next_worker.fetch_add(1, Ordering::Relaxed);
    let gate = shared.config.gate_for(&bucket);
    tokio::spawn(run_worker(Arc::clone(shared), id, bucket, gate, rx));
    Worker { id, tx }
}

async fn run_worker(
    shared: Arc<Shared>,
    id: u64,
    bucket: Bucket,
    mut gate: BucketGate,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    tracing::debug!(bucket = %bucket, "Bucket worker started");
    // Gateway buckets are bounded per shard and keep their quota state
    let retires = bucket.is_route();
    let idle = shared.config.worker_idle;

    loop {
        let job = if retires {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(job) => job,
                Err(_) if gate.is_blocked(Instant::now()) => continue,
                Err(_) => {
                    shared.workers.remove_if(&bucket, |_, worker| worker.id == id);
                    rx.close();
                    // Jobs sent before the close still get served
                    while let Some(job) = rx.recv().await {
                        process(&shared, &bucket, &mut gate, job).await;
                    }
                    tracing::debug!(bucket = %bucket, "Idle bucket worker retired");
                    return;
                }
            }
        } else {
            rx.recv().await
        };

        match job {
            Some(job) => process(&shared, &bucket, &mut gate, job).await,
            None => break,
        }
    }

    tracing::debug!(bucket = %bucket, "Bucket worker stopped");
}

async fn process(shared: &Shared, bucket: &Bucket, gate: &mut BucketGate, job: Job) {
    let Job {
        mut request,
        owner,
        epoch,
        cancel,
        reply,
    } = job;

    let mut attempts = 0u32;
    let result = loop {
        let cancelled = cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        if cancelled || reply.is_closed() || shared.is_stale(owner, epoch) {
            break Err(DispatchError::Cancelled);
        }

        if let Err(wait) = shared.acquire(bucket, gate, Instant::now()) {
            tracing::trace!(
                bucket = %bucket,
                wait_ms = wait.as_millis() as u64,
                "Waiting for quota"
            );
            if !sleep_or_cancel(wait, cancel.as_ref()).await {
                break Err(DispatchError::Cancelled);
            }
            continue;
        }

        match request.dispatch().await {
            Ok(outcome) => {
                if let Some(info) = &outcome.rate_limit {
                    gate.observe(info, Instant::now());
                }
                break Ok(outcome);
            }
            Err(DispatchError::QuotaExceeded { retry_after, global }) => {
                attempts += 1;
                let until = Instant::now() + retry_after;
                if global {
                    shared.block_global(until);
                } else {
                    gate.block_until(until);
                }

                tracing::warn!(
                    bucket = %bucket,
                    retry_after_ms = retry_after.as_millis() as u64,
                    global,
                    attempt = attempts,
                    "Rate limited"
                );
                let _ = shared.notices.send(RateLimitNotice {
                    bucket: bucket.clone(),
                    retry_after,
                    global,
                    attempt: attempts,
                });

                if attempts > shared.config.max_retries {
                    break Err(DispatchError::QuotaExceeded { retry_after, global });
                }
            }
            Err(e) => break Err(e),
        }
    };

    let _ = reply.send(result);
}

/// Sleep for `wait`; false when cancelled first
async fn sleep_or_cancel(wait: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            () = tokio::time::sleep(wait) => true,
            () = token.cancelled() => false,
        },
        None => {
            tokio::time::sleep(wait).await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Method;
    use std::sync::atomic::AtomicU32;

    fn route(major: u64) -> Bucket {
        Bucket::route(Method::Get, "/channels/{channel_id}", &[major])
    }

    fn sent() -> Result<DispatchOutcome, DispatchError> {
        Ok(DispatchOutcome::sent())
    }

    fn limited(retry_after: Duration, global: bool) -> Result<DispatchOutcome, DispatchError> {
        Err(DispatchError::QuotaExceeded {
            retry_after,
            global,
        })
    }

    fn with_headers(
        remaining: u32,
        reset_after: Duration,
    ) -> Result<DispatchOutcome, DispatchError> {
        Ok(DispatchOutcome {
            status: 200,
            body: Bytes::new(),
            rate_limit: Some(RateLimitInfo {
                limit: Some(5),
                remaining: Some(remaining),
                reset_after: Some(reset_after),
                ..Default::default()
            }),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_bucket_waits_for_reset() {
        let queue = DispatchQueue::new(QueueConfig::default());
        let reset = Duration::from_millis(1500);

        queue
            .enqueue(
                route(1),
                move || async move { with_headers(0, reset) },
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let enqueued_at = Instant::now();
        let dispatched_at = Arc::new(Mutex::new(None));
        let recorder = dispatched_at.clone();
        queue
            .enqueue(
                route(1),
                move || {
                    let recorder = recorder.clone();
                    async move {
                        *recorder.lock() = Some(Instant::now());
                        sent()
                    }
                },
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let dispatched_at = dispatched_at.lock().unwrap();
        assert!(dispatched_at >= enqueued_at + reset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_buckets_not_blocked() {
        let queue = DispatchQueue::new(QueueConfig::default());
        queue
            .enqueue(
                route(1),
                || async { with_headers(0, Duration::from_secs(30)) },
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let start = Instant::now();
        queue
            .enqueue(route(2), || async { sent() }, EnqueueOptions::default())
            .await
            .unwrap();
        assert!(Instant::now() - start < Duration::from_secs(1));
        assert_eq!(queue.bucket_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exceeded_is_retried_and_noticed() {
        let queue = DispatchQueue::new(QueueConfig::default());
        let mut notices = queue.subscribe_notices();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let start = Instant::now();
        let outcome = queue
            .enqueue(
                route(1),
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            limited(Duration::from_secs(2), false)
                        } else {
                            sent()
                        }
                    }
                },
                EnqueueOptions::default(),
            )
            .await;

        assert!(outcome.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(Instant::now() - start >= Duration::from_secs(2));

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.attempt, 1);
        assert_eq!(notice.retry_after, Duration::from_secs(2));
        assert!(!notice.global);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exceeded_surfaces_after_retries() {
        let queue = DispatchQueue::new(QueueConfig {
            max_retries: 2,
            ..Default::default()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = queue
            .enqueue(
                route(1),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        limited(Duration::from_millis(100), false)
                    }
                },
                EnqueueOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(DispatchError::QuotaExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_limit_blocks_every_route() {
        let queue = DispatchQueue::new(QueueConfig {
            max_retries: 0,
            ..Default::default()
        });

        let _ = queue
            .enqueue(
                route(1),
                || async {
                    limited(Duration::from_secs(4), true)
                },
                EnqueueOptions::default(),
            )
            .await;

        let start = Instant::now();
        queue
            .enqueue(route(2), || async { sent() }, EnqueueOptions::default())
            .await
            .unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_in_bucket_keep_order() {
        let queue = DispatchQueue::new(QueueConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(
                        Bucket::Gateway { shard_id: 0 },
                        move || {
                            let order = order.clone();
                            async move {
                                order.lock().push(i);
                                sent()
                            }
                        },
                        EnqueueOptions::owned_by(0),
                    )
                    .await
            }));
            // Let each enqueue land before the next
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_quota_is_preemptive() {
        let queue = DispatchQueue::new(QueueConfig {
            gateway_quota: 2,
            gateway_window: Duration::from_secs(10),
            ..Default::default()
        });

        let start = Instant::now();
        for _ in 0..3 {
            queue
                .enqueue(
                    Bucket::Gateway { shard_id: 0 },
                    || async { sent() },
                    EnqueueOptions::owned_by(0),
                )
                .await
                .unwrap();
        }
        // Two go out at once, the third waits for one replenishment
        assert!(Instant::now() - start >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ignores_quota() {
        let queue = DispatchQueue::new(QueueConfig {
            gateway_quota: 1,
            gateway_window: Duration::from_secs(60),
            ..Default::default()
        });
        queue
            .enqueue(
                Bucket::Gateway { shard_id: 0 },
                || async { sent() },
                EnqueueOptions::owned_by(0),
            )
            .await
            .unwrap();

        let start = Instant::now();
        queue
            .enqueue(
                Bucket::Gateway { shard_id: 0 },
                || async { sent() },
                EnqueueOptions::owned_by(0).ignore_quota(),
            )
            .await
            .unwrap();
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_shard_discards_only_that_shard() {
        let queue = DispatchQueue::new(QueueConfig {
            gateway_quota: 1,
            gateway_window: Duration::from_secs(60),
            ..Default::default()
        });
        let count = Arc::new(AtomicU32::new(0));

        for shard_id in [0, 1] {
            let count = count.clone();
            queue
                .enqueue(
                    Bucket::Gateway { shard_id },
                    move || {
                        count.fetch_add(1, Ordering::SeqCst);
                        async { sent() }
                    },
                    EnqueueOptions::owned_by(shard_id),
                )
                .await
                .unwrap();
        }

        // Both buckets are now drained for a minute
        let pending = |shard_id: u32| {
            let queue = queue.clone();
            let count = count.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(
                        Bucket::Gateway { shard_id },
                        move || {
                            count.fetch_add(1, Ordering::SeqCst);
                            async { sent() }
                        },
                        EnqueueOptions::owned_by(shard_id),
                    )
                    .await
            })
        };
        let shard0 = pending(0);
        let shard1 = pending(1);
        tokio::task::yield_now().await;

        queue.clear_shard(0);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(matches!(shard0.await.unwrap(), Err(DispatchError::Cancelled)));
        assert!(shard1.await.unwrap().is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let queue = DispatchQueue::new(QueueConfig::default());
        queue
            .enqueue(
                route(1),
                || async { with_headers(0, Duration::from_secs(30)) },
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let token = CancellationToken::new();
        let waiting = {
            let queue = queue.clone();
            let token = token.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(
                        route(1),
                        || async { sent() },
                        EnqueueOptions::default().with_cancel(token),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        token.cancel();

        assert!(matches!(waiting.await.unwrap(), Err(DispatchError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_route_workers_retire() {
        let queue = DispatchQueue::new(QueueConfig {
            worker_idle: Duration::from_secs(60),
            ..Default::default()
        });
        for channel_id in 0..50 {
            queue
                .enqueue(route(channel_id), || async { sent() }, EnqueueOptions::default())
                .await
                .unwrap();
        }
        queue
            .enqueue(
                Bucket::Gateway { shard_id: 0 },
                || async { sent() },
                EnqueueOptions::owned_by(0),
            )
            .await
            .unwrap();
        assert_eq!(queue.bucket_count(), 51);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(queue.bucket_count(), 1);

        // A retired bucket is served by a fresh worker
        queue
            .enqueue(route(3), || async { sent() }, EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(queue.bucket_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_route_worker_outlives_idle() {
        let queue = DispatchQueue::new(QueueConfig {
            worker_idle: Duration::from_secs(60),
            ..Default::default()
        });
        queue
            .enqueue(
                route(1),
                || async { with_headers(0, Duration::from_secs(600)) },
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(queue.bucket_count(), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(queue.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = DispatchQueue::new(QueueConfig::default());
        queue.close();
        let result = queue
            .enqueue(route(1), || async { sent() }, EnqueueOptions::default())
            .await;
        assert!(matches!(result, Err(DispatchError::Closed)));
    }
}
