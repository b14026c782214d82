//! Event bus
//!
//! Every event goes to a broadcast stream for `subscribe()` callers and, in
//! order, through a handler worker that runs the registered handlers one at
//! a time. Each shard has its own worker, so a slow handler only holds back
//! later events of the same shard; events with no shard share a global
//! worker. A handler that runs past the configured threshold is logged but
//! never cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};

use chat_common::EventConfig;

use crate::events::BotEvent;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BotEvent);
}

/// Adapter for async closures
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(BotEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, event: &BotEvent) {
        (self.0)(event.clone()).await;
    }
}

type Handlers = Arc<RwLock<Vec<Arc<dyn EventHandler>>>>;

/// Handler worker an event is queued on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lane {
    Global,
    Shard(u32),
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    stream: broadcast::Sender<BotEvent>,
    handlers: Handlers,
    /// Workers are spawned on the first event of their lane
    lanes: Mutex<HashMap<Lane, mpsc::Sender<BotEvent>>>,
    capacity: usize,
    slow_handler_warn: Duration,
}

impl EventBus {
    pub fn new(config: &EventConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (stream, _) = broadcast::channel(capacity);

        Self {
            inner: Arc::new(BusInner {
                stream,
                handlers: Arc::new(RwLock::new(Vec::new())),
                lanes: Mutex::new(HashMap::new()),
                capacity,
                slow_handler_warn: config.slow_handler_warn(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.inner.stream.subscribe()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.inner.handlers.write().push(handler);
    }

    /// Register an async closure as a handler
    pub fn on<F, Fut>(&self, handler: F)
    where
        F: Fn(BotEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_handler(Arc::new(FnHandler(handler)));
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Deliver an event that belongs to no shard
    pub async fn publish(&self, event: BotEvent) {
        self.deliver(Lane::Global, event).await;
    }

    /// Deliver an event in order with the rest of `shard_id`'s events
    pub async fn publish_from(&self, shard_id: u32, event: BotEvent) {
        self.deliver(Lane::Shard(shard_id), event).await;
    }

    /// Waits when the lane's handler queue is full
    async fn deliver(&self, lane: Lane, event: BotEvent) {
        tracing::trace!(event = event.name(), lane = ?lane, "Publishing event");
        // No subscribers is fine
        let _ = self.inner.stream.send(event.clone());

        if self.handler_count() == 0 {
            return;
        }
        let worker = self.worker(lane);
        if worker.send(event).await.is_err() {
            tracing::warn!(lane = ?lane, "Event handler worker stopped");
        }
    }

    fn worker(&self, lane: Lane) -> mpsc::Sender<BotEvent> {
        let mut lanes = self.inner.lanes.lock();
        lanes
            .entry(lane)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.inner.capacity);
                tokio::spawn(run_handlers(
                    rx,
                    Arc::clone(&self.inner.handlers),
                    self.inner.slow_handler_warn,
                ));
                tracing::debug!(lane = ?lane, "Event handler worker started");
                tx
            })
            .clone()
    }
}

async fn run_handlers(mut rx: mpsc::Receiver<BotEvent>, handlers: Handlers, slow: Duration) {
    while let Some(event) = rx.recv().await {
        let snapshot: Vec<Arc<dyn EventHandler>> = handlers.read().clone();
        for handler in snapshot {
            let mut call = handler.handle(&event);
            if tokio::time::timeout(slow, &mut call).await.is_err() {
                tracing::warn!(
                    event = event.name(),
                    threshold_ms = slow.as_millis() as u64,
                    "Event handler is running slowly"
                );
                call.await;
            }
        }
    }
}
