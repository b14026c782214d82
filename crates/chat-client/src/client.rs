//! Bot client
//!
//! Ties the pieces together: login fetches the gateway bootstrap and builds
//! the shard coordinator, one pump task per shard applies dispatches to the
//! session cache and then publishes them on that shard's lane of the event
//! bus.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chat_cache::SessionCache;
use chat_common::{ClientConfig, Credentials, StartupFetchMode, TokenKind};
use chat_core::{EventType, Snowflake};
use chat_dispatch::{DispatchQueue, QueueConfig, RateLimitNotice};
use chat_gateway::{
    ConnectionConfig, ConnectionState, CoordinatorConfig, DispatchEvent, ShardCoordinator,
    ShardEvent,
};
use chat_rest::{RestClient, SessionStartLimit};

use crate::bus::{EventBus, EventHandler};
use crate::error::{ClientError, ClientResult};
use crate::events::BotEvent;
use crate::fetcher::RestGuildFetcher;

/// Everything that lives between login and logout
struct Session {
    rest: RestClient,
    queue: DispatchQueue,
    cache: Arc<SessionCache>,
    coordinator: Arc<ShardCoordinator>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

pub struct BotClient {
    config: ClientConfig,
    bus: EventBus,
    session: Mutex<Option<Session>>,
}

impl BotClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            bus: EventBus::new(&config.events),
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // === Events ===

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.bus.subscribe()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.bus.add_handler(handler);
    }

    pub fn on<F, Fut>(&self, handler: F)
    where
        F: Fn(BotEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.bus.on(handler);
    }

    // === Session ===

    /// Fetch the gateway bootstrap and prepare the shards
    ///
    /// Waits for the identify budget to reset when it is exhausted. Shards
    /// are not connected until [`start`](Self::start).
    pub async fn login(
        &self,
        app_id: impl Into<String>,
        kind: TokenKind,
        token: impl Into<String>,
    ) -> ClientResult<()> {
        if self.session.lock().is_some() {
            return Err(ClientError::AlreadyLoggedIn);
        }

        let credentials = Credentials::new(app_id, kind, token);
        let queue = DispatchQueue::new(QueueConfig::from_config(
            &self.config.dispatch,
            &self.config.shards,
        ));
        let rest = RestClient::new(&self.config.rest, &credentials, queue.clone())?;

        let bot = rest.gateway_bot().await?;
        let limit = bot.session_start_limit;
        tracing::info!(
            url = %bot.url,
            recommended_shards = bot.shards,
            remaining = limit.remaining,
            max_concurrency = ?limit.max_concurrency,
            "Gateway bootstrap fetched"
        );
        if limit.is_exhausted() {
            tracing::warn!(
                reset_after_ms = limit.reset_after,
                "Identify budget exhausted, waiting for reset"
            );
            tokio::time::sleep(limit.reset_after()).await;
        }

        let total_shards = self.config.shards.total_shards.unwrap_or(bot.shards).max(1);
        let fetcher = Arc::new(RestGuildFetcher::new(rest.clone()));
        let cache = Arc::new(
            SessionCache::new(self.config.cache.clone(), total_shards).with_fetcher(fetcher),
        );

        let (coordinator, receivers) = ShardCoordinator::new(
            CoordinatorConfig {
                total_shards,
                shard_ids: self.config.shards.shard_ids.clone(),
                max_concurrency: self.config.shards.identify_max_concurrency,
                identify_cooldown: self.config.shards.identify_cooldown(),
                connection: ConnectionConfig::from_config(
                    bot.url,
                    credentials.authorization(),
                    &self.config.gateway,
                ),
            },
            queue.clone(),
            cache.subscribe_populated(),
        );
        if let Some(advertised) = advertised_concurrency(&limit) {
            coordinator.set_max_concurrency(advertised);
        }

        let cancel = CancellationToken::new();
        let pump = Arc::new(Pump {
            cache: Arc::clone(&cache),
            bus: self.bus.clone(),
            readiness: Readiness::new(receivers.len()),
            cancel: cancel.clone(),
        });
        let mut tasks: Vec<JoinHandle<()>> = receivers
            .into_iter()
            .map(|events| tokio::spawn(Arc::clone(&pump).run(events)))
            .collect();
        tasks.push(tokio::spawn(forward_notices(
            queue.subscribe_notices(),
            self.bus.clone(),
            cancel.clone(),
        )));

        let hosted = coordinator.managers().len();
        let mut slot = self.session.lock();
        if slot.is_some() {
            cancel.cancel();
            queue.close();
            return Err(ClientError::AlreadyLoggedIn);
        }
        *slot = Some(Session {
            rest,
            queue,
            cache,
            coordinator: Arc::new(coordinator),
            tasks,
            cancel,
        });

        tracing::info!(total_shards, hosted, "Logged in");
        Ok(())
    }

    /// Connect every shard; progress is reported through events
    pub fn start(&self) -> ClientResult<()> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(ClientError::NotLoggedIn)?;
        session.coordinator.start();
        Ok(())
    }

    /// Disconnect every shard; each reports `Disconnected` once down
    pub fn stop(&self) -> ClientResult<()> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(ClientError::NotLoggedIn)?;
        session.coordinator.stop();
        Ok(())
    }

    /// Stop the shards, deliver their final events and drop the session
    pub async fn logout(&self) -> ClientResult<()> {
        let session = self
            .session
            .lock()
            .take()
            .ok_or(ClientError::NotLoggedIn)?;

        session.coordinator.stop();
        session.coordinator.wait_stopped().await;
        session.cancel.cancel();
        for task in session.tasks {
            let _ = task.await;
        }
        session.queue.close();

        tracing::info!("Logged out");
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.lock().is_some()
    }

    // === Accessors ===

    pub fn cache(&self) -> Option<Arc<SessionCache>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.cache))
    }

    pub fn rest(&self) -> Option<RestClient> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.rest.clone())
    }

    pub fn coordinator(&self) -> Option<Arc<ShardCoordinator>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.coordinator))
    }

    pub fn shard_states(&self) -> Vec<(u32, ConnectionState)> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.coordinator.states())
            .unwrap_or_default()
    }

    /// Mean heartbeat latency over all shards
    pub fn latency(&self) -> Option<Duration> {
        self.session
            .lock()
            .as_ref()
            .and_then(|session| session.coordinator.average_latency())
    }

    pub fn shard_for_guild(&self, guild_id: Snowflake) -> Option<u32> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.coordinator.shard_for_guild(guild_id))
    }
}

/// Tracks which hosted shards have seen READY
struct Readiness {
    hosted: usize,
    state: Mutex<ReadyState>,
}

#[derive(Default)]
struct ReadyState {
    shards: HashSet<u32>,
    fired: bool,
}

impl Readiness {
    fn new(hosted: usize) -> Self {
        Self {
            hosted,
            state: Mutex::new(ReadyState::default()),
        }
    }

    /// `true` exactly once, when the last hosted shard becomes ready
    fn shard_ready(&self, shard_id: u32) -> bool {
        let mut state = self.state.lock();
        state.shards.insert(shard_id);
        if state.fired || state.shards.len() < self.hosted {
            return false;
        }
        state.fired = true;
        true
    }
}

/// Per-shard event processing shared by the pump tasks
struct Pump {
    cache: Arc<SessionCache>,
    bus: EventBus,
    readiness: Readiness,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ShardEvent>) {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                () = self.cancel.cancelled() => {
                    // Deliver what the shard reported before it stopped
                    while let Ok(event) = events.try_recv() {
                        self.handle(event).await;
                    }
                    break;
                }
            }
        }
    }

    async fn handle(self: &Arc<Self>, event: ShardEvent) {
        match event {
            ShardEvent::Dispatch(dispatch) => self.on_dispatch(dispatch).await,
            ShardEvent::LatencyUpdated { shard_id, latency } => {
                self.bus
                    .publish_from(shard_id, BotEvent::LatencyUpdated { shard_id, latency })
                    .await;
            }
            ShardEvent::SessionInvalidated { shard_id } => {
                tracing::debug!(shard_id, "Session invalidated, clearing recent message ids");
                self.cache.clear_recent_messages();
            }
            ShardEvent::Reconnecting { shard_id, reason } => {
                self.bus
                    .publish_from(shard_id, BotEvent::Reconnecting { shard_id, reason })
                    .await;
            }
            ShardEvent::Disconnected { shard_id, error } => {
                self.bus
                    .publish_from(shard_id, BotEvent::Disconnected { shard_id, error })
                    .await;
            }
        }
    }

    async fn on_dispatch(self: &Arc<Self>, dispatch: DispatchEvent) {
        let DispatchEvent {
            shard_id,
            sequence,
            event_type,
            payload,
        } = dispatch;

        match self.cache.apply(&event_type, &payload).await {
            Ok(events) => {
                for event in events {
                    self.bus.publish_from(shard_id, BotEvent::Entity(event)).await;
                }
            }
            Err(err) => {
                tracing::warn!(
                    shard_id,
                    sequence = ?sequence,
                    event_type = %event_type,
                    error = %err,
                    "Dispatch dropped"
                );
            }
        }

        match EventType::from_str(&event_type) {
            Some(EventType::Ready) => self.on_shard_ready(shard_id).await,
            Some(EventType::Resumed) => {
                self.bus
                    .publish_from(shard_id, BotEvent::ShardResumed { shard_id })
                    .await;
            }
            _ => {}
        }
    }

    async fn on_shard_ready(self: &Arc<Self>, shard_id: u32) {
        self.bus
            .publish_from(shard_id, BotEvent::ShardReady { shard_id })
            .await;
        if !self.readiness.shard_ready(shard_id) {
            return;
        }

        let mode = self.cache.startup_mode();
        tracing::info!(
            mode = ?mode,
            guilds = self.cache.guild_count(),
            "All shards ready"
        );
        match mode {
            StartupFetchMode::Synchronous => {
                tokio::spawn(Arc::clone(self).populate(true));
            }
            StartupFetchMode::Asynchronous => {
                self.bus.publish_from(shard_id, BotEvent::Ready).await;
                tokio::spawn(Arc::clone(self).populate(false));
            }
            StartupFetchMode::Lazy | StartupFetchMode::Auto => {
                self.cache.mark_populated();
                self.bus.publish_from(shard_id, BotEvent::Ready).await;
            }
        }
    }

    /// Background sweep over guilds that are not yet available
    async fn populate(self: Arc<Self>, ready_after: bool) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = Arc::clone(&self.cache);
        let sweep = async move { cache.populate(&tx).await };
        let forward = async {
            while let Some(event) = rx.recv().await {
                self.bus.publish(BotEvent::Entity(event)).await;
            }
        };

        let failures = tokio::select! {
            (failures, ()) = async { tokio::join!(sweep, forward) } => failures,
            () = self.cancel.cancelled() => return,
        };
        if failures > 0 {
            tracing::warn!(failures, "Some guilds were not fetched; they load on first use");
        }

        self.cache.mark_populated();
        if ready_after {
            self.bus.publish(BotEvent::Ready).await;
        }
    }
}

async fn forward_notices(
    mut notices: broadcast::Receiver<RateLimitNotice>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            notice = notices.recv() => notice,
            () = cancel.cancelled() => break,
        };
        match notice {
            Ok(notice) => bus.publish(BotEvent::RateLimited(notice)).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Rate limit notices lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Slot count the platform advertises, overriding the configured one
fn advertised_concurrency(limit: &SessionStartLimit) -> Option<u32> {
    limit.max_concurrency.filter(|slots| *slots > 0)
}
