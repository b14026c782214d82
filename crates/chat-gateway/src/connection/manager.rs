//! Per-shard connection manager
//!
//! Drives one shard through connect, handshake, steady state and teardown,
//! and reconnects on transient faults until stopped.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use chat_common::GatewayConfig;
use chat_core::payloads::ReadyPayload;
use chat_core::EventType;
use chat_dispatch::DispatchQueue;

use super::backoff::Backoff;
use super::session::{Handshake, SequenceCheck, SessionState};
use super::state::ConnectionState;
use crate::error::GatewayError;
use crate::events::{DispatchEvent, ShardEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::{
    GatewayMessage, HelloPayload, IdentifyPayload, IdentifyProperties, OpCode, ResumePayload,
};
use crate::sender::GatewaySender;
use crate::shard::{IdentifyGate, IdentifyPermit};
use crate::transport::{TransportEvent, WsTransport};

/// Closing with this code keeps the session resumable
const CLOSE_RESUMABLE: u16 = 4000;
const CLOSE_NORMAL: u16 = 1000;

/// Position of a shard in the application's shard set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardInfo {
    pub id: u32,
    pub total: u32,
}

/// Everything a manager needs to open and authenticate a connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Authorization string sent in Identify and Resume
    pub token: String,
    pub intents: u32,
    pub properties: IdentifyProperties,
    pub connect_timeout: Duration,
    pub heartbeat_factor: f64,
    pub heartbeat_grace: Duration,
    pub compress: bool,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl ConnectionConfig {
    /// `url` is the bootstrap URL unless the config overrides the host
    pub fn from_config(
        url: impl Into<String>,
        token: impl Into<String>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            url: config.host_override.clone().unwrap_or_else(|| url.into()),
            token: token.into(),
            intents: config.intents,
            properties: IdentifyProperties::default(),
            connect_timeout: config.connect_timeout(),
            heartbeat_factor: config.heartbeat_factor,
            heartbeat_grace: config.heartbeat_grace(),
            compress: config.compress,
            reconnect_base: Duration::from_millis(config.reconnect_base_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Live pieces of one socket
struct Link {
    transport: WsTransport,
    frames: mpsc::UnboundedReceiver<TransportEvent>,
    hello: HelloPayload,
}

pub struct ConnectionManager {
    shard: ShardInfo,
    config: Arc<ConnectionConfig>,
    queue: DispatchQueue,
    identify_gate: Option<Arc<IdentifyGate>>,
    session: Arc<SessionState>,
    populated: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    latency: Mutex<Option<Duration>>,
    events: mpsc::UnboundedSender<ShardEvent>,
    running: Mutex<Option<Running>>,
}

impl ConnectionManager {
    /// `identify_gate` is only given when the process hosts several shards
    pub fn new(
        shard: ShardInfo,
        config: Arc<ConnectionConfig>,
        queue: DispatchQueue,
        identify_gate: Option<Arc<IdentifyGate>>,
        populated: watch::Receiver<bool>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ShardEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Arc::new(Self {
            shard,
            config,
            queue,
            identify_gate,
            session: Arc::new(SessionState::new()),
            populated,
            state,
            latency: Mutex::new(None),
            events,
            running: Mutex::new(None),
        });
        (manager, receiver)
    }

    pub fn shard(&self) -> ShardInfo {
        self.shard
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Last measured heartbeat round trip
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }

    /// Begin connecting in the background; no-op while already running
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running
            .as_ref()
            .is_some_and(|current| !current.cancel.is_cancelled())
        {
            tracing::debug!(shard_id = self.shard.id, "Shard already running");
            return;
        }

        let previous = running.take().map(|r| r.handle);
        let cancel = CancellationToken::new();
        let manager = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            // A stopping run must finish tearing down first
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            manager.run(token).await;
        });
        *running = Some(Running { cancel, handle });
    }

    /// Close the connection and end the session; completion is reported as
    /// `ShardEvent::Disconnected`
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().as_ref() {
            running.cancel.cancel();
        }
    }

    /// Resolves once the manager is back in `Disconnected` after a run
    pub async fn wait_stopped(&self) {
        let handle = self.running.lock().as_ref().map(|r| r.cancel.clone());
        let Some(cancel) = handle else {
            return;
        };
        cancel.cancelled().await;
        let mut state = self.subscribe_state();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let shard_id = self.shard.id;
        let mut backoff = Backoff::new(self.config.reconnect_base, self.config.reconnect_max);

        let outcome = loop {
            self.set_state(ConnectionState::Connecting);
            let fault = self.connect_once(&cancel, &mut backoff).await;

            match fault {
                GatewayError::Cancelled => break None,
                fault if fault.is_critical() => {
                    tracing::error!(shard_id, error = %fault, "Shard stopped on critical fault");
                    break Some(fault);
                }
                fault => {
                    if fault.clears_session() {
                        self.session.invalidate();
                        self.emit(ShardEvent::SessionInvalidated { shard_id });
                    }
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        shard_id,
                        error = %fault,
                        delay_ms = delay.as_millis() as u64,
                        attempt = backoff.attempts(),
                        "Connection lost, reconnecting"
                    );
                    self.emit(ShardEvent::Reconnecting {
                        shard_id,
                        reason: fault,
                    });
                    tokio::select! {
                        () = cancel.cancelled() => break None,
                        () = sleep(delay) => {}
                    }
                }
            }
        };

        if outcome.is_none() {
            // Stopped on request; the server ends the session on a normal close
            self.session.invalidate();
        }
        self.set_state(ConnectionState::Disconnected);
        cancel.cancel();
        tracing::info!(shard_id, "Shard disconnected");
        self.emit(ShardEvent::Disconnected {
            shard_id,
            error: outcome,
        });
    }

    /// One connection from socket open to teardown; returns why it ended
    async fn connect_once(
        &self,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> GatewayError {
        let shard_id = self.shard.id;
        let handshake = self.session.handshake();

        // Only a fresh Identify waits for a slot, and the wait is not part
        // of the connect timeout
        let permit = match (&handshake, &self.identify_gate) {
            (Handshake::Identify, Some(gate)) => tokio::select! {
                permit = gate.acquire(shard_id) => Some(permit),
                () = cancel.cancelled() => return GatewayError::Cancelled,
            },
            _ => None,
        };

        let deadline = Instant::now() + self.config.connect_timeout;
        let url = self
            .session
            .resume_url()
            .unwrap_or_else(|| self.config.url.clone());

        let opened = tokio::select! {
            () = cancel.cancelled() => return GatewayError::Cancelled,
            opened = timeout_at(deadline, self.open(&url)) => opened,
        };
        let Link {
            transport,
            mut frames,
            hello,
        } = match opened {
            Err(_) => return GatewayError::ConnectTimeout,
            Ok(Err(fault)) => return fault,
            Ok(Ok(link)) => link,
        };
        tracing::debug!(
            shard_id,
            heartbeat_interval = hello.heartbeat_interval,
            "Hello received"
        );

        let send_cancel = cancel.child_token();
        let heartbeat_cancel = cancel.child_token();
        let identify_slot = self
            .identify_gate
            .as_ref()
            .map_or(0, |gate| gate.slot_for(shard_id));
        let sender = GatewaySender::new(
            shard_id,
            identify_slot,
            self.queue.clone(),
            transport.sink(),
            send_cancel.clone(),
        );

        let heartbeat = Arc::new(HeartbeatMonitor::new(
            Duration::from_millis(hello.heartbeat_interval),
            self.config.heartbeat_factor,
            self.config.heartbeat_grace,
        ));
        heartbeat.observe(Instant::now());
        let mut heartbeat_task = tokio::spawn(Arc::clone(&heartbeat).run(
            sender.clone(),
            Arc::clone(&self.session),
            self.populated.clone(),
            heartbeat_cancel.clone(),
        ));

        let sent = tokio::select! {
            () = cancel.cancelled() => Err(GatewayError::Cancelled),
            sent = timeout_at(deadline, self.send_handshake(handshake, &sender, permit)) => {
                sent.unwrap_or(Err(GatewayError::ConnectTimeout))
            }
        };
        let fault = match sent {
            Err(fault) => fault,
            Ok(()) => {
                self.pump(
                    &mut frames,
                    &sender,
                    &heartbeat,
                    &mut heartbeat_task,
                    deadline,
                    cancel,
                    backoff,
                )
                .await
            }
        };

        // Teardown order: in-flight sends, queued frames, heartbeat, socket
        self.set_state(ConnectionState::Disconnecting);
        send_cancel.cancel();
        self.queue.clear_shard(shard_id);
        heartbeat_cancel.cancel();
        heartbeat_task.abort();
        let code = if matches!(fault, GatewayError::Cancelled) {
            CLOSE_NORMAL
        } else {
            CLOSE_RESUMABLE
        };
        transport.close(code);
        tracing::debug!(shard_id, code, error = %fault, "Connection torn down");

        fault
    }

    /// Open the socket and wait for Hello
    async fn open(&self, url: &str) -> Result<Link, GatewayError> {
        let (transport, mut frames) = WsTransport::connect(url, self.config.compress).await?;
        match frames.recv().await {
            Some(TransportEvent::Frame(frame)) => match frame.as_hello() {
                Some(hello) => Ok(Link {
                    transport,
                    frames,
                    hello,
                }),
                None => {
                    transport.close(CLOSE_RESUMABLE);
                    Err(GatewayError::Handshake(format!("expected Hello, got {frame}")))
                }
            },
            Some(TransportEvent::Closed(fault)) => Err(fault),
            None => Err(GatewayError::Closed {
                code: None,
                reason: "transport stopped before Hello".to_string(),
            }),
        }
    }

    async fn send_handshake(
        &self,
        handshake: Handshake,
        sender: &GatewaySender,
        permit: Option<IdentifyPermit>,
    ) -> Result<(), GatewayError> {
        let shard_id = self.shard.id;
        match handshake {
            Handshake::Identify => {
                let payload = IdentifyPayload {
                    token: self.config.token.clone(),
                    intents: self.config.intents,
                    shard: [shard_id, self.shard.total],
                    properties: self.config.properties.clone(),
                };
                let message = GatewayMessage::identify(&payload)
                    .map_err(|e| GatewayError::Handshake(e.to_string()))?;
                sender.send_identify(message).await?;
                // The slot cool-down starts once Identify is on the wire
                drop(permit);
                tracing::info!(shard_id, total_shards = self.shard.total, "Identify sent");
            }
            Handshake::Resume {
                session_id,
                sequence,
            } => {
                let payload = ResumePayload {
                    token: self.config.token.clone(),
                    session_id,
                    seq: sequence,
                };
                let message = GatewayMessage::resume(&payload)
                    .map_err(|e| GatewayError::Handshake(e.to_string()))?;
                sender.send(message).await?;
                tracing::info!(shard_id, sequence, "Resume sent");
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump(
        &self,
        frames: &mut mpsc::UnboundedReceiver<TransportEvent>,
        sender: &GatewaySender,
        heartbeat: &HeartbeatMonitor,
        heartbeat_task: &mut JoinHandle<GatewayError>,
        deadline: Instant,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> GatewayError {
        let mut handshake_pending = true;
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return GatewayError::Cancelled,
                result = &mut *heartbeat_task => {
                    return result.unwrap_or_else(|e| GatewayError::Closed {
                        code: None,
                        reason: format!("heartbeat task ended: {e}"),
                    });
                }
                () = sleep_until(deadline), if handshake_pending => {
                    return GatewayError::ConnectTimeout;
                }
                event = frames.recv() => event,
            };

            let frame = match event {
                Some(TransportEvent::Frame(frame)) => frame,
                Some(TransportEvent::Closed(fault)) => return fault,
                None => {
                    return GatewayError::Closed {
                        code: None,
                        reason: "transport stopped".to_string(),
                    }
                }
            };
            heartbeat.observe(Instant::now());

            if let Err(fault) = self.handle_frame(frame, sender, heartbeat).await {
                return fault;
            }
            if handshake_pending && self.state() == ConnectionState::Connected {
                handshake_pending = false;
                backoff.reset();
            }
        }
    }

    async fn handle_frame(
        &self,
        frame: GatewayMessage,
        sender: &GatewaySender,
        heartbeat: &HeartbeatMonitor,
    ) -> Result<(), GatewayError> {
        let shard_id = self.shard.id;
        match frame.op {
            OpCode::Dispatch => self.on_dispatch(frame)?,
            OpCode::Heartbeat => {
                tracing::debug!(shard_id, "Heartbeat requested by server");
                sender.send_heartbeat(self.session.last_sequence()).await?;
                heartbeat.record_sent(Instant::now());
            }
            OpCode::HeartbeatAck => {
                if let Some(latency) = heartbeat.acknowledge(Instant::now()) {
                    tracing::trace!(
                        shard_id,
                        latency_ms = latency.as_millis() as u64,
                        "Heartbeat acknowledged"
                    );
                    *self.latency.lock() = Some(latency);
                    self.emit(ShardEvent::LatencyUpdated { shard_id, latency });
                }
            }
            OpCode::Reconnect => return Err(GatewayError::ReconnectRequested),
            OpCode::InvalidSession => {
                return Err(GatewayError::InvalidSession {
                    resumable: frame.as_invalid_session().unwrap_or(false),
                });
            }
            OpCode::Hello => tracing::debug!(shard_id, "Repeated Hello ignored"),
            op => tracing::warn!(shard_id, op = %op, "Send-only op received, dropped"),
        }
        Ok(())
    }

    fn on_dispatch(&self, frame: GatewayMessage) -> Result<(), GatewayError> {
        let shard_id = self.shard.id;
        let Some(event_type) = frame.t else {
            tracing::warn!(shard_id, "Dispatch without event name, dropped");
            return Ok(());
        };

        if let Some(sequence) = frame.s {
            match self.session.record_sequence(sequence) {
                SequenceCheck::InOrder => {}
                SequenceCheck::Gap { expected, received } => {
                    tracing::warn!(shard_id, expected, received, "Sequence gap");
                }
                SequenceCheck::Stale { last, received } => {
                    tracing::debug!(shard_id, last, received, "Stale sequence");
                }
            }
        }

        let payload = frame.d.unwrap_or(Value::Null);
        match EventType::from_str(&event_type) {
            Some(EventType::Ready) => {
                let ready = ReadyPayload::deserialize(&payload)
                    .map_err(|e| GatewayError::Handshake(format!("READY: {e}")))?;
                self.session
                    .on_ready(ready.session_id.clone(), ready.resume_gateway_url.clone(), frame.s);
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    shard_id,
                    session_id = %ready.session_id,
                    guilds = ready.guilds.len(),
                    "Shard ready"
                );
            }
            Some(EventType::Resumed) => {
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    shard_id,
                    sequence = ?self.session.last_sequence(),
                    "Session resumed"
                );
            }
            _ => {}
        }

        self.emit(ShardEvent::Dispatch(DispatchEvent {
            shard_id,
            sequence: frame.s,
            event_type,
            payload,
        }));
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(
                shard_id = self.shard.id,
                from = %previous,
                to = %state,
                "State changed"
            );
        }
    }

    fn emit(&self, event: ShardEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(shard_id = self.shard.id, "Shard event dropped, no receiver");
        }
    }
}
