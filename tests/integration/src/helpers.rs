//! Mock servers and event helpers
//!
//! `MockGateway` answers heartbeats, Identify and Resume on its own and lets
//! a test push frames or close codes into the socket of a given shard.
//! `MockRest` serves the gateway bootstrap and the guild endpoints and
//! counts guild fetches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use chat_client::{BotClient, BotEvent};
use chat_common::{StartupFetchMode, TokenKind};

use crate::fixtures;

/// Default wait for anything a scenario expects to happen
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A non-heartbeat frame the client sent
#[derive(Debug, Clone)]
pub struct ClientFrame {
    pub connection: usize,
    pub frame: Value,
}

impl ClientFrame {
    pub fn op(&self) -> u64 {
        self.frame["op"].as_u64().unwrap_or(u64::MAX)
    }
}

enum Outgoing {
    Frame(Value),
    Close(u16),
}

struct Connection {
    shard: Option<u32>,
    tx: mpsc::UnboundedSender<Outgoing>,
}

struct GatewayState {
    url: String,
    guilds: Vec<u64>,
    connections: Mutex<Vec<Connection>>,
    frames_tx: mpsc::UnboundedSender<ClientFrame>,
}

pub struct MockGateway {
    state: Arc<GatewayState>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientFrame>>,
}

impl MockGateway {
    /// Start a gateway whose READY lists the guilds routed to each shard
    pub async fn start(guilds: Vec<u64>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}", listener.local_addr()?);
        let (frames_tx, frames) = mpsc::unbounded_channel();

        let state = Arc::new(GatewayState {
            url,
            guilds,
            connections: Mutex::new(Vec::new()),
            frames_tx,
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (tx, rx) = mpsc::unbounded_channel();
                let index = {
                    let mut connections = accept_state.connections.lock();
                    connections.push(Connection { shard: None, tx });
                    connections.len() - 1
                };
                tokio::spawn(serve(Arc::clone(&accept_state), index, ws, rx));
            }
        });

        Ok(Self {
            state,
            frames: tokio::sync::Mutex::new(frames),
        })
    }

    pub fn url(&self) -> &str {
        &self.state.url
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.lock().len()
    }

    /// Next non-heartbeat frame from any connection
    pub async fn next_frame(&self) -> Result<ClientFrame> {
        let mut frames = self.frames.lock().await;
        tokio::time::timeout(EVENT_TIMEOUT, frames.recv())
            .await
            .map_err(|_| anyhow!("no client frame within {EVENT_TIMEOUT:?}"))?
            .ok_or_else(|| anyhow!("gateway stopped"))
    }

    /// Send a frame on the newest connection of `shard`
    pub fn push(&self, shard: u32, frame: Value) -> Result<()> {
        self.send_to(shard, Outgoing::Frame(frame))
    }

    /// Close the newest connection of `shard` with `code`
    pub fn close(&self, shard: u32, code: u16) -> Result<()> {
        self.send_to(shard, Outgoing::Close(code))
    }

    fn send_to(&self, shard: u32, outgoing: Outgoing) -> Result<()> {
        let connections = self.state.connections.lock();
        let connection = connections
            .iter()
            .rev()
            .find(|connection| connection.shard == Some(shard))
            .ok_or_else(|| anyhow!("no connection for shard {shard}"))?;
        connection
            .tx
            .send(outgoing)
            .map_err(|_| anyhow!("connection for shard {shard} is gone"))
    }
}

impl GatewayState {
    fn set_shard(&self, index: usize, shard: u32) {
        if let Some(connection) = self.connections.lock().get_mut(index) {
            connection.shard = Some(shard);
        }
    }

    /// Replies to one client frame
    fn respond(&self, index: usize, frame: &Value) -> Vec<Value> {
        let op = frame["op"].as_u64();
        if op == Some(1) {
            return vec![fixtures::heartbeat_ack()];
        }
        let _ = self.frames_tx.send(ClientFrame {
            connection: index,
            frame: frame.clone(),
        });

        match op {
            Some(2) => {
                let shard = frame["d"]["shard"][0].as_u64().unwrap_or(0);
                let total = frame["d"]["shard"][1].as_u64().unwrap_or(1).max(1);
                self.set_shard(index, shard as u32);

                let guilds: Vec<u64> = self
                    .guilds
                    .iter()
                    .copied()
                    .filter(|id| (id >> 22) % total == shard)
                    .collect();
                let session_id = format!("s{shard}-{index}");
                vec![fixtures::ready(&session_id, &guilds, &self.url)]
            }
            Some(6) => {
                // Session ids are minted as `s{shard}-{connection}`
                let shard = frame["d"]["session_id"]
                    .as_str()
                    .and_then(|id| id.strip_prefix('s'))
                    .and_then(|id| id.split('-').next())
                    .and_then(|shard| shard.parse().ok())
                    .unwrap_or(0);
                self.set_shard(index, shard);
                let sequence = frame["d"]["seq"].as_u64().unwrap_or(0);
                vec![fixtures::resumed(sequence + 1)]
            }
            _ => Vec::new(),
        }
    }
}

async fn serve(
    state: Arc<GatewayState>,
    index: usize,
    ws: WebSocketStream<TcpStream>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let (mut sink, mut stream) = ws.split();
    if sink
        .send(Message::Text(fixtures::hello().to_string()))
        .await
        .is_err()
    {
        return;
    }

    'conn: loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Frame(frame)) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close(code)) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: "closed by test".into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    for reply in state.respond(index, &frame) {
                        if sink.send(Message::Text(reply.to_string())).await.is_err() {
                            break 'conn;
                        }
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

struct RestState {
    gateway_url: String,
    shards: u32,
    guild_fetches: AtomicUsize,
}

pub struct MockRest {
    base_url: String,
    state: Arc<RestState>,
}

impl MockRest {
    /// Start a unary API whose bootstrap points at `gateway_url`
    pub async fn start(gateway_url: &str, recommended_shards: u32) -> Result<Self> {
        let state = Arc::new(RestState {
            gateway_url: gateway_url.to_string(),
            shards: recommended_shards,
            guild_fetches: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/gateway/bot", get(gateway_bot))
            .route("/guilds/:guild_id", get(guild))
            .route("/guilds/:guild_id/channels", get(guild_channels))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { base_url, state })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn guild_fetches(&self) -> usize {
        self.state.guild_fetches.load(Ordering::SeqCst)
    }
}

async fn gateway_bot(State(state): State<Arc<RestState>>) -> Json<Value> {
    Json(json!({
        "url": state.gateway_url,
        "shards": state.shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": 1000,
            "reset_after": 0,
            "max_concurrency": 1,
        },
    }))
}

async fn guild(State(state): State<Arc<RestState>>, Path(guild_id): Path<String>) -> Json<Value> {
    state.guild_fetches.fetch_add(1, Ordering::SeqCst);
    Json(json!({"id": guild_id, "name": format!("guild-{guild_id}")}))
}

async fn guild_channels(Path(guild_id): Path<String>) -> Json<Value> {
    Json(json!([{"id": format!("{guild_id}0"), "name": "general", "type": 0}]))
}

/// Log a client in against `rest` and start its shards
///
/// The event stream is subscribed before login so nothing is missed.
pub async fn login_client(
    rest: &MockRest,
    mode: StartupFetchMode,
    total_shards: Option<u32>,
) -> Result<(BotClient, broadcast::Receiver<BotEvent>)> {
    let client = BotClient::new(fixtures::client_config(rest.base_url(), mode, total_shards));
    let events = client.subscribe();
    client
        .login(fixtures::APP_ID, TokenKind::Bot, fixtures::TOKEN)
        .await?;
    client.start()?;
    Ok((client, events))
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<BotEvent>,
    mut pred: F,
) -> Result<BotEvent>
where
    F: FnMut(&BotEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow!("event stream closed"));
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow!("no matching event within {EVENT_TIMEOUT:?}"))?
}

/// Collect events until one matches `last`, inclusive
pub async fn collect_until<F>(
    events: &mut broadcast::Receiver<BotEvent>,
    mut last: F,
) -> Result<Vec<BotEvent>>
where
    F: FnMut(&BotEvent) -> bool,
{
    let mut seen = Vec::new();
    wait_for_event(events, |event| {
        seen.push(event.clone());
        last(event)
    })
    .await?;
    Ok(seen)
}
