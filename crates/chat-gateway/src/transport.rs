//! Gateway transport
//!
//! Owns one WebSocket. A reader task decodes frames (inflating zlib-stream
//! binary frames) and pushes them to the connection manager; a writer task
//! drains the outbound channel into the socket.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::GatewayError;
use crate::protocol::{GatewayMessage, InflateError, Inflater};

/// Pushed by the reader task
#[derive(Debug)]
pub enum TransportEvent {
    Frame(GatewayMessage),
    /// The socket is gone; carries the close code or socket error
    Closed(GatewayError),
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close(u16),
}

/// Write half shared by everything that sends on this connection
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrameSink {
    pub fn send(&self, message: &GatewayMessage) -> Result<(), GatewayError> {
        let json = message
            .to_json()
            .map_err(|e| GatewayError::Handshake(e.to_string()))?;
        tracing::trace!(op = %message.op, "Frame queued");
        self.tx.send(Outbound::Text(json)).map_err(|_| GatewayError::Closed {
            code: None,
            reason: "writer stopped".to_string(),
        })
    }

    /// Sink not attached to a socket
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// One live socket; dropping it stops the reader
pub struct WsTransport {
    sink: FrameSink,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Open the socket and start the reader and writer tasks
    pub async fn connect(
        url: &str,
        compress: bool,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), GatewayError> {
        let url = connect_url(url, compress);
        tracing::debug!(url = %url, "Opening gateway socket");

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        let (mut ws_sink, mut ws_stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                let message = match outbound {
                    Outbound::Text(json) => Message::Text(json),
                    Outbound::Close(code) => {
                        let frame = CloseFrame {
                            code: WsCloseCode::from(code),
                            reason: "".into(),
                        };
                        let _ = ws_sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = ws_sink.send(message).await {
                    tracing::debug!(error = %e, "Gateway write failed");
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let reader = tokio::spawn(async move {
            let mut inflater = compress.then(Inflater::new);
            let fault = loop {
                let Some(message) = ws_stream.next().await else {
                    break GatewayError::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    };
                };
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => {
                        let Some(inflater) = inflater.as_mut() else {
                            tracing::warn!("Binary frame on an uncompressed connection, dropped");
                            continue;
                        };
                        match inflater.push(&bytes) {
                            Ok(Some(text)) => text,
                            Ok(None) => continue,
                            // The shared zlib context is unusable from here on
                            Err(InflateError::Zlib(e)) => {
                                tracing::warn!(error = %e, "Frame inflate failed");
                                break GatewayError::Closed {
                                    code: None,
                                    reason: format!("inflate failed: {e}"),
                                };
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Frame inflate failed, dropped");
                                continue;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        break match frame {
                            Some(frame) => GatewayError::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.into_owned(),
                            },
                            None => GatewayError::Closed {
                                code: None,
                                reason: "closed without code".to_string(),
                            },
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        break GatewayError::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                    }
                };

                match GatewayMessage::from_json(&text) {
                    Ok(frame) => {
                        tracing::trace!(frame = %frame, "Frame received");
                        if event_tx.send(TransportEvent::Frame(frame)).is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Frame decode failed, dropped"),
                }
            };
            let _ = event_tx.send(TransportEvent::Closed(fault));
        });

        Ok((
            Self {
                sink: FrameSink { tx: out_tx },
                reader,
            },
            event_rx,
        ))
    }

    pub fn sink(&self) -> FrameSink {
        self.sink.clone()
    }

    /// Queue a close frame; the writer stops after sending it
    ///
    /// A 1000/1001 close ends the session server-side; any other code keeps
    /// it resumable.
    pub fn close(&self, code: u16) {
        let _ = self.sink.tx.send(Outbound::Close(code));
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn connect_url(base: &str, compress: bool) -> String {
    if !compress {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}compress=zlib-stream")
}
