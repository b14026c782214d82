//! Heartbeat monitor
//!
//! Sends a heartbeat every `interval - last latency`, matches acks to sends
//! in FIFO order to measure latency, and declares the connection stale when
//! nothing has arrived for `interval + grace` while acks are outstanding.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::connection::SessionState;
use crate::error::GatewayError;
use crate::sender::GatewaySender;

#[derive(Debug)]
struct Pulse {
    pending: VecDeque<Instant>,
    last_seen: Instant,
    latency: Option<Duration>,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    grace: Duration,
    pulse: Mutex<Pulse>,
}

impl HeartbeatMonitor {
    /// `hello_interval` scaled by `factor` so beats land before the server deadline
    pub fn new(hello_interval: Duration, factor: f64, grace: Duration) -> Self {
        Self {
            interval: hello_interval.mul_f64(factor),
            grace,
            pulse: Mutex::new(Pulse {
                pending: VecDeque::new(),
                last_seen: Instant::now(),
                latency: None,
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Any inbound frame proves the connection alive
    pub fn observe(&self, now: Instant) {
        self.pulse.lock().last_seen = now;
    }

    pub fn record_sent(&self, now: Instant) {
        self.pulse.lock().pending.push_back(now);
    }

    /// Match an ack to the oldest outstanding heartbeat and return its latency
    pub fn acknowledge(&self, now: Instant) -> Option<Duration> {
        let mut pulse = self.pulse.lock();
        let sent = pulse.pending.pop_front()?;
        let latency = now.saturating_duration_since(sent);
        pulse.latency = Some(latency);
        Some(latency)
    }

    pub fn latency(&self) -> Option<Duration> {
        self.pulse.lock().latency
    }

    pub fn pending(&self) -> usize {
        self.pulse.lock().pending.len()
    }

    /// Delay before the next beat
    pub fn next_delay(&self) -> Duration {
        let latency = self.pulse.lock().latency.unwrap_or_default();
        self.interval.saturating_sub(latency)
    }

    /// When the connection counts as stale, if any ack is outstanding
    pub fn stale_at(&self) -> Option<Instant> {
        let pulse = self.pulse.lock();
        if pulse.pending.is_empty() {
            return None;
        }
        Some(pulse.last_seen + self.interval + self.grace)
    }

    /// Beat until cancelled or stale
    ///
    /// Staleness is only enforced once `populated` reads true; initial bulk
    /// population can legitimately starve the socket reader.
    pub async fn run(
        self: Arc<Self>,
        sender: GatewaySender,
        session: Arc<SessionState>,
        mut populated: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> GatewayError {
        let mut watching = true;
        loop {
            if let Err(e) = sender.send_heartbeat(session.last_sequence()).await {
                return e;
            }
            let now = Instant::now();
            self.record_sent(now);
            tracing::trace!(sequence = ?session.last_sequence(), "Heartbeat sent");

            let next_beat = now + self.next_delay();
            loop {
                let stale_at = if *populated.borrow() {
                    self.stale_at()
                } else {
                    None
                };
                let wake = stale_at.map_or(next_beat, |at| at.min(next_beat));

                tokio::select! {
                    () = cancel.cancelled() => return GatewayError::Cancelled,
                    changed = populated.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                        }
                        continue;
                    }
                    () = sleep_until(wake) => {}
                }

                let now = Instant::now();
                if let Some(at) = stale_at {
                    if now >= at && self.stale_at().is_some_and(|at| now >= at) {
                        tracing::warn!(
                            pending = self.pending(),
                            interval_ms = self.interval.as_millis() as u64,
                            "Heartbeat stale"
                        );
                        return GatewayError::HeartbeatTimeout;
                    }
                }
                if now >= next_beat {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FrameSink, Outbound};
    use chat_dispatch::{DispatchQueue, QueueConfig};
    use tokio::sync::mpsc;

    fn monitor() -> Arc<HeartbeatMonitor> {
        Arc::new(HeartbeatMonitor::new(
            Duration::from_millis(40_000),
            0.9,
            Duration::from_millis(5_000),
        ))
    }

    fn sender() -> (GatewaySender, mpsc::UnboundedReceiver<Outbound>) {
        let (sink, frames) = FrameSink::detached();
        let sender = GatewaySender::new(
            0,
            0,
            DispatchQueue::new(QueueConfig::default()),
            sink,
            CancellationToken::new(),
        );
        (sender, frames)
    }

    #[test]
    fn test_interval_scaled_by_factor() {
        assert_eq!(monitor().interval(), Duration::from_millis(36_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_latency_fifo() {
        let monitor = monitor();
        let start = Instant::now();
        monitor.record_sent(start);
        monitor.record_sent(start + Duration::from_millis(100));

        let latency = monitor.acknowledge(start + Duration::from_millis(250));
        assert_eq!(latency, Some(Duration::from_millis(250)));
        assert_eq!(monitor.pending(), 1);
        assert_eq!(monitor.next_delay(), Duration::from_millis(35_750));

        monitor.acknowledge(start + Duration::from_millis(300));
        assert_eq!(monitor.acknowledge(start), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fault_after_interval_plus_grace() {
        let monitor = monitor();
        let (sender, mut frames) = sender();
        let (_populated_tx, populated) = watch::channel(true);
        let session = Arc::new(SessionState::new());
        let start = Instant::now();
        monitor.observe(start);

        let fault = monitor
            .clone()
            .run(sender, session, populated, CancellationToken::new())
            .await;

        assert!(matches!(fault, GatewayError::HeartbeatTimeout));
        assert_eq!(start.elapsed(), Duration::from_millis(41_000));

        // Beats at 0 and 36000
        let mut beats = 0;
        while let Ok(Outbound::Text(json)) = frames.try_recv() {
            assert_eq!(json, r#"{"op":1,"d":null}"#);
            beats += 1;
        }
        assert_eq!(beats, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stale_fault_before_population() {
        let monitor = monitor();
        let (sender, _frames) = sender();
        let (populated_tx, populated) = watch::channel(false);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        monitor.observe(start);

        let task = tokio::spawn(monitor.clone().run(
            sender,
            Arc::new(SessionState::new()),
            populated,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!task.is_finished());

        populated_tx.send(true).unwrap();
        let fault = task.await.unwrap();
        assert!(matches!(fault, GatewayError::HeartbeatTimeout));
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acks_keep_connection_alive() {
        let monitor = monitor();
        let (sender, _frames) = sender();
        let (_populated_tx, populated) = watch::channel(true);
        let cancel = CancellationToken::new();
        monitor.observe(Instant::now());

        let task = tokio::spawn(monitor.clone().run(
            sender,
            Arc::new(SessionState::new()),
            populated,
            cancel.clone(),
        ));

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            let now = Instant::now();
            monitor.observe(now);
            monitor.acknowledge(now);
            tokio::time::sleep(Duration::from_millis(35_000)).await;
        }
        assert!(!task.is_finished());

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), GatewayError::Cancelled));
    }
}
