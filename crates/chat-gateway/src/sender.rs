//! Outbound gateway frames through the dispatch queue

use tokio_util::sync::CancellationToken;

use chat_dispatch::{
    Bucket, DispatchError, DispatchOutcome, DispatchQueue, EnqueueOptions,
};

use crate::error::GatewayError;
use crate::protocol::GatewayMessage;
use crate::transport::FrameSink;

/// Sends frames for one connection of one shard
///
/// Ordinary frames share the shard's gateway bucket, Identify goes through
/// the identify bucket of the shard's concurrency slot, heartbeats bypass
/// quota entirely.
#[derive(Clone)]
pub struct GatewaySender {
    shard_id: u32,
    identify_slot: u32,
    queue: DispatchQueue,
    sink: FrameSink,
    cancel: CancellationToken,
}

impl GatewaySender {
    pub fn new(
        shard_id: u32,
        identify_slot: u32,
        queue: DispatchQueue,
        sink: FrameSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shard_id,
            identify_slot,
            queue,
            sink,
            cancel,
        }
    }

    pub async fn send(&self, message: GatewayMessage) -> Result<(), GatewayError> {
        let bucket = Bucket::Gateway {
            shard_id: self.shard_id,
        };
        self.enqueue(bucket, message, self.options()).await
    }

    pub async fn send_identify(&self, message: GatewayMessage) -> Result<(), GatewayError> {
        let bucket = Bucket::GatewayIdentify {
            slot: self.identify_slot,
        };
        self.enqueue(bucket, message, self.options()).await
    }

    pub async fn send_heartbeat(&self, last_sequence: Option<u64>) -> Result<(), GatewayError> {
        let bucket = Bucket::Gateway {
            shard_id: self.shard_id,
        };
        let message = GatewayMessage::heartbeat(last_sequence);
        self.enqueue(bucket, message, self.options().ignore_quota())
            .await
    }

    fn options(&self) -> EnqueueOptions {
        EnqueueOptions::owned_by(self.shard_id).with_cancel(self.cancel.clone())
    }

    async fn enqueue(
        &self,
        bucket: Bucket,
        message: GatewayMessage,
        options: EnqueueOptions,
    ) -> Result<(), GatewayError> {
        let sink = self.sink.clone();
        let write = move || {
            let result = sink
                .send(&message)
                .map(|()| DispatchOutcome::sent())
                .map_err(|e| DispatchError::Transport(e.to_string()));
            std::future::ready(result)
        };
        self.queue.enqueue(bucket, write, options).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_dispatch::QueueConfig;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_identify_bucket_is_preemptive() {
        let config = QueueConfig {
            identify_cooldown: Duration::from_secs(5),
            ..QueueConfig::default()
        };
        let queue = DispatchQueue::new(config);
        let (sink, mut frames) = FrameSink::detached();
        let sender = GatewaySender::new(0, 0, queue, sink, CancellationToken::new());

        let start = tokio::time::Instant::now();
        let identify = GatewayMessage::new(crate::protocol::OpCode::Identify, None);
        sender.send_identify(identify.clone()).await.unwrap();
        sender.send_identify(identify).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(frames.try_recv().is_ok());
        assert!(frames.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_closed_socket_surfaces_transport_error() {
        let queue = DispatchQueue::new(QueueConfig::default());
        let (sink, frames) = FrameSink::detached();
        drop(frames);
        let sender = GatewaySender::new(0, 0, queue, sink, CancellationToken::new());

        let result = sender.send_heartbeat(Some(1)).await;
        assert!(matches!(
            result,
            Err(GatewayError::Send(DispatchError::Transport(_)))
        ));
    }
}
