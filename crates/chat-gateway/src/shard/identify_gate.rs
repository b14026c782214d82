//! Identify concurrency gate
//!
//! The platform lets `max_concurrency` shards identify at once, one per slot
//! (`shard_id % max_concurrency`), and each slot needs a cool-down between
//! identifies. Each slot is a single-permit semaphore whose permit is only
//! returned once the cool-down has elapsed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct IdentifyGate {
    slots: RwLock<Vec<Arc<Semaphore>>>,
    cooldown: Duration,
}

impl IdentifyGate {
    pub fn new(max_concurrency: u32, cooldown: Duration) -> Self {
        Self {
            slots: RwLock::new(make_slots(max_concurrency)),
            cooldown,
        }
    }

    pub fn max_concurrency(&self) -> u32 {
        self.slots.read().len() as u32
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn slot_for(&self, shard_id: u32) -> u32 {
        shard_id % self.max_concurrency()
    }

    /// Resize the slot pool; permits already handed out finish on the old pool
    pub fn set_max_concurrency(&self, max_concurrency: u32) {
        let mut slots = self.slots.write();
        if slots.len() as u32 != max_concurrency.max(1) {
            *slots = make_slots(max_concurrency);
            tracing::debug!(max_concurrency, "Identify slots resized");
        }
    }

    /// Wait for the shard's slot
    ///
    /// The slot stays taken until the returned permit is dropped and the
    /// cool-down has passed.
    pub async fn acquire(&self, shard_id: u32) -> IdentifyPermit {
        let (slot, semaphore) = {
            let slots = self.slots.read();
            let slot = shard_id % slots.len() as u32;
            (slot, Arc::clone(&slots[slot as usize]))
        };

        tracing::debug!(shard_id, slot, "Waiting for identify slot");
        // Slot semaphores are never closed
        let permit = semaphore.acquire_owned().await.ok();
        tracing::debug!(shard_id, slot, "Identify slot acquired");

        IdentifyPermit {
            slot,
            permit,
            cooldown: self.cooldown,
        }
    }
}

fn make_slots(max_concurrency: u32) -> Vec<Arc<Semaphore>> {
    (0..max_concurrency.max(1))
        .map(|_| Arc::new(Semaphore::new(1)))
        .collect()
}

/// Held while identifying; dropping it starts the slot's cool-down
pub struct IdentifyPermit {
    slot: u32,
    permit: Option<OwnedSemaphorePermit>,
    cooldown: Duration,
}

impl IdentifyPermit {
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl Drop for IdentifyPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let cooldown = self.cooldown;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(cooldown).await;
                    drop(permit);
                });
            }
            Err(_) => drop(permit),
        }
    }
}
