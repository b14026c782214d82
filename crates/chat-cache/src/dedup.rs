//! Recently seen message ids
//!
//! The platform may deliver one message through several create events
//! (plain, mention and direct). Ids are remembered for a time window and up
//! to a fixed count, whichever runs out first.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use chat_core::Snowflake;

pub struct RecentMessages {
    window: Duration,
    capacity: usize,
    inner: Mutex<Recent>,
}

#[derive(Default)]
struct Recent {
    order: VecDeque<(Snowflake, Instant)>,
    seen: HashSet<Snowflake>,
}

impl RecentMessages {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            inner: Mutex::new(Recent::default()),
        }
    }

    /// `true` the first time `id` is seen inside the window
    pub fn admit(&self, id: Snowflake) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        while let Some(&(oldest, seen_at)) = inner.order.front() {
            if now.duration_since(seen_at) < self.window && inner.order.len() < self.capacity {
                break;
            }
            inner.order.pop_front();
            inner.seen.remove(&oldest);
        }

        if !inner.seen.insert(id) {
            return false;
        }
        inner.order.push_back((id, now));
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
