//! Bounded recent-message cache
//!
//! Oldest messages are evicted first once `capacity` is reached. A capacity
//! of zero disables the cache.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;

use chat_core::payloads::MessagePayload;
use chat_core::{Message, Snowflake};

pub struct MessageCache {
    capacity: usize,
    messages: DashMap<Snowflake, Message>,
    order: Mutex<VecDeque<Snowflake>>,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn insert(&self, message: Message) {
        if !self.is_enabled() {
            return;
        }
        let id = message.id;
        if self.messages.insert(id, message).is_some() {
            return;
        }

        let mut order = self.order.lock();
        order.push_back(id);
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.messages.remove(&oldest);
            }
        }
    }

    /// Merge an edit; returns the message before and after
    pub fn update(&self, payload: &MessagePayload) -> Option<(Message, Message)> {
        let mut entry = self.messages.get_mut(&payload.id)?;
        let before = entry.clone();
        entry.merge(payload);
        Some((before, entry.clone()))
    }

    pub fn remove(&self, id: Snowflake) -> Option<Message> {
        let (_, message) = self.messages.remove(&id)?;
        self.order.lock().retain(|cached| *cached != id);
        Some(message)
    }

    /// Drop every message of a channel
    pub fn remove_channel(&self, channel_id: Snowflake) {
        self.messages.retain(|_, message| message.channel_id != channel_id);
        let mut order = self.order.lock();
        order.retain(|id| self.messages.contains_key(id));
    }

    pub fn get(&self, id: Snowflake) -> Option<Message> {
        self.messages.get(&id).map(|message| message.clone())
    }

    /// Cached messages of a channel, oldest first
    pub fn channel_messages(&self, channel_id: Snowflake) -> Vec<Message> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.messages.get(id))
            .filter(|message| message.channel_id == channel_id)
            .map(|message| message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::MessageSource;

    fn message(id: u64, channel: u64, content: &str) -> Message {
        Message::from_payload(
            &MessagePayload {
                id: Snowflake::new(id),
                channel_id: Snowflake::new(channel),
                content: Some(content.to_string()),
                ..Default::default()
            },
            MessageSource::Guild,
        )
    }

    #[test]
    fn test_oldest_evicted() {
        let cache = MessageCache::new(2);
        cache.insert(message(1, 10, "a"));
        cache.insert(message(2, 10, "b"));
        cache.insert(message(3, 11, "c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(Snowflake::new(1)).is_none());
        let in_channel: Vec<u64> = cache
            .channel_messages(Snowflake::new(10))
            .iter()
            .map(|m| m.id.into_inner())
            .collect();
        assert_eq!(in_channel, vec![2]);
    }

    #[test]
    fn test_disabled() {
        let cache = MessageCache::new(0);
        cache.insert(message(1, 10, "a"));
        assert!(!cache.is_enabled());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_update_keeps_absent_fields() {
        let cache = MessageCache::new(10);
        cache.insert(message(1, 10, "hello"));

        let (before, after) = cache
            .update(&MessagePayload {
                id: Snowflake::new(1),
                channel_id: Snowflake::new(10),
                edited_timestamp: Some("2024-01-01T00:00:00Z".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(before.content, "hello");
        assert_eq!(after.content, "hello");
        assert!(after.is_edited());
    }

    #[test]
    fn test_remove_channel() {
        let cache = MessageCache::new(10);
        cache.insert(message(1, 10, "a"));
        cache.insert(message(2, 11, "b"));
        cache.remove_channel(Snowflake::new(10));

        assert_eq!(cache.len(), 1);
        assert!(cache.remove(Snowflake::new(2)).is_some());
        assert!(cache.is_empty());
    }
}
