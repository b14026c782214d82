//! Reference-counted user store
//!
//! A user is retained once per guild membership that points at it and is
//! evicted when the last membership goes away. Users seen only as message
//! authors are never stored.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use chat_core::payloads::UserPayload;
use chat_core::{Snowflake, User};

struct UserEntry {
    user: User,
    refs: u32,
}

#[derive(Default)]
pub struct UserArena {
    users: DashMap<Snowflake, UserEntry>,
}

impl UserArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge into a stored user, or build a detached one
    pub fn refresh(&self, payload: &UserPayload) -> User {
        match self.users.get_mut(&payload.id) {
            Some(mut entry) => {
                entry.user.merge(payload);
                entry.user.clone()
            }
            None => User::from_payload(payload),
        }
    }

    /// Insert or merge and take one reference
    pub fn retain(&self, payload: &UserPayload) -> User {
        let mut entry = self.users.entry(payload.id).or_insert_with(|| UserEntry {
            user: User::from_payload(payload),
            refs: 0,
        });
        entry.user.merge(payload);
        entry.refs += 1;
        entry.user.clone()
    }

    /// Drop one reference; returns the user when this evicted it
    pub fn release(&self, user_id: Snowflake) -> Option<User> {
        match self.users.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.refs = entry.refs.saturating_sub(1);
                if entry.refs == 0 {
                    let removed = occupied.remove();
                    tracing::trace!(%user_id, "User evicted");
                    Some(removed.user)
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn get(&self, user_id: Snowflake) -> Option<User> {
        self.users.get(&user_id).map(|entry| entry.user.clone())
    }

    pub fn refs(&self, user_id: Snowflake) -> u32 {
        self.users.get(&user_id).map_or(0, |entry| entry.refs)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
