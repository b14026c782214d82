//! Session cache
//!
//! Holds the guilds, channels, memberships and users the bot can see, plus
//! a bounded set of recent messages. Dispatches are applied here before the
//! client publishes them, so a handler always observes the mutated state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use chat_common::{CacheConfig, FetchScope, StartupFetchMode};
use chat_core::payloads::{
    ChannelPayload, GuildDeletePayload, GuildPayload, MemberPayload, MessageDeletePayload,
    MessagePayload, ReadyPayload, UserPayload,
};
use chat_core::{
    Channel, EventType, Guild, GuildMember, Message, MessageSource, Snowflake, User,
};

use crate::dedup::RecentMessages;
use crate::error::{CacheError, CacheResult};
use crate::events::EntityEvent;
use crate::messages::MessageCache;
use crate::population::{resolve_mode, GuildAvailability, GuildFetcher};
use crate::users::UserArena;

/// Guild fetches run at most this many at a time during a sweep
const POPULATE_CONCURRENCY: usize = 4;

struct GuildEntry {
    guild: Guild,
    availability: GuildAvailability,
}

impl GuildEntry {
    fn stub(id: Snowflake) -> Self {
        Self {
            guild: Guild::stub(id),
            availability: GuildAvailability::Unavailable,
        }
    }
}

pub struct SessionCache {
    config: CacheConfig,
    fetcher: Option<Arc<dyn GuildFetcher>>,
    guilds: DashMap<Snowflake, GuildEntry>,
    channels: DashMap<Snowflake, Channel>,
    members: DashMap<(Snowflake, Snowflake), GuildMember>,
    users: UserArena,
    current_user: RwLock<Option<User>>,
    recent: RecentMessages,
    messages: MessageCache,
    fetches: DashMap<Snowflake, watch::Receiver<bool>>,
    populated: watch::Sender<bool>,
}

impl SessionCache {
    /// The message cache holds `message_cache_size` per shard
    pub fn new(config: CacheConfig, shard_count: u32) -> Self {
        let capacity = config
            .message_cache_size
            .saturating_mul(shard_count.max(1) as usize);
        let (populated, _) = watch::channel(false);

        Self {
            recent: RecentMessages::new(config.dedup_window(), config.dedup_capacity),
            messages: MessageCache::new(capacity),
            config,
            fetcher: None,
            guilds: DashMap::new(),
            channels: DashMap::new(),
            members: DashMap::new(),
            users: UserArena::new(),
            current_user: RwLock::new(None),
            fetches: DashMap::new(),
            populated,
        }
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn GuildFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    // === Reads ===

    pub fn guild(&self, guild_id: Snowflake) -> Option<Guild> {
        self.guilds.get(&guild_id).map(|entry| entry.guild.clone())
    }

    pub fn guild_availability(&self, guild_id: Snowflake) -> Option<GuildAvailability> {
        self.guilds.get(&guild_id).map(|entry| entry.availability)
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.guilds.iter().map(|entry| *entry.key()).collect()
    }

    /// Guilds not yet `Available`
    pub fn pending_guilds(&self) -> Vec<Snowflake> {
        self.guilds
            .iter()
            .filter(|entry| entry.availability != GuildAvailability::Available)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn all_guilds_available(&self) -> bool {
        self.guilds
            .iter()
            .all(|entry| entry.availability == GuildAvailability::Available)
    }

    pub fn channel(&self, channel_id: Snowflake) -> Option<Channel> {
        self.channels.get(&channel_id).map(|channel| channel.clone())
    }

    pub fn guild_channels(&self, guild_id: Snowflake) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|channel| channel.guild_id == Some(guild_id))
            .map(|channel| channel.clone())
            .collect();
        channels.sort_by_key(|channel| (channel.position, channel.id));
        channels
    }

    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<GuildMember> {
        self.members
            .get(&(guild_id, user_id))
            .map(|member| member.clone())
    }

    pub fn user(&self, user_id: Snowflake) -> Option<User> {
        self.users.get(user_id)
    }

    pub fn users(&self) -> &UserArena {
        &self.users
    }

    pub fn current_user(&self) -> Option<User> {
        self.current_user.read().clone()
    }

    pub fn messages(&self) -> &MessageCache {
        &self.messages
    }

    /// Startup mode with `Auto` resolved against the guilds known so far
    pub fn startup_mode(&self) -> StartupFetchMode {
        resolve_mode(&self.config, self.guild_count())
    }

    // === Population ===

    /// Flips to `true` once startup population is complete
    pub fn subscribe_populated(&self) -> watch::Receiver<bool> {
        self.populated.subscribe()
    }

    pub fn is_populated(&self) -> bool {
        *self.populated.borrow()
    }

    pub fn mark_populated(&self) {
        if !self.populated.send_replace(true) {
            tracing::info!(
                guilds = self.guild_count(),
                users = self.users.len(),
                "Cache populated"
            );
        }
    }

    /// Forget recently seen message ids after a session is invalidated
    pub fn clear_recent_messages(&self) {
        self.recent.clear();
    }

    /// Fetch every guild that is not yet available
    ///
    /// A `GuildAvailable` event is sent for each guild this sweep completed.
    /// Returns the number of failed fetches.
    pub async fn populate(&self, events: &mpsc::UnboundedSender<EntityEvent>) -> usize {
        let pending = self.pending_guilds();
        let failures = AtomicUsize::new(0);
        tracing::debug!(guilds = pending.len(), "Populating guilds");

        futures_util::stream::iter(pending)
            .for_each_concurrent(POPULATE_CONCURRENCY, |guild_id| {
                let failures = &failures;
                async move {
                    match self.ensure_guild(guild_id).await {
                        Ok(Some(guild)) => {
                            let _ = events.send(EntityEvent::GuildAvailable(guild));
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(%guild_id, error = %err, "Guild fetch failed");
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        failures.into_inner()
    }

    /// Make a guild `Available`, fetching it if needed
    ///
    /// Concurrent callers share one fetch. Returns the guild only to the
    /// caller whose fetch completed it.
    pub async fn ensure_guild(&self, guild_id: Snowflake) -> CacheResult<Option<Guild>> {
        if self.guild_availability(guild_id) == Some(GuildAvailability::Available) {
            return Ok(None);
        }
        let Some(fetcher) = self.fetcher.clone() else {
            return Ok(None);
        };

        let claimed = match self.fetches.entry(guild_id) {
            Entry::Occupied(occupied) => Err(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let (done, watcher) = watch::channel(false);
                vacant.insert(watcher);
                Ok(done)
            }
        };
        let claim = match claimed {
            Ok(done) => FetchClaim {
                cache: self,
                guild_id,
                done,
            },
            Err(mut watcher) => {
                let _ = watcher.wait_for(|done| *done).await;
                return Ok(None);
            }
        };

        // A GUILD_CREATE may have landed between the check and the claim
        if self.guild_availability(guild_id) == Some(GuildAvailability::Available) {
            return Ok(None);
        }
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| GuildEntry::stub(guild_id))
            .availability = GuildAvailability::Fetching;

        tracing::debug!(%guild_id, "Fetching guild");
        let guild = self.load_guild(guild_id, fetcher.as_ref()).await?;
        drop(claim);
        Ok(Some(guild))
    }

    async fn load_guild(
        &self,
        guild_id: Snowflake,
        fetcher: &dyn GuildFetcher,
    ) -> CacheResult<Guild> {
        let payload = fetcher.fetch_guild(guild_id).await?;
        let channels = match self.config.fetch_scope {
            FetchScope::GuildAndChannels => fetcher.fetch_channels(guild_id).await?,
            FetchScope::Guild => Vec::new(),
        };

        for channel in &channels {
            self.store_channel(guild_id, channel);
        }
        let (_, guild) = self.store_guild(&payload);
        Ok(guild)
    }

    // === Dispatch ===

    /// Apply one dispatch and return the events to publish, in order
    pub async fn apply(&self, event_type: &str, payload: &Value) -> CacheResult<Vec<EntityEvent>> {
        let Some(kind) = EventType::from_str(event_type) else {
            return Ok(vec![EntityEvent::Unknown {
                event_type: event_type.to_string(),
                payload: payload.clone(),
            }]);
        };

        match kind {
            EventType::Ready => {
                self.on_ready(&decode(event_type, payload)?);
                Ok(Vec::new())
            }
            EventType::Resumed => Ok(Vec::new()),

            EventType::GuildCreate => Ok(self.on_guild_create(&decode(event_type, payload)?)),
            EventType::GuildUpdate => {
                let payload: GuildPayload = decode(event_type, payload)?;
                let (before, after) = self.store_guild(&payload);
                Ok(vec![EntityEvent::GuildUpdated { before, after }])
            }
            EventType::GuildDelete => Ok(self.on_guild_delete(&decode(event_type, payload)?)),

            EventType::ChannelCreate | EventType::ChannelUpdate => {
                let payload: ChannelPayload = decode(event_type, payload)?;
                let mut events = self.prefetch(payload.guild_id).await;
                let before = self.channel(payload.id);
                let after = self.upsert_channel(&payload);
                events.push(match (kind, before) {
                    (EventType::ChannelCreate, None) => EntityEvent::ChannelCreated(after),
                    (_, before) => EntityEvent::ChannelUpdated { before, after },
                });
                Ok(events)
            }
            EventType::ChannelDelete => {
                let payload: ChannelPayload = decode(event_type, payload)?;
                let channel = self
                    .channels
                    .remove(&payload.id)
                    .map(|(_, channel)| channel)
                    .unwrap_or_else(|| Channel::from_payload(&payload));
                self.messages.remove_channel(payload.id);
                Ok(vec![EntityEvent::ChannelDeleted(channel)])
            }

            EventType::GuildMemberAdd | EventType::GuildMemberUpdate => {
                let payload: MemberPayload = decode(event_type, payload)?;
                let guild_id = member_guild(event_type, &payload)?;
                let mut events = self.prefetch(Some(guild_id)).await;
                let (before, member, user) = self.add_member(guild_id, &payload);
                events.push(match (kind, before) {
                    (EventType::GuildMemberAdd, None) => EntityEvent::MemberJoined { member, user },
                    (_, before) => EntityEvent::MemberUpdated {
                        before,
                        after: member,
                    },
                });
                Ok(events)
            }
            EventType::GuildMemberRemove => {
                let payload: MemberPayload = decode(event_type, payload)?;
                let guild_id = member_guild(event_type, &payload)?;
                let member = self.remove_member(guild_id, payload.user.id);
                Ok(vec![EntityEvent::MemberLeft {
                    guild_id,
                    user_id: payload.user.id,
                    member,
                }])
            }

            EventType::MessageCreate
            | EventType::AtMessageCreate
            | EventType::DirectMessageCreate => {
                let payload: MessagePayload = decode(event_type, payload)?;
                if !self.recent.admit(payload.id) {
                    tracing::debug!(
                        message_id = %payload.id,
                        event_type,
                        "Duplicate message dropped"
                    );
                    return Ok(Vec::new());
                }
                let mut events = self.prefetch(payload.guild_id).await;
                events.push(self.on_message_create(kind, &payload));
                Ok(events)
            }
            EventType::MessageUpdate => {
                let payload: MessagePayload = decode(event_type, payload)?;
                let mut events = self.prefetch(payload.guild_id).await;
                if let Some(author) = &payload.author {
                    self.users.refresh(author);
                }
                events.push(match self.messages.update(&payload) {
                    Some((before, after)) => EntityEvent::MessageUpdated {
                        before: Some(before),
                        after,
                    },
                    None => EntityEvent::MessageUpdated {
                        before: None,
                        after: Message::from_payload(&payload, source_for(kind, &payload)),
                    },
                });
                Ok(events)
            }
            EventType::MessageDelete => {
                let payload: MessageDeletePayload = decode(event_type, payload)?;
                Ok(vec![EntityEvent::MessageDeleted {
                    id: payload.id,
                    channel_id: payload.channel_id,
                    cached: self.messages.remove(payload.id),
                }])
            }

            EventType::UserUpdate => {
                let payload: UserPayload = decode(event_type, payload)?;
                Ok(vec![self.on_user_update(&payload)])
            }
        }
    }

    /// On-demand fetch for an event that references a guild
    async fn prefetch(&self, guild_id: Option<Snowflake>) -> Vec<EntityEvent> {
        let Some(guild_id) = guild_id else {
            return Vec::new();
        };
        match self.ensure_guild(guild_id).await {
            Ok(Some(guild)) => vec![EntityEvent::GuildAvailable(guild)],
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(%guild_id, error = %err, "On-demand guild fetch failed");
                Vec::new()
            }
        }
    }

    fn on_ready(&self, ready: &ReadyPayload) {
        {
            let mut current = self.current_user.write();
            match current.as_mut() {
                Some(user) if user.id == ready.user.id => user.merge(&ready.user),
                _ => *current = Some(User::from_payload(&ready.user)),
            }
        }

        // Guilds already available from an earlier session keep their data
        for stub in &ready.guilds {
            self.guilds
                .entry(stub.id)
                .or_insert_with(|| GuildEntry::stub(stub.id));
        }
        tracing::debug!(
            guilds = ready.guilds.len(),
            pending = self.pending_guilds().len(),
            "READY applied"
        );
    }

    fn on_guild_create(&self, payload: &GuildPayload) -> Vec<EntityEvent> {
        if payload.unavailable == Some(true) {
            self.mark_unavailable(payload.id);
            return vec![EntityEvent::GuildUnavailable(payload.id)];
        }

        for channel in payload.channels.iter().flatten() {
            self.store_channel(payload.id, channel);
        }
        for member in payload.members.iter().flatten() {
            self.add_member(payload.id, member);
        }

        match self.store_guild(payload) {
            (Some(before), after) => vec![EntityEvent::GuildUpdated {
                before: Some(before),
                after,
            }],
            (None, guild) => vec![EntityEvent::GuildAvailable(guild)],
        }
    }

    fn on_guild_delete(&self, payload: &GuildDeletePayload) -> Vec<EntityEvent> {
        if payload.unavailable {
            self.mark_unavailable(payload.id);
            return vec![EntityEvent::GuildUnavailable(payload.id)];
        }

        let guild = self
            .guilds
            .remove(&payload.id)
            .map_or_else(|| Guild::stub(payload.id), |(_, entry)| entry.guild);

        let channel_ids: Vec<Snowflake> = self
            .channels
            .iter()
            .filter(|channel| channel.guild_id == Some(payload.id))
            .map(|channel| channel.id)
            .collect();
        for channel_id in channel_ids {
            self.channels.remove(&channel_id);
            self.messages.remove_channel(channel_id);
        }

        let user_ids: Vec<Snowflake> = self
            .members
            .iter()
            .filter(|member| member.guild_id == payload.id)
            .map(|member| member.user_id)
            .collect();
        for user_id in user_ids {
            self.remove_member(payload.id, user_id);
        }

        tracing::info!(guild_id = %payload.id, "Left guild");
        vec![EntityEvent::GuildLeft(guild)]
    }

    fn on_message_create(&self, kind: EventType, payload: &MessagePayload) -> EntityEvent {
        let author = payload.author.as_ref().map(|author| self.users.refresh(author));
        let message = Message::from_payload(payload, source_for(kind, payload));
        self.messages.insert(message.clone());
        EntityEvent::MessageReceived { message, author }
    }

    fn on_user_update(&self, payload: &UserPayload) -> EntityEvent {
        self.users.refresh(payload);
        let mut current = self.current_user.write();
        let before = current.clone();
        let after = match current.as_mut() {
            Some(user) if user.id == payload.id => {
                user.merge(payload);
                user.clone()
            }
            _ => {
                let user = User::from_payload(payload);
                *current = Some(user.clone());
                user
            }
        };
        EntityEvent::CurrentUserUpdated { before, after }
    }

    // === Writes ===

    /// Merge guild data and mark it `Available`
    ///
    /// Returns the previous guild only if it was already available.
    fn store_guild(&self, payload: &GuildPayload) -> (Option<Guild>, Guild) {
        let mut entry = self
            .guilds
            .entry(payload.id)
            .or_insert_with(|| GuildEntry::stub(payload.id));
        let before = (entry.availability == GuildAvailability::Available)
            .then(|| entry.guild.clone());
        entry.guild.merge(payload);
        entry.availability = GuildAvailability::Available;
        (before, entry.guild.clone())
    }

    fn mark_unavailable(&self, guild_id: Snowflake) {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| GuildEntry::stub(guild_id))
            .availability = GuildAvailability::Unavailable;
        tracing::warn!(%guild_id, "Guild unavailable");
    }

    fn upsert_channel(&self, payload: &ChannelPayload) -> Channel {
        let mut channel = self
            .channels
            .entry(payload.id)
            .or_insert_with(|| Channel::from_payload(payload));
        channel.merge(payload);
        channel.clone()
    }

    /// Channel lists from a guild body may omit the guild id
    fn store_channel(&self, guild_id: Snowflake, payload: &ChannelPayload) {
        let mut channel = self.upsert_channel(payload);
        if channel.guild_id.is_none() {
            channel.guild_id = Some(guild_id);
            self.channels.insert(channel.id, channel);
        }
    }

    /// Returns the member before the change, the member after, and its user
    fn add_member(
        &self,
        guild_id: Snowflake,
        payload: &MemberPayload,
    ) -> (Option<GuildMember>, GuildMember, User) {
        match self.members.entry((guild_id, payload.user.id)) {
            Entry::Occupied(mut occupied) => {
                let before = occupied.get().clone();
                occupied.get_mut().merge(payload);
                let user = self.users.refresh(&payload.user);
                (Some(before), occupied.get().clone(), user)
            }
            Entry::Vacant(vacant) => {
                let user = self.users.retain(&payload.user);
                let member = GuildMember::from_payload(guild_id, payload);
                vacant.insert(member.clone());
                (None, member, user)
            }
        }
    }

    fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<GuildMember> {
        let (_, member) = self.members.remove(&(guild_id, user_id))?;
        self.users.release(user_id);
        Some(member)
    }
}

/// Releases a single-flight fetch slot, including when the fetch is dropped
struct FetchClaim<'a> {
    cache: &'a SessionCache,
    guild_id: Snowflake,
    done: watch::Sender<bool>,
}

impl Drop for FetchClaim<'_> {
    fn drop(&mut self) {
        if let Some(mut entry) = self.cache.guilds.get_mut(&self.guild_id) {
            if entry.availability == GuildAvailability::Fetching {
                entry.availability = GuildAvailability::Unavailable;
            }
        }
        self.cache.fetches.remove(&self.guild_id);
        self.done.send_replace(true);
    }
}

fn decode<T: DeserializeOwned>(event_type: &str, payload: &Value) -> CacheResult<T> {
    T::deserialize(payload).map_err(|err| CacheError::decode(event_type, &err))
}

fn member_guild(event_type: &str, payload: &MemberPayload) -> CacheResult<Snowflake> {
    payload.guild_id.ok_or_else(|| CacheError::Decode {
        event_type: event_type.to_string(),
        reason: "missing guild_id".to_string(),
    })
}

fn source_for(kind: EventType, payload: &MessagePayload) -> MessageSource {
    match kind {
        EventType::AtMessageCreate => MessageSource::Mention,
        EventType::DirectMessageCreate => MessageSource::Direct,
        _ if payload.guild_id.is_none() => MessageSource::Direct,
        _ => MessageSource::Guild,
    }
}
