//! Startup population and cache scenarios
//!
//! Run with: cargo test -p integration-tests --test population_tests

use anyhow::Result;
use serde_json::json;

use chat_cache::GuildAvailability;
use chat_client::{BotEvent, EntityEvent};
use chat_common::StartupFetchMode;
use chat_core::Snowflake;
use integration_tests::*;

fn is_guild_available(event: &BotEvent) -> bool {
    matches!(event, BotEvent::Entity(EntityEvent::GuildAvailable(_)))
}

#[tokio::test]
async fn test_synchronous_ready_after_every_guild() -> Result<()> {
    let guilds = vec![
        guild_on_shard(1, 0, 1),
        guild_on_shard(2, 0, 1),
        guild_on_shard(3, 0, 1),
    ];
    let gateway = MockGateway::start(guilds.clone()).await?;
    let rest = MockRest::start(gateway.url(), 1).await?;
    let (client, mut events) = login_client(&rest, StartupFetchMode::Synchronous, None).await?;

    let seen = collect_until(&mut events, |e| matches!(e, BotEvent::Ready)).await?;
    assert_eq!(seen.iter().filter(|e| is_guild_available(e)).count(), 3);
    let ready_at = seen.len() - 1;
    let shard_ready_at = seen
        .iter()
        .position(|e| matches!(e, BotEvent::ShardReady { shard_id: 0 }))
        .unwrap();
    assert!(shard_ready_at < ready_at);

    assert_eq!(rest.guild_fetches(), 3);
    let cache = client.cache().unwrap();
    assert!(cache.is_populated());
    for id in guilds {
        let id = Snowflake::new(id);
        assert_eq!(cache.guild_availability(id), Some(GuildAvailability::Available));
        assert_eq!(cache.guild(id).unwrap().name, format!("guild-{id}"));
        assert_eq!(cache.guild_channels(id).len(), 1);
    }

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn test_lazy_ready_fetches_on_first_event() -> Result<()> {
    let guilds = vec![guild_on_shard(1, 0, 1), guild_on_shard(2, 0, 1)];
    let gateway = MockGateway::start(guilds.clone()).await?;
    let rest = MockRest::start(gateway.url(), 1).await?;
    let (client, mut events) = login_client(&rest, StartupFetchMode::Lazy, None).await?;

    wait_for_event(&mut events, |e| matches!(e, BotEvent::Ready)).await?;
    assert_eq!(rest.guild_fetches(), 0);
    let cache = client.cache().unwrap();
    assert_eq!(cache.pending_guilds().len(), 2);

    let target = Snowflake::new(guilds[1]);
    gateway.push(
        0,
        dispatch("MESSAGE_CREATE", 1, message(80, 81, Some(guilds[1]), "wake up")),
    )?;
    let seen = collect_until(&mut events, |e| {
        matches!(e, BotEvent::Entity(EntityEvent::MessageReceived { .. }))
    })
    .await?;

    let available: Vec<Snowflake> = seen
        .iter()
        .filter_map(|e| match e {
            BotEvent::Entity(EntityEvent::GuildAvailable(guild)) => Some(guild.id),
            _ => None,
        })
        .collect();
    assert_eq!(available, vec![target]);
    assert_eq!(rest.guild_fetches(), 1);
    assert_eq!(
        cache.guild_availability(target),
        Some(GuildAvailability::Available)
    );
    assert_eq!(
        cache.guild_availability(Snowflake::new(guilds[0])),
        Some(GuildAvailability::Unavailable)
    );
    assert_eq!(cache.messages().channel_messages(Snowflake::new(81)).len(), 1);

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn test_message_delivered_once_across_create_kinds() -> Result<()> {
    let gateway = MockGateway::start(Vec::new()).await?;
    let rest = MockRest::start(gateway.url(), 1).await?;
    let (client, mut events) = login_client(&rest, StartupFetchMode::Lazy, None).await?;
    wait_for_event(&mut events, |e| matches!(e, BotEvent::Ready)).await?;

    gateway.push(0, dispatch("MESSAGE_CREATE", 1, message(900, 9, None, "hi")))?;
    gateway.push(0, dispatch("AT_MESSAGE_CREATE", 2, message(900, 9, None, "hi")))?;
    gateway.push(0, dispatch("MESSAGE_CREATE", 3, message(901, 9, None, "done")))?;

    let seen = collect_until(&mut events, |e| {
        matches!(
            e,
            BotEvent::Entity(EntityEvent::MessageReceived { message, .. })
                if message.id == Snowflake::new(901)
        )
    })
    .await?;
    let received: Vec<Snowflake> = seen
        .iter()
        .filter_map(|e| match e {
            BotEvent::Entity(EntityEvent::MessageReceived { message, .. }) => Some(message.id),
            _ => None,
        })
        .collect();
    assert_eq!(received, vec![Snowflake::new(900), Snowflake::new(901)]);

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn test_shared_user_outlives_one_membership() -> Result<()> {
    let first = guild_on_shard(1, 0, 1);
    let second = guild_on_shard(2, 0, 1);
    let gateway = MockGateway::start(vec![first, second]).await?;
    let rest = MockRest::start(gateway.url(), 1).await?;
    let (client, mut events) = login_client(&rest, StartupFetchMode::Synchronous, None).await?;
    wait_for_event(&mut events, |e| matches!(e, BotEvent::Ready)).await?;

    let member = |guild: u64| {
        json!({
            "guild_id": guild.to_string(),
            "user": {"id": "77", "username": "shared"},
        })
    };
    gateway.push(0, dispatch("GUILD_MEMBER_ADD", 1, member(first)))?;
    gateway.push(0, dispatch("GUILD_MEMBER_ADD", 2, member(second)))?;
    gateway.push(0, dispatch("GUILD_MEMBER_REMOVE", 3, member(first)))?;

    wait_for_event(&mut events, |e| {
        matches!(e, BotEvent::Entity(EntityEvent::MemberLeft { .. }))
    })
    .await?;

    let cache = client.cache().unwrap();
    let user_id = Snowflake::new(77);
    assert_eq!(cache.user(user_id).unwrap().username, "shared");
    assert!(cache.member(Snowflake::new(first), user_id).is_none());
    assert!(cache.member(Snowflake::new(second), user_id).is_some());

    gateway.push(0, dispatch("GUILD_MEMBER_REMOVE", 4, member(second)))?;
    wait_for_event(&mut events, |e| {
        matches!(e, BotEvent::Entity(EntityEvent::MemberLeft { .. }))
    })
    .await?;
    assert!(cache.user(user_id).is_none());

    client.logout().await?;
    Ok(())
}
