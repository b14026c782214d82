//! Gateway session scenarios
//!
//! Run with: cargo test -p integration-tests --test session_tests

use anyhow::Result;
use serde_json::json;

use chat_client::{BotEvent, EntityEvent};
use chat_common::StartupFetchMode;
use chat_core::Snowflake;
use chat_gateway::GatewayError;
use integration_tests::*;

#[tokio::test]
async fn test_identify_ready_then_resume_without_refetch() -> Result<()> {
    let guilds = vec![guild_on_shard(1, 0, 1), guild_on_shard(2, 0, 1)];
    let gateway = MockGateway::start(guilds.clone()).await?;
    let rest = MockRest::start(gateway.url(), 1).await?;
    let (client, mut events) =
        login_client(&rest, StartupFetchMode::Synchronous, None).await?;

    let identify = gateway.next_frame().await?;
    assert_eq!(identify.op(), 2);
    assert_eq!(identify.frame["d"]["token"], "Bot 101.secret");
    assert_eq!(identify.frame["d"]["shard"], json!([0, 1]));

    wait_for_event(&mut events, |e| matches!(e, BotEvent::Ready)).await?;
    let coordinator = client.coordinator().unwrap();
    let session = coordinator.manager(0).unwrap().session();
    assert_eq!(session.session_id().as_deref(), Some("s0-0"));
    assert_eq!(session.last_sequence(), Some(0));
    assert_eq!(rest.guild_fetches(), 2);

    let cache = client.cache().unwrap();
    assert!(cache.all_guilds_available());

    gateway.push(
        0,
        dispatch(
            "GUILD_UPDATE",
            1,
            json!({"id": guilds[0].to_string(), "description": "updated"}),
        ),
    )?;
    gateway.push(0, reconnect())?;

    wait_for_event(&mut events, |e| {
        matches!(e, BotEvent::ShardResumed { shard_id: 0 })
    })
    .await?;

    let resume = gateway.next_frame().await?;
    assert_eq!(resume.op(), 6);
    assert_eq!(resume.connection, 1);
    assert_eq!(resume.frame["d"]["session_id"], "s0-0");
    assert_eq!(resume.frame["d"]["seq"], 1);

    assert_eq!(session.last_sequence(), Some(2));
    assert_eq!(rest.guild_fetches(), 2);
    assert!(cache.all_guilds_available());
    assert_eq!(
        cache.guild(Snowflake::new(guilds[0])).unwrap().description.as_deref(),
        Some("updated")
    );

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn test_two_shards_route_guild_events() -> Result<()> {
    let on_zero = guild_on_shard(3, 0, 2);
    let on_one = guild_on_shard(3, 1, 2);
    let gateway = MockGateway::start(vec![on_zero, on_one]).await?;
    let rest = MockRest::start(gateway.url(), 2).await?;
    let (client, mut events) =
        login_client(&rest, StartupFetchMode::Synchronous, Some(2)).await?;

    let mut shards = vec![
        gateway.next_frame().await?.frame["d"]["shard"].clone(),
        gateway.next_frame().await?.frame["d"]["shard"].clone(),
    ];
    shards.sort_by_key(|shard| shard[0].as_u64());
    assert_eq!(shards, vec![json!([0, 2]), json!([1, 2])]);

    wait_for_event(&mut events, |e| matches!(e, BotEvent::Ready)).await?;
    assert_eq!(client.shard_for_guild(Snowflake::new(on_zero)), Some(0));
    assert_eq!(client.shard_for_guild(Snowflake::new(on_one)), Some(1));

    gateway.push(
        1,
        dispatch("MESSAGE_CREATE", 1, message(70, 71, Some(on_one), "routed")),
    )?;
    let received = wait_for_event(&mut events, |e| {
        matches!(e, BotEvent::Entity(EntityEvent::MessageReceived { .. }))
    })
    .await?;
    let BotEvent::Entity(EntityEvent::MessageReceived { message, author }) = received else {
        unreachable!();
    };
    assert_eq!(message.guild_id, Some(Snowflake::new(on_one)));
    assert_eq!(author.unwrap().username, "someone");

    let cache = client.cache().unwrap();
    assert!(cache.all_guilds_available());
    assert_eq!(cache.guild_count(), 2);

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn test_authentication_close_stops_shard() -> Result<()> {
    let gateway = MockGateway::start(Vec::new()).await?;
    let rest = MockRest::start(gateway.url(), 1).await?;
    let (client, mut events) = login_client(&rest, StartupFetchMode::Lazy, None).await?;

    wait_for_event(&mut events, |e| matches!(e, BotEvent::Ready)).await?;
    gateway.close(0, 4004)?;

    let stopped = wait_for_event(&mut events, |e| {
        matches!(e, BotEvent::Disconnected { shard_id: 0, .. })
    })
    .await?;
    assert!(matches!(
        stopped,
        BotEvent::Disconnected {
            error: Some(GatewayError::Closed {
                code: Some(4004),
                ..
            }),
            ..
        }
    ));
    assert_eq!(gateway.connection_count(), 1);

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn test_logout_reports_clean_disconnect() -> Result<()> {
    let gateway = MockGateway::start(Vec::new()).await?;
    let rest = MockRest::start(gateway.url(), 1).await?;
    let (client, mut events) = login_client(&rest, StartupFetchMode::Lazy, None).await?;

    wait_for_event(&mut events, |e| matches!(e, BotEvent::Ready)).await?;
    client.logout().await?;

    let stopped = wait_for_event(&mut events, |e| {
        matches!(e, BotEvent::Disconnected { shard_id: 0, .. })
    })
    .await?;
    assert!(matches!(stopped, BotEvent::Disconnected { error: None, .. }));
    assert!(!client.is_logged_in());
    Ok(())
}
