mod common;

use anyhow::Result;
use chat_metadata_store::{NewSession, NewUsage, PreferencesUpdate, SessionFilter, SessionUpdate, StoreError};
use rust_decimal::Decimal;
use uuid::Uuid;

use common::{create_test_user, test_store};

#[tokio::test]
async fn new_session_inherits_preferences() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    let session = store.create_session(user_id, NewSession::default()).await?;
    assert_eq!(session.title, "New Conversation");
    assert_eq!(session.model_name, "gpt-4o-mini");
    assert_eq!(session.temperature, 0.7);
    assert_eq!(session.max_tokens, 2048);
    assert!(session.is_active);
    assert_eq!(session.message_count, 0);

    store
        .update_preferences(
            user_id,
            PreferencesUpdate {
                default_model: Some("gpt-4o".to_string()),
                default_temperature: Some(0.2),
                ..Default::default()
            },
        )
        .await?;

    let session = store
        .create_session(
            user_id,
            NewSession {
                title: Some("Rust questions".to_string()),
                max_tokens: Some(512),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(session.model_name, "gpt-4o");
    assert_eq!(session.temperature, 0.2);
    assert_eq!(session.max_tokens, 512);
    Ok(())
}

#[tokio::test]
async fn invalid_session_settings_are_rejected() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    let err = store
        .create_session(
            user_id,
            NewSession {
                temperature: Some(2.5),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "temperature", .. }));

    let err = store
        .create_session(
            user_id,
            NewSession {
                metadata: Some(serde_json::json!(["not", "an", "object"])),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "metadata", .. }));

    let session = store.create_session(user_id, NewSession::default()).await?;
    let err = store
        .update_session(
            user_id,
            session.id,
            SessionUpdate {
                title: Some("x".repeat(256)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "title", .. }));
    Ok(())
}

#[tokio::test]
async fn sessions_are_private_to_their_owner() -> Result<()> {
    let store = test_store().await?;
    let owner = create_test_user(&store).await?;
    let other = create_test_user(&store).await?;
    let session = store.create_session(owner, NewSession::default()).await?;

    // Warm the cache first so the owner check is exercised on the cached path too
    store.get_session(owner, session.id).await?;
    assert!(store.get_session(other, session.id).await.unwrap_err().is_not_found());
    assert!(store.archive_session(other, session.id).await.unwrap_err().is_not_found());
    assert!(store.hard_delete_session(other, session.id).await.unwrap_err().is_not_found());
    assert!(store.list_sessions(other, SessionFilter::default()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn cached_session_reflects_updates() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    assert_eq!(store.get_session(user_id, session.id).await?.title, "New Conversation");
    store
        .update_session(
            user_id,
            session.id,
            SessionUpdate {
                title: Some("Trip planning".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(store.get_session(user_id, session.id).await?.title, "Trip planning");
    Ok(())
}

#[tokio::test]
async fn listing_orders_pinned_then_recent_activity() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    let chatted = store.create_session(user_id, NewSession::default()).await?;
    let idle = store
        .create_session(
            user_id,
            NewSession {
                title: Some("Idle draft".to_string()),
                ..Default::default()
            },
        )
        .await?;
    let pinned = store.create_session(user_id, NewSession::default()).await?;
    let archived = store.create_session(user_id, NewSession::default()).await?;
    let deleted = store.create_session(user_id, NewSession::default()).await?;

    store
        .record_usage(user_id, NewUsage::chat("gpt-4o-mini", 10, 10).in_session(chatted.id))
        .await?;
    store.pin_session(user_id, pinned.id).await?;
    store.archive_session(user_id, archived.id).await?;
    store.delete_session(user_id, deleted.id).await?;

    let ids: Vec<Uuid> = store
        .list_sessions(user_id, SessionFilter::default())
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![pinned.id, chatted.id, idle.id]);

    let with_archived = store
        .list_sessions(
            user_id,
            SessionFilter {
                include_archived: true,
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(with_archived.len(), 4);
    assert!(with_archived.iter().all(|s| s.id != deleted.id));

    let found = store
        .list_sessions(
            user_id,
            SessionFilter {
                search: Some("draft".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, idle.id);

    let limited = store
        .list_sessions(
            user_id,
            SessionFilter {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(limited.len(), 2);
    Ok(())
}

#[tokio::test]
async fn pin_toggling() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    assert!(store.toggle_pin(user_id, session.id).await?);
    assert!(store.get_session(user_id, session.id).await?.is_pinned);
    assert!(!store.toggle_pin(user_id, session.id).await?);
    assert!(!store.unpin_session(user_id, session.id).await?.is_pinned);
    Ok(())
}

#[tokio::test]
async fn analytics_accumulate() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    store
        .record_session_analytics(user_id, session.id, 2, 300, Decimal::new(15, 4))
        .await?;
    let session = store
        .record_session_analytics(user_id, session.id, 1, 100, Decimal::new(5, 4))
        .await?;

    assert_eq!(session.message_count, 3);
    assert_eq!(session.total_tokens_used, 400);
    assert_eq!(session.total_cost.round_dp(6), Decimal::new(20, 4));
    assert!(session.last_message_at.is_some());

    assert!(store
        .record_session_analytics(user_id, session.id, -1, 0, Decimal::ZERO)
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn thread_ids_round_trip() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let other = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    let config = store.thread_config(user_id, session.id).await?;
    assert_eq!(config.thread_id, session.id.to_string());
    assert_eq!(config.user_id, user_id);
    assert_eq!(config.model_name, session.model_name);

    let resolved = store.resolve_thread(user_id, &config.thread_id).await?;
    assert_eq!(resolved.id, session.id);

    let err = store.resolve_thread(other, &config.thread_id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "thread", .. }));
    assert!(store.resolve_thread(user_id, "not-a-uuid").await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn user_stats_count_every_session() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    let a = store.create_session(user_id, NewSession::default()).await?;
    let b = store.create_session(user_id, NewSession::default()).await?;
    store.create_session(user_id, NewSession::default()).await?;
    store.archive_session(user_id, a.id).await?;
    store.pin_session(user_id, b.id).await?;
    store.record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(a.id)).await?;
    store.record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(b.id)).await?;

    let stats = store.user_stats(user_id).await?;
    assert_eq!(stats.total_sessions, 3);
    assert_eq!(stats.active_sessions, 3);
    assert_eq!(stats.archived_sessions, 1);
    assert_eq!(stats.pinned_sessions, 1);
    assert_eq!(stats.total_messages, 2);
    assert_eq!(stats.total_tokens, 450);
    assert_eq!(stats.total_cost.round_dp(6), Decimal::new(2250, 6));
    Ok(())
}

#[tokio::test]
async fn tags_from_json_requests_are_normalized() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    let new: NewSession =
        serde_json::from_str(r#"{"title":"Tagged","tags":[" work ","","work","ideas"]}"#)?;
    let session = store.create_session(user_id, new).await?;
    assert_eq!(session.tags.as_slice(), &["work".to_string(), "ideas".to_string()]);

    let stored = store.get_session(user_id, session.id).await?;
    assert_eq!(stored.tags, session.tags);
    Ok(())
}
