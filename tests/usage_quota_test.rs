mod common;

use anyhow::Result;
use chat_metadata_store::entity::token_usage::RequestType;
use chat_metadata_store::{
    LimitExceeded, NewDocument, NewFeedback, NewSession, NewUsage, PreferencesUpdate, StoreError,
};
use chat_metadata_store::entity::message_feedback::Rating;
use chrono::Utc;
use rust_decimal::Decimal;

use common::{create_test_user, file_backed_store, test_store};

fn token_limit(daily: i32) -> PreferencesUpdate {
    PreferencesUpdate {
        daily_token_limit: Some(daily),
        daily_message_limit: Some(0),
        ..Default::default()
    }
}

#[tokio::test]
async fn gpt_4o_cost_is_reproducible() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    let usage = store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(session.id))
        .await?;

    assert_eq!(usage.total_tokens, 225);
    assert_eq!(usage.prompt_cost.round_dp(9), Decimal::new(375, 6));
    assert_eq!(usage.completion_cost.round_dp(9), Decimal::new(75, 5));
    assert_eq!(usage.total_cost.round_dp(9), Decimal::new(1125, 6));

    let expected = store.prices().cost("gpt-4o", 150, 75);
    assert_eq!(usage.total_cost.round_dp(9), expected.total_cost);

    let session = store.get_session(user_id, session.id).await?;
    assert_eq!(session.message_count, 1);
    assert_eq!(session.total_tokens_used, 225);
    assert_eq!(session.total_cost.round_dp(9), Decimal::new(1125, 6));
    Ok(())
}

#[tokio::test]
async fn unknown_model_is_billed_at_default_rate() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    let usage = store
        .record_usage(user_id, NewUsage::chat("some-future-model", 1000, 1000))
        .await?;
    let default = store.prices().cost("gpt-4o-mini", 1000, 1000);
    assert_eq!(usage.total_cost.round_dp(9), default.total_cost);
    Ok(())
}

#[tokio::test]
async fn only_chat_requests_count_as_messages() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    let mut summary = NewUsage::chat("gpt-4o-mini", 400, 100).in_session(session.id);
    summary.request_type = RequestType::Summarization;
    store.record_usage(user_id, summary).await?;
    store
        .record_usage(user_id, NewUsage::chat("gpt-4o-mini", 10, 20).in_session(session.id))
        .await?;

    let session = store.get_session(user_id, session.id).await?;
    assert_eq!(session.message_count, 1);
    assert_eq!(session.total_tokens_used, 530);
    Ok(())
}

#[tokio::test]
async fn usage_in_foreign_session_is_rejected() -> Result<()> {
    let store = test_store().await?;
    let owner = create_test_user(&store).await?;
    let intruder = create_test_user(&store).await?;
    let session = store.create_session(owner, NewSession::default()).await?;

    let err = store
        .record_usage(intruder, NewUsage::chat("gpt-4o", 1, 1).in_session(session.id))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.usage_stats(intruder, 1).await?.total_requests, 0);
    Ok(())
}

#[tokio::test]
async fn daily_limit_boundary() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    store.update_preferences(user_id, token_limit(1000)).await?;

    store.record_usage(user_id, NewUsage::chat("gpt-4o-mini", 500, 450)).await?;

    let check = store.check_user_limits(user_id, 100).await?;
    assert!(!check.is_allowed());
    assert_eq!(check.usage.tokens_today, 950);
    assert!(check.reason().unwrap().contains("1000"));

    assert!(store.check_user_limits(user_id, 50).await?.is_allowed());
    assert!(!store.check_user_limits(user_id, 51).await?.is_allowed());
    Ok(())
}

#[tokio::test]
async fn message_limit_counts_todays_requests() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    store
        .update_preferences(
            user_id,
            PreferencesUpdate {
                daily_message_limit: Some(2),
                daily_token_limit: Some(0),
                ..Default::default()
            },
        )
        .await?;

    store.record_usage(user_id, NewUsage::chat("gpt-4o-mini", 1, 1)).await?;
    assert!(store.check_user_limits(user_id, 0).await?.is_allowed());
    store.record_usage(user_id, NewUsage::chat("gpt-4o-mini", 1, 1)).await?;

    let check = store.check_user_limits(user_id, 0).await?;
    assert_eq!(check.reason().as_deref(), Some("Daily message limit reached (2)"));
    Ok(())
}

#[tokio::test]
async fn users_without_preferences_are_unlimited() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    store.record_usage(user_id, NewUsage::chat("gpt-4o", 90_000, 0)).await?;
    assert!(store.check_user_limits(user_id, 1_000_000).await?.is_allowed());
    Ok(())
}

#[tokio::test]
async fn quota_enforced_recording_writes_nothing_when_refused() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;
    store.update_preferences(user_id, token_limit(1000)).await?;

    store
        .record_usage_within_quota(user_id, NewUsage::chat("gpt-4o", 600, 350).in_session(session.id))
        .await?;

    let err = store
        .record_usage_within_quota(user_id, NewUsage::chat("gpt-4o", 60, 40).in_session(session.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::LimitExceeded(LimitExceeded::DailyTokens { limit: 1000, used: 950, requested: 100 })
    ));

    let session = store.get_session(user_id, session.id).await?;
    assert_eq!(session.message_count, 1);
    assert_eq!(session.total_tokens_used, 950);

    store
        .record_usage_within_quota(user_id, NewUsage::chat("gpt-4o", 30, 20).in_session(session.id))
        .await?;
    assert_eq!(store.check_user_limits(user_id, 0).await?.usage.tokens_today, 1000);
    Ok(())
}

#[tokio::test]
async fn concurrent_quota_recording_never_overshoots() -> Result<()> {
    let (store, _dir) = file_backed_store(8).await?;
    let user_id = create_test_user(&store).await?;
    store.update_preferences(user_id, token_limit(1000)).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .record_usage_within_quota(user_id, NewUsage::chat("gpt-4o-mini", 150, 50))
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => accepted += 1,
            Err(StoreError::LimitExceeded(_)) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(store.check_user_limits(user_id, 0).await?.usage.tokens_today, 1000);
    Ok(())
}

#[tokio::test]
async fn negative_token_requests_are_rejected() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    store.update_preferences(user_id, token_limit(1000)).await?;
    store.record_usage(user_id, NewUsage::chat("gpt-4o-mini", 1000, 500)).await?;

    let err = store.check_user_limits(user_id, -600).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "additional_tokens", .. }));
    assert!(!store.check_user_limits(user_id, i64::MAX).await?.is_allowed());
    Ok(())
}

#[tokio::test]
async fn usage_stats_reject_out_of_range_periods() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    let err = store.usage_stats(user_id, 200_000_000).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "days", .. }));
    assert_eq!(store.usage_stats(user_id, 36_500).await?.total_requests, 0);
    Ok(())
}

#[tokio::test]
async fn usage_statistics_break_down_by_model() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;

    store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).with_response_time(200))
        .await?;
    store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).with_response_time(400))
        .await?;
    store.record_usage(user_id, NewUsage::chat("gpt-4o-mini", 100, 100)).await?;

    let stats = store.usage_stats(user_id, 30).await?;
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.total_tokens, 650);
    assert!((stats.avg_tokens_per_request - 650.0 / 3.0).abs() < 1e-9);
    assert_eq!(stats.avg_response_time_ms, Some(300.0));
    assert_eq!(stats.by_model.len(), 2);
    assert_eq!(stats.by_model[0].model_name, "gpt-4o");
    assert_eq!(stats.by_model[0].requests, 2);
    assert_eq!(stats.by_model[0].tokens, 450);

    let today = store.daily_usage(user_id, Utc::now().date_naive()).await?;
    assert_eq!(today.total_requests, 3);
    assert_eq!(today.total_tokens, 650);

    let yesterday = Utc::now().date_naive().pred_opt().unwrap();
    assert_eq!(store.daily_usage(user_id, yesterday).await?.total_requests, 0);
    Ok(())
}

#[tokio::test]
async fn session_stats_combine_usage_and_feedback() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(session.id).with_response_time(100))
        .await?;
    store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(session.id).with_response_time(300))
        .await?;
    store
        .submit_feedback(user_id, NewFeedback::new(session.id, "cp-1", 0, Rating::ThumbsUp))
        .await?;
    store
        .submit_feedback(user_id, NewFeedback::new(session.id, "cp-1", 1, Rating::ThumbsDown))
        .await?;

    let stats = store.session_stats(user_id, session.id).await?;
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.total_tokens, 450);
    assert_eq!(stats.total_cost.round_dp(9), Decimal::new(2250, 6));
    assert_eq!(stats.avg_response_time_ms, Some(200.0));
    assert_eq!(stats.feedback_count, 2);
    assert_eq!(stats.satisfaction_rate, Some(50.0));
    Ok(())
}

#[tokio::test]
async fn hard_delete_removes_dependent_rows() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;
    let kept = store.create_session(user_id, NewSession::default()).await?;

    store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(session.id))
        .await?;
    store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(kept.id))
        .await?;
    store
        .submit_feedback(user_id, NewFeedback::new(session.id, "cp-1", 0, Rating::Good))
        .await?;
    let document = store
        .create_document(
            user_id,
            NewDocument {
                file_name: "notes.md".to_string(),
                file_type: "text/markdown".to_string(),
                file_size: 2048,
                chat_session_id: Some(session.id),
                ..Default::default()
            },
        )
        .await?;

    let thread_id = store.hard_delete_session(user_id, session.id).await?;
    assert_eq!(thread_id, session.id.to_string());

    assert!(store.get_session(user_id, session.id).await.unwrap_err().is_not_found());
    assert!(store.resolve_thread(user_id, &thread_id).await.unwrap_err().is_not_found());
    assert_eq!(store.usage_stats(user_id, 1).await?.total_requests, 1);
    assert_eq!(store.user_satisfaction(user_id).await?.total, 0);
    assert_eq!(store.get_session(user_id, kept.id).await?.message_count, 1);
    assert!(store.get_document(user_id, document.id).await.unwrap_err().is_not_found());
    assert!(store.list_documents(user_id, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_removes_everything_they_own() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let other = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;
    let other_session = store.create_session(other, NewSession::default()).await?;

    store
        .record_usage(user_id, NewUsage::chat("gpt-4o", 150, 75).in_session(session.id))
        .await?;
    store
        .record_usage(other, NewUsage::chat("gpt-4o", 150, 75).in_session(other_session.id))
        .await?;
    store
        .submit_feedback(user_id, NewFeedback::new(session.id, "cp-1", 0, Rating::Good))
        .await?;
    let document = store
        .create_document(
            user_id,
            NewDocument {
                file_name: "report.pdf".to_string(),
                file_type: "application/pdf".to_string(),
                file_size: 4096,
                ..Default::default()
            },
        )
        .await?;
    store.get_or_create_preferences(user_id).await?;
    // Warm the cache so the delete has to invalidate it
    store.get_session(user_id, session.id).await?;

    store.delete_user(user_id).await?;

    assert!(store.get_user(user_id).await.unwrap_err().is_not_found());
    assert!(store.get_session(user_id, session.id).await.unwrap_err().is_not_found());
    assert!(store.get_document(user_id, document.id).await.unwrap_err().is_not_found());
    assert_eq!(store.usage_stats(user_id, 1).await?.total_requests, 0);
    assert_eq!(store.user_satisfaction(user_id).await?.total, 0);
    assert!(store.delete_user(user_id).await.unwrap_err().is_not_found());

    assert_eq!(store.get_session(other, other_session.id).await?.message_count, 1);
    assert_eq!(store.usage_stats(other, 1).await?.total_requests, 1);
    Ok(())
}
