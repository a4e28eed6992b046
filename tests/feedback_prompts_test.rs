mod common;

use std::collections::BTreeMap;

use anyhow::Result;
use chat_metadata_store::entity::message_feedback::{Rating, ReportedIssue, ReviewAction};
use chat_metadata_store::entity::system_prompt_template::PromptCategory;
use chat_metadata_store::types::{FeedbackCategories, FeedbackCategory, PromptVariables};
use chat_metadata_store::{FeedbackReview, NewFeedback, NewPromptTemplate, NewSession, StoreError};
use uuid::Uuid;

use common::{create_test_user, test_store};

#[tokio::test]
async fn feedback_is_unique_per_message_and_user() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    let mut new = NewFeedback::new(session.id, "checkpoint-7", 3, Rating::ThumbsDown);
    new.categories = FeedbackCategories::new([FeedbackCategory::Incorrect, FeedbackCategory::TooLong]);
    new.reported_issue = Some(ReportedIssue::Incorrect);
    new.message_preview = Some("x".repeat(800));
    let feedback = store.submit_feedback(user_id, new).await?;

    assert_eq!(feedback.message_preview.as_ref().map(|p| p.chars().count()), Some(500));
    assert_eq!(feedback.feedback_categories.as_slice().len(), 2);
    assert!(!feedback.reviewed);

    let err = store
        .submit_feedback(user_id, NewFeedback::new(session.id, "checkpoint-7", 3, Rating::ThumbsUp))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    store
        .submit_feedback(user_id, NewFeedback::new(session.id, "checkpoint-7", 4, Rating::ThumbsUp))
        .await?;
    assert_eq!(store.session_feedback(user_id, session.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn feedback_requires_session_ownership() -> Result<()> {
    let store = test_store().await?;
    let owner = create_test_user(&store).await?;
    let other = create_test_user(&store).await?;
    let session = store.create_session(owner, NewSession::default()).await?;

    let err = store
        .submit_feedback(other, NewFeedback::new(session.id, "cp", 0, Rating::Excellent))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = store
        .submit_feedback(owner, NewFeedback::new(session.id, "cp", -1, Rating::Excellent))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "message_index", .. }));
    Ok(())
}

#[tokio::test]
async fn satisfaction_and_review() -> Result<()> {
    let store = test_store().await?;
    let user_id = create_test_user(&store).await?;
    let session = store.create_session(user_id, NewSession::default()).await?;

    for (index, rating) in [Rating::ThumbsUp, Rating::Excellent, Rating::Neutral, Rating::Poor]
        .into_iter()
        .enumerate()
    {
        store
            .submit_feedback(user_id, NewFeedback::new(session.id, "cp", index as i32, rating))
            .await?;
    }

    let stats = store.session_satisfaction(user_id, session.id).await?;
    assert_eq!(stats.total, 4);
    assert_eq!(stats.positive, 2);
    assert_eq!(stats.negative, 1);
    assert_eq!(stats.neutral, 1);
    assert_eq!(stats.satisfaction_rate, 50.0);
    assert_eq!(store.user_satisfaction(user_id).await?, stats);

    let pending = store.pending_feedback(10).await?;
    assert_eq!(pending.len(), 4);

    let reviewer = create_test_user(&store).await?;
    let reviewed = store
        .review_feedback(
            pending[0].id,
            FeedbackReview {
                reviewer_id: reviewer,
                action_taken: ReviewAction::Noted,
                admin_notes: Some("looks fine".to_string()),
            },
        )
        .await?;
    assert!(reviewed.reviewed);
    assert_eq!(reviewed.reviewed_by, Some(reviewer));
    assert_eq!(reviewed.action_taken, Some(ReviewAction::Noted));
    assert_eq!(store.pending_feedback(10).await?.len(), 3);

    assert!(store
        .review_feedback(
            Uuid::new_v4(),
            FeedbackReview {
                reviewer_id: reviewer,
                action_taken: ReviewAction::NoAction,
                admin_notes: None,
            },
        )
        .await
        .unwrap_err()
        .is_not_found());
    Ok(())
}

fn tutor() -> NewPromptTemplate {
    let mut new = NewPromptTemplate::new(
        "Patient tutor",
        "patient-tutor",
        "You teach {topic} to {user_name}.",
        PromptCategory::Education,
    );
    new.variables = PromptVariables::new(["topic", "user_name"]).unwrap();
    new
}

#[tokio::test]
async fn templates_render_and_rate() -> Result<()> {
    let store = test_store().await?;
    let template = store.create_prompt_template(tutor()).await?;

    let err = store.create_prompt_template(tutor()).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let loaded = store.prompt_template("patient-tutor").await?;
    let mut values = BTreeMap::new();
    values.insert("topic".to_string(), "ownership".to_string());
    assert!(loaded.render_strict(&values).is_err());
    values.insert("user_name".to_string(), "Kai".to_string());
    assert_eq!(loaded.render_strict(&values)?, "You teach ownership to Kai.");

    store.increment_prompt_usage(template.id).await?;
    store.increment_prompt_usage(template.id).await?;
    assert_eq!(store.prompt_template("patient-tutor").await?.usage_count, 2);

    assert_eq!(store.rate_prompt_template(template.id, 5).await?, 5.0);
    assert_eq!(store.rate_prompt_template(template.id, 4).await?, 4.5);
    let err = store.rate_prompt_template(template.id, 6).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "rating", .. }));
    assert_eq!(store.prompt_average_rating(template.id).await?, 4.5);
    Ok(())
}

#[tokio::test]
async fn template_lookups() -> Result<()> {
    let store = test_store().await?;

    let mut first = NewPromptTemplate::new("General", "general", "Be helpful.", PromptCategory::General);
    first.is_default = true;
    let first = store.create_prompt_template(first).await?;

    let mut second = NewPromptTemplate::new("Reviewer", "reviewer", "Review code.", PromptCategory::Coding);
    second.is_default = true;
    let second = store.create_prompt_template(second).await?;

    let mut private = NewPromptTemplate::new("Internal", "internal", "Secret.", PromptCategory::Coding);
    private.is_public = false;
    store.create_prompt_template(private).await?;

    assert_eq!(store.default_prompt_template().await?.map(|t| t.id), Some(second.id));
    assert_eq!(store.public_prompt_templates().await?.len(), 2);
    assert_eq!(store.prompt_templates_by_category(PromptCategory::Coding).await?.len(), 2);
    assert_eq!(
        store.prompt_templates_by_category(PromptCategory::General).await?[0].id,
        first.id
    );

    let err = store
        .create_prompt_template(NewPromptTemplate::new("Bad", "Bad Slug", "x", PromptCategory::Custom))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "slug", .. }));
    assert!(store.prompt_template("missing").await.unwrap_err().is_not_found());
    Ok(())
}
