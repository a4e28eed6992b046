mod common;

use anyhow::Result;
use chat_metadata_store::entity::available_tool::ToolCategory;
use chat_metadata_store::entity::user_tool::RateLimitPeriod;
use chat_metadata_store::types::{ConfigKind, ConfigSchema, ConfigValue, ToolConfiguration};
use chat_metadata_store::{LimitExceeded, MetadataStore, NewCatalogTool, StoreError};
use chrono::{Duration, Utc};
use uuid::Uuid;

use common::{create_test_user, file_backed_store, test_store};

async fn register_search(store: &MetadataStore, rate_limit: Option<i32>) -> Result<()> {
    let mut tool = NewCatalogTool::new("web_search", "Web Search", ToolCategory::Search);
    tool.config_schema = ConfigSchema::default()
        .field("engine", ConfigKind::Text, true)
        .field("max_results", ConfigKind::Integer, false);
    tool.default_config = ToolConfiguration::new().set("max_results", 5i64);
    tool.default_rate_limit = rate_limit;
    tool.default_rate_limit_period = RateLimitPeriod::Hour;
    store.register_tool(tool).await?;
    Ok(())
}

#[tokio::test]
async fn catalog_registration_validates_defaults() -> Result<()> {
    let store = test_store().await?;
    register_search(&store, None).await?;

    let err = register_search(&store, None).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Conflict(_))));

    let mut bad = NewCatalogTool::new("calculator", "Calculator", ToolCategory::Utility);
    bad.default_config = ToolConfiguration::new().set("precision", 2i64);
    let err = store.register_tool(bad).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "default_config", .. }));

    let catalog = store.list_catalog().await?;
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].tool_name, "web_search");
    Ok(())
}

#[tokio::test]
async fn enabling_merges_and_validates_configuration() -> Result<()> {
    let store = test_store().await?;
    register_search(&store, None).await?;
    let user_id = create_test_user(&store).await?;

    let err = store
        .enable_tool(user_id, "web_search", ToolConfiguration::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { field: "configuration", .. }));

    let err = store
        .enable_tool(user_id, "web_search", ToolConfiguration::new().set("engine", 42i64))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));

    let tool = store
        .enable_tool(user_id, "web_search", ToolConfiguration::new().set("engine", "kagi"))
        .await?;
    assert!(tool.is_usable());

    let config = store.tool_config(user_id, "web_search").await?;
    assert_eq!(config.get("engine"), Some(&ConfigValue::Text("kagi".to_string())));
    assert_eq!(config.get("max_results"), Some(&ConfigValue::Integer(5)));

    assert!(store
        .enable_tool(user_id, "no_such_tool", ToolConfiguration::new())
        .await
        .unwrap_err()
        .is_not_found());
    Ok(())
}

#[tokio::test]
async fn catalog_counts_enabled_users() -> Result<()> {
    let store = test_store().await?;
    register_search(&store, None).await?;
    let a = create_test_user(&store).await?;
    let b = create_test_user(&store).await?;
    let config = ToolConfiguration::new().set("engine", "bing");

    store.enable_tool(a, "web_search", config.clone()).await?;
    store.enable_tool(b, "web_search", config.clone()).await?;
    // Re-enabling an enabled tool is not a new user
    store.enable_tool(a, "web_search", config.clone()).await?;
    assert_eq!(store.list_catalog().await?[0].total_users, 2);

    store.disable_tool(a, "web_search").await?;
    store.disable_tool(a, "web_search").await?;
    assert_eq!(store.list_catalog().await?[0].total_users, 1);
    assert!(store.user_tools(a).await?.is_empty());
    assert_eq!(store.user_tools(b).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn approval_gates_usage() -> Result<()> {
    let store = test_store().await?;
    let mut tool = NewCatalogTool::new("code_runner", "Code Runner", ToolCategory::Code);
    tool.requires_admin_approval = true;
    store.register_tool(tool).await?;
    let user_id = create_test_user(&store).await?;

    let enabled = store
        .enable_tool(user_id, "code_runner", ToolConfiguration::new())
        .await?;
    assert!(!enabled.is_approved);
    assert!(store.user_tools(user_id).await?.is_empty());

    let status = store.check_tool_rate_limit(user_id, "code_runner").await?;
    assert!(!status.is_allowed());
    let err = store.use_tool(user_id, "code_runner").await.unwrap_err();
    assert!(matches!(err, StoreError::LimitExceeded(LimitExceeded::ToolNotApproved { .. })));

    let admin = Uuid::new_v4();
    let approved = store.approve_tool(enabled.id, admin).await?;
    assert_eq!(approved.approved_by, Some(admin));
    assert_eq!(store.user_tools(user_id).await?.len(), 1);
    assert!(store.use_tool(user_id, "code_runner").await.is_ok());
    Ok(())
}

#[tokio::test]
async fn rate_limit_counts_uses_in_window() -> Result<()> {
    let store = test_store().await?;
    register_search(&store, Some(3)).await?;
    let user_id = create_test_user(&store).await?;
    store
        .enable_tool(user_id, "web_search", ToolConfiguration::new().set("engine", "bing"))
        .await?;

    let status = store.check_tool_rate_limit(user_id, "web_search").await?;
    assert!(status.is_allowed());
    assert_eq!(status.limit, Some(3));
    assert_eq!(status.remaining, Some(3));

    let first = store.use_tool(user_id, "web_search").await?;
    assert_eq!(first.usage_count, 1);
    assert_eq!(first.remaining, Some(2));
    store.use_tool(user_id, "web_search").await?;
    store.record_tool_use(user_id, "web_search").await?;

    let status = store.check_tool_rate_limit(user_id, "web_search").await?;
    assert!(!status.is_allowed());
    assert_eq!(status.current_usage, 3);
    assert_eq!(status.remaining, Some(0));
    assert!(status.reset_at.is_some());

    let err = store.use_tool(user_id, "web_search").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::LimitExceeded(LimitExceeded::ToolRate { limit: 3, period: RateLimitPeriod::Hour, .. })
    ));

    // Lifting the limit allows further use
    store
        .set_rate_limit(user_id, "web_search", None, RateLimitPeriod::Hour)
        .await?;
    let used = store.use_tool(user_id, "web_search").await?;
    assert_eq!(used.usage_count, 4);
    assert_eq!(used.remaining, None);
    Ok(())
}

#[tokio::test]
async fn unknown_or_disabled_tools_are_denied() -> Result<()> {
    let store = test_store().await?;
    register_search(&store, None).await?;
    let user_id = create_test_user(&store).await?;

    let status = store.check_tool_rate_limit(user_id, "web_search").await?;
    assert!(!status.is_allowed());
    assert_eq!(status.decision.reason().as_deref(), Some("Tool web_search is not enabled"));

    store
        .enable_tool(user_id, "web_search", ToolConfiguration::new().set("engine", "bing"))
        .await?;
    store.disable_tool(user_id, "web_search").await?;
    let err = store.use_tool(user_id, "web_search").await.unwrap_err();
    assert!(matches!(err, StoreError::LimitExceeded(LimitExceeded::ToolNotEnabled { .. })));

    assert!(store
        .set_rate_limit(user_id, "web_search", Some(0), RateLimitPeriod::Minute)
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn concurrent_tool_use_respects_rate_limit() -> Result<()> {
    let (store, _dir) = file_backed_store(8).await?;
    register_search(&store, Some(3)).await?;
    let user_id = create_test_user(&store).await?;
    store
        .enable_tool(user_id, "web_search", ToolConfiguration::new().set("engine", "bing"))
        .await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.use_tool(user_id, "web_search").await }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => accepted += 1,
            Err(StoreError::LimitExceeded(LimitExceeded::ToolRate { .. })) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(accepted, 3);
    let status = store.check_tool_rate_limit(user_id, "web_search").await?;
    assert_eq!(status.current_usage, 3);
    assert_eq!(store.user_tools(user_id).await?[0].usage_count, 3);
    Ok(())
}

#[tokio::test]
async fn purging_old_invocations_keeps_recent_ones() -> Result<()> {
    let store = test_store().await?;
    register_search(&store, Some(10)).await?;
    let user_id = create_test_user(&store).await?;
    store
        .enable_tool(user_id, "web_search", ToolConfiguration::new().set("engine", "bing"))
        .await?;
    store.use_tool(user_id, "web_search").await?;
    store.use_tool(user_id, "web_search").await?;

    assert_eq!(store.purge_tool_invocations(Utc::now() - Duration::days(1)).await?, 0);
    assert_eq!(store.check_tool_rate_limit(user_id, "web_search").await?.current_usage, 2);

    assert_eq!(store.purge_tool_invocations(Utc::now() + Duration::seconds(1)).await?, 2);
    let status = store.check_tool_rate_limit(user_id, "web_search").await?;
    assert_eq!(status.current_usage, 0);
    // The lifetime counter is kept
    assert_eq!(store.user_tools(user_id).await?[0].usage_count, 2);
    Ok(())
}
