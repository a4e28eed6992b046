use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

use crate::entity::{
    available_tool, cache_entry, chat_session, message_feedback, system_prompt_template,
    token_usage, tool_invocation, user, user_api_key, user_document, user_preference, user_tool,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

impl Migration {
    async fn create<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
    where
        E: EntityTrait,
    {
        let schema = Schema::new(manager.get_database_backend());

        manager
            .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
            .await?;

        for mut index in schema.create_index_from_entity(entity) {
            manager.create_index(index.if_not_exists().to_owned()).await?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Parents before children
        Self::create(manager, user::Entity).await?;
        Self::create(manager, user_preference::Entity).await?;
        Self::create(manager, chat_session::Entity).await?;
        Self::create(manager, user_api_key::Entity).await?;
        Self::create(manager, token_usage::Entity).await?;
        Self::create(manager, message_feedback::Entity).await?;
        Self::create(manager, user_document::Entity).await?;
        Self::create(manager, system_prompt_template::Entity).await?;
        Self::create(manager, available_tool::Entity).await?;
        Self::create(manager, user_tool::Entity).await?;
        Self::create(manager, tool_invocation::Entity).await?;
        Self::create(manager, cache_entry::Entity).await?;

        manager
            .create_index(
                Index::create()
                    .name("uq-message_feedback-checkpoint-index-user")
                    .table(message_feedback::Entity)
                    .col(message_feedback::Column::CheckpointId)
                    .col(message_feedback::Column::MessageIndex)
                    .col(message_feedback::Column::UserId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq-user_tools-user-tool_name")
                    .table(user_tool::Entity)
                    .col(user_tool::Column::UserId)
                    .col(user_tool::Column::ToolName)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq-user_api_keys-user-provider-key_name")
                    .table(user_api_key::Entity)
                    .col(user_api_key::Column::UserId)
                    .col(user_api_key::Column::Provider)
                    .col(user_api_key::Column::KeyName)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-token_usage-user-created_at")
                    .table(token_usage::Entity)
                    .col(token_usage::Column::UserId)
                    .col(token_usage::Column::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-chat_sessions-user-active-updated_at")
                    .table(chat_session::Entity)
                    .col(chat_session::Column::UserId)
                    .col(chat_session::Column::IsActive)
                    .col(chat_session::Column::UpdatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(cache_entry::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(tool_invocation::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(user_tool::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(available_tool::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(system_prompt_template::Entity)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(user_document::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(message_feedback::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(token_usage::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(user_api_key::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(chat_session::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(user_preference::Entity).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(user::Entity).if_exists().to_owned())
            .await?;

        Ok(())
    }
}
