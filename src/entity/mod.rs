//! Database entity models for chat-metadata-store.
//!
//! This module contains the Sea-ORM entity definitions behind
//! [`MetadataStore`](crate::MetadataStore). Every user-owned table references
//! `users` with `ON DELETE CASCADE`; rows that belong to a chat session
//! reference `chat_sessions` the same way, so removing a session removes its
//! usage, feedback and documents.

pub mod available_tool;
/// Cache rows written by [`DatabaseCache`](crate::cache::DatabaseCache).
pub mod cache_entry;
pub mod chat_session;
pub mod message_feedback;
pub mod system_prompt_template;
pub mod token_usage;
pub mod tool_invocation;
pub mod user;
pub mod user_api_key;
pub mod user_document;
pub mod user_preference;
pub mod user_tool;

pub mod prelude {
    pub use super::available_tool::Entity as AvailableTool;
    pub use super::cache_entry::Entity as CacheEntry;
    pub use super::chat_session::Entity as ChatSession;
    pub use super::message_feedback::Entity as MessageFeedback;
    pub use super::system_prompt_template::Entity as SystemPromptTemplate;
    pub use super::token_usage::Entity as TokenUsage;
    pub use super::tool_invocation::Entity as ToolInvocation;
    pub use super::user::Entity as User;
    pub use super::user_api_key::Entity as UserApiKey;
    pub use super::user_document::Entity as UserDocument;
    pub use super::user_preference::Entity as UserPreference;
    pub use super::user_tool::Entity as UserTool;
}
