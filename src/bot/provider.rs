//! Chat provider seam. Everything the bot asks of the messaging platform
//! goes through `ChatProvider` so the group logic can run against a fake.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use crate::bot::error::Result;

/// Live thread metadata as reported by the provider.
#[derive(Debug, Clone, Default)]
pub struct ThreadInfo {
    pub name: Option<String>,
    pub emoji: Option<String>,
    pub image: Option<String>,
    /// Hex color without the leading `#`.
    pub color: Option<String>,
    pub nicknames: BTreeMap<String, String>,
    pub admin_ids: Vec<String>,
    pub participant_ids: Vec<String>,
    pub is_group: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub first_name: String,
    pub full_name: Option<String>,
    pub username: Option<String>,
}

/// Outgoing message body.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Text(String),
    /// Text with mentions of the given member ids.
    Mentions { body: String, mentions: Vec<String> },
}

impl OutgoingMessage {
    pub fn body(&self) -> &str {
        match self {
            Self::Text(body) | Self::Mentions { body, .. } => body,
        }
    }
}

impl From<&str> for OutgoingMessage {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for OutgoingMessage {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// The bot's own member id.
    fn bot_id(&self) -> &str;

    /// Returns the id of the sent message.
    async fn send_message(
        &self,
        message: OutgoingMessage,
        thread_id: &str,
        reply_to: Option<&str>,
    ) -> Result<String>;

    async fn get_thread_info(&self, thread_id: &str) -> Result<ThreadInfo>;

    async fn get_user_info(&self, ids: &[String]) -> Result<HashMap<String, UserInfo>>;

    async fn add_user_to_group(&self, user_id: &str, thread_id: &str) -> Result<()>;

    async fn remove_user_from_group(&self, user_id: &str, thread_id: &str) -> Result<()>;

    async fn change_nickname(&self, nickname: &str, thread_id: &str, user_id: &str) -> Result<()>;

    async fn mute_thread(&self, thread_id: &str, mute: bool) -> Result<()>;

    async fn change_group_image(&self, image: Vec<u8>, thread_id: &str) -> Result<()>;

    /// Contents of a file a member sent, by the attachment's file id.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;

    async fn set_message_reaction(&self, reaction: &str, message_id: &str, thread_id: &str) -> Result<()>;
}
