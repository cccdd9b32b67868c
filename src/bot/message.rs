//! Inbound message type shared by the dispatcher and the group record.

use serde::{Deserialize, Serialize};

/// An attachment reference kept for fallback lookups (e.g. "use the last
/// photo as the group image").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub kind: String,
    pub file_id: String,
}

/// A chat message as seen by the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub message_id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Epoch millis.
    pub timestamp: i64,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_group: bool,
}

impl InboundMessage {
    /// Split `/cmd rest` into `("cmd", "rest")`. Strips a `@botname` suffix
    /// from the command the way Telegram group commands arrive.
    pub fn command(&self) -> Option<(String, &str)> {
        let text = self.body.trim_start();
        let rest = text.strip_prefix('/')?;
        let (head, tail) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some((name, tail))
    }

    /// File id of the first photo attached, if any.
    pub fn photo_file(&self) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.kind == "photo")
            .map(|a| a.file_id.as_str())
    }
}
