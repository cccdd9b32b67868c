//! Telegram provider using teloxide.
//!
//! The Bot API cannot list every member of a group, so a thread's
//! participants are its admins plus everyone the bot has seen post there.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberKind, FileId, InputFile, MessageId, ParseMode, ReactionType, ReplyParameters};
use teloxide::utils::html;
use tracing::{info, warn};

use crate::bot::error::{BotError, Result};
use crate::bot::provider::{ChatProvider, OutgoingMessage, ThreadInfo, UserInfo};

#[derive(Default)]
struct Seen {
    /// chat id -> user ids that posted there
    members: HashMap<String, BTreeSet<String>>,
    users: HashMap<String, UserInfo>,
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
    bot_id: String,
    seen: Mutex<Seen>,
}

fn parse_chat(thread_id: &str) -> Result<ChatId> {
    thread_id
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| BotError::Provider(format!("not a Telegram chat id: {thread_id}")))
}

fn parse_user(user_id: &str) -> Result<UserId> {
    user_id
        .parse::<u64>()
        .map(UserId)
        .map_err(|_| BotError::Provider(format!("not a Telegram user id: {user_id}")))
}

fn parse_message(message_id: &str) -> Result<MessageId> {
    message_id
        .parse::<i32>()
        .map(MessageId)
        .map_err(|_| BotError::Provider(format!("not a Telegram message id: {message_id}")))
}

fn user_info(user: &teloxide::types::User) -> UserInfo {
    UserInfo {
        first_name: user.first_name.clone(),
        full_name: Some(user.full_name()),
        username: user.username.clone(),
    }
}

/// HTML body with a mention link appended for each id.
fn render_mentions(body: &str, mentions: &[String], names: &HashMap<String, UserInfo>) -> String {
    let mut text = html::escape(body);
    for id in mentions {
        let name = names.get(id).map(|u| u.first_name.as_str()).unwrap_or("you");
        text.push_str(&format!(" <a href=\"tg://user?id={}\">{}</a>", id, html::escape(name)));
    }
    text
}

impl TelegramClient {
    pub fn new(bot: Bot, bot_id: impl Into<String>) -> Self {
        Self {
            bot,
            bot_id: bot_id.into(),
            seen: Mutex::new(Seen::default()),
        }
    }

    fn seen(&self) -> Result<std::sync::MutexGuard<'_, Seen>> {
        self.seen
            .lock()
            .map_err(|_| BotError::Provider("member cache lock poisoned".into()))
    }

    /// Record the sender of an inbound message as a participant of its chat.
    pub fn observe(&self, msg: &Message) {
        let Some(user) = msg.from.as_ref() else { return };
        if user.is_bot {
            return;
        }
        let Ok(mut seen) = self.seen() else { return };
        let user_id = user.id.0.to_string();
        seen.members
            .entry(msg.chat.id.0.to_string())
            .or_default()
            .insert(user_id.clone());
        seen.users.insert(user_id, user_info(user));
    }
}

#[async_trait]
impl ChatProvider for TelegramClient {
    fn bot_id(&self) -> &str {
        &self.bot_id
    }

    async fn send_message(
        &self,
        message: OutgoingMessage,
        thread_id: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let chat_id = parse_chat(thread_id)?;
        let text = match &message {
            OutgoingMessage::Text(body) => html::escape(body),
            OutgoingMessage::Mentions { body, mentions } => {
                let seen = self.seen()?;
                render_mentions(body, mentions, &seen.users)
            }
        };

        let mut request = self.bot.send_message(chat_id, text).parse_mode(ParseMode::Html);
        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(parse_message(msg_id)?));
        }

        request.await.map(|msg| msg.id.0.to_string()).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            BotError::Provider(msg)
        })
    }

    async fn get_thread_info(&self, thread_id: &str) -> Result<ThreadInfo> {
        let chat_id = parse_chat(thread_id)?;
        let chat = self
            .bot
            .get_chat(chat_id)
            .await
            .map_err(|e| BotError::Provider(format!("Failed to get chat: {e}")))?;

        // Group ids are negative; private chats have no admin list.
        let is_group = chat_id.0 < 0;
        let mut admin_ids = Vec::new();
        let mut participants: BTreeSet<String> = BTreeSet::new();
        let mut nicknames = std::collections::BTreeMap::new();

        if is_group {
            let admins = self
                .bot
                .get_chat_administrators(chat_id)
                .await
                .map_err(|e| BotError::Provider(format!("Failed to get chat admins: {e}")))?;
            let mut seen = self.seen()?;
            for member in admins {
                let id = member.user.id.0.to_string();
                let title = match &member.kind {
                    ChatMemberKind::Owner(o) => o.custom_title.clone(),
                    ChatMemberKind::Administrator(a) => a.custom_title.clone(),
                    _ => None,
                };
                if let Some(title) = title {
                    nicknames.insert(id.clone(), title);
                }
                if !member.user.is_bot {
                    seen.users.insert(id.clone(), user_info(&member.user));
                }
                admin_ids.push(id.clone());
                participants.insert(id);
            }
            if let Some(members) = seen.members.get(thread_id) {
                participants.extend(members.iter().cloned());
            }
        } else {
            participants.insert(thread_id.to_string());
        }
        participants.insert(self.bot_id.clone());

        Ok(ThreadInfo {
            name: chat.title().map(str::to_owned),
            emoji: None,
            image: None,
            color: None,
            nicknames,
            admin_ids,
            participant_ids: participants.into_iter().collect(),
            is_group,
        })
    }

    async fn get_user_info(&self, ids: &[String]) -> Result<HashMap<String, UserInfo>> {
        let seen = self.seen()?;
        Ok(ids
            .iter()
            .filter_map(|id| seen.users.get(id).map(|u| (id.clone(), u.clone())))
            .collect())
    }

    async fn add_user_to_group(&self, user_id: &str, thread_id: &str) -> Result<()> {
        info!("Letting user {} back into chat {}", user_id, thread_id);
        self.bot
            .unban_chat_member(parse_chat(thread_id)?, parse_user(user_id)?)
            .await
            .map_err(|e| {
                let msg = format!("Failed to unban user: {e}");
                warn!("{}", msg);
                BotError::Provider(msg)
            })?;
        Ok(())
    }

    /// Kick: ban then unban so they can rejoin.
    async fn remove_user_from_group(&self, user_id: &str, thread_id: &str) -> Result<()> {
        info!("👢 Kicking user {} from chat {}", user_id, thread_id);
        let chat_id = parse_chat(thread_id)?;
        let user = parse_user(user_id)?;

        self.bot.ban_chat_member(chat_id, user).await.map_err(|e| {
            let msg = format!("Failed to kick user: {e}");
            warn!("{}", msg);
            BotError::Provider(msg)
        })?;
        self.bot.unban_chat_member(chat_id, user).await.map_err(|e| {
            let msg = format!("Failed to unban after kick: {e}");
            warn!("{}", msg);
            BotError::Provider(msg)
        })?;

        if let Ok(mut seen) = self.seen()
            && let Some(members) = seen.members.get_mut(thread_id)
        {
            members.remove(user_id);
        }
        Ok(())
    }

    async fn change_nickname(&self, nickname: &str, thread_id: &str, user_id: &str) -> Result<()> {
        // Bots can't set per-chat display names.
        info!("Skipping nickname \"{}\" for {} in {}", nickname, user_id, thread_id);
        Ok(())
    }

    async fn mute_thread(&self, thread_id: &str, mute: bool) -> Result<()> {
        info!("Skipping notification mute={} for {}", mute, thread_id);
        Ok(())
    }

    async fn change_group_image(&self, image: Vec<u8>, thread_id: &str) -> Result<()> {
        info!("📷 Setting photo of chat {} ({} bytes)", thread_id, image.len());
        let input_file = InputFile::memory(image).file_name("photo.png");
        self.bot
            .set_chat_photo(parse_chat(thread_id)?, input_file)
            .await
            .map_err(|e| {
                let msg = format!("Failed to set chat photo: {e}");
                warn!("{}", msg);
                BotError::Provider(msg)
            })?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| BotError::Provider(format!("Failed to get file info: {e}")))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| BotError::Provider(format!("Failed to download file: {e}")))?;
        Ok(data)
    }

    async fn set_message_reaction(&self, reaction: &str, message_id: &str, thread_id: &str) -> Result<()> {
        info!("Adding reaction {} to msg {} in chat {}", reaction, message_id, thread_id);
        let reaction = ReactionType::Emoji {
            emoji: reaction.to_string(),
        };
        self.bot
            .set_message_reaction(parse_chat(thread_id)?, parse_message(message_id)?)
            .reaction(vec![reaction])
            .await
            .map_err(|e| {
                let msg = format!("Failed to add reaction: {e}");
                warn!("{}", msg);
                BotError::Provider(msg)
            })?;
        Ok(())
    }
}
