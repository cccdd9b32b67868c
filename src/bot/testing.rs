//! In-memory chat provider for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::bot::error::{BotError, Result};
use crate::bot::provider::{ChatProvider, OutgoingMessage, ThreadInfo, UserInfo};

pub const BOT_ID: &str = "999";

#[derive(Default)]
pub struct FakeProvider {
    pub threads: Mutex<HashMap<String, ThreadInfo>>,
    pub users: Mutex<HashMap<String, UserInfo>>,
    /// (thread_id, body)
    pub sent: Mutex<Vec<(String, String)>>,
    pub muted: Mutex<Vec<String>>,
    pub nicknames: Mutex<Vec<(String, String)>>,
    pub fail_thread_info: Mutex<bool>,
    pub thread_info_delay: Mutex<Option<Duration>>,
    pub fail_send: Mutex<bool>,
    /// file_id -> contents
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    /// (thread_id, image bytes)
    pub images: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group thread with the bot plus the given `(id, first_name)` members.
    pub fn with_group(thread_id: &str, name: Option<&str>, members: &[(&str, &str)]) -> Self {
        let provider = Self::new();
        let mut participant_ids: Vec<String> = members.iter().map(|(id, _)| id.to_string()).collect();
        participant_ids.push(BOT_ID.to_string());
        provider.threads.lock().unwrap().insert(
            thread_id.to_string(),
            ThreadInfo {
                name: name.map(String::from),
                emoji: Some("👍".into()),
                image: None,
                color: Some("ff7e29".into()),
                nicknames: [(BOT_ID.to_string(), "keeper".to_string())].into_iter().collect(),
                admin_ids: vec![members[0].0.to_string(), BOT_ID.to_string()],
                participant_ids,
                is_group: true,
            },
        );
        let mut users = provider.users.lock().unwrap();
        for (id, first) in members {
            users.insert(
                id.to_string(),
                UserInfo { first_name: first.to_string(), ..Default::default() },
            );
        }
        users.insert(BOT_ID.to_string(), UserInfo { first_name: "Keeper".into(), ..Default::default() });
        drop(users);
        provider
    }

    pub fn sent_to(&self, thread_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == thread_id)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

#[async_trait]
impl ChatProvider for FakeProvider {
    fn bot_id(&self) -> &str {
        BOT_ID
    }

    async fn send_message(
        &self,
        message: OutgoingMessage,
        thread_id: &str,
        _reply_to: Option<&str>,
    ) -> Result<String> {
        if *self.fail_send.lock().unwrap() {
            return Err(BotError::Provider("send failed".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((thread_id.to_string(), message.body().to_string()));
        Ok(format!("m{}", sent.len()))
    }

    async fn get_thread_info(&self, thread_id: &str) -> Result<ThreadInfo> {
        let delay = *self.thread_info_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_thread_info.lock().unwrap() {
            return Err(BotError::Provider("thread info unavailable".into()));
        }
        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| BotError::Provider(format!("unknown thread {thread_id}")))
    }

    async fn get_user_info(&self, ids: &[String]) -> Result<HashMap<String, UserInfo>> {
        let users = self.users.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| users.get(id).map(|u| (id.clone(), u.clone())))
            .collect())
    }

    async fn add_user_to_group(&self, _user_id: &str, _thread_id: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_user_from_group(&self, _user_id: &str, _thread_id: &str) -> Result<()> {
        Ok(())
    }

    async fn change_nickname(&self, nickname: &str, thread_id: &str, _user_id: &str) -> Result<()> {
        self.nicknames
            .lock()
            .unwrap()
            .push((thread_id.to_string(), nickname.to_string()));
        Ok(())
    }

    async fn mute_thread(&self, thread_id: &str, _mute: bool) -> Result<()> {
        self.muted.lock().unwrap().push(thread_id.to_string());
        Ok(())
    }

    async fn change_group_image(&self, image: Vec<u8>, thread_id: &str) -> Result<()> {
        self.images.lock().unwrap().push((thread_id.to_string(), image));
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| BotError::Provider(format!("unknown file {file_id}")))
    }

    async fn set_message_reaction(&self, _reaction: &str, _message_id: &str, _thread_id: &str) -> Result<()> {
        Ok(())
    }
}
