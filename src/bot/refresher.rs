//! Group info refresher: pulls live thread metadata from the provider and
//! merges it into the stored record on every inbound message.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bot::engine::BotConfig;
use crate::bot::error::Result;
use crate::bot::group::GroupRecord;
use crate::bot::group_store::GroupStore;
use crate::bot::locks::ThreadLocks;
use crate::bot::message::InboundMessage;
use crate::bot::provider::{ChatProvider, ThreadInfo, UserInfo};

pub struct Refresher {
    store: GroupStore,
    provider: Arc<dyn ChatProvider>,
    config: BotConfig,
    in_flight: ThreadLocks,
}

impl Refresher {
    pub fn new(store: GroupStore, provider: Arc<dyn ChatProvider>, config: BotConfig) -> Self {
        Self {
            store,
            provider,
            config,
            in_flight: ThreadLocks::new(),
        }
    }

    /// Refresh the record for `thread_id`, registering it on first sight.
    ///
    /// Refreshes of one thread run one at a time, so only the first of two
    /// overlapping calls sees the thread as new. A provider failure aborts
    /// before anything is written.
    pub async fn refresh(
        &self,
        thread_id: &str,
        last_message: Option<InboundMessage>,
    ) -> Result<GroupRecord> {
        let lock = self.in_flight.get(thread_id)?;
        let guard = lock.clone().lock_owned().await;
        let result = self.refresh_locked(thread_id, last_message).await;
        drop(guard);
        self.in_flight.release(thread_id, lock);
        result
    }

    async fn refresh_locked(
        &self,
        thread_id: &str,
        last_message: Option<InboundMessage>,
    ) -> Result<GroupRecord> {
        let existing = self.store.get_one(thread_id).await?;
        let owner_known = match &self.config.owner_thread_id {
            Some(owner) => self.store.get_one(owner).await?.is_some(),
            None => false,
        };
        let chatty = self.config.should_message && !(self.config.fail_silently && !owner_known);
        let is_new = existing.is_none();

        if is_new && chatty {
            self.bootstrap(thread_id).await;
        }

        let info = self.provider.get_thread_info(thread_id).await.map_err(|e| {
            error!("Couldn't fetch info for thread {}: {}", thread_id, e);
            e
        })?;

        let bot_id = self.provider.bot_id().to_string();
        let participants: Vec<String> = info
            .participant_ids
            .iter()
            .filter(|id| **id != bot_id)
            .cloned()
            .collect();
        let users = self.provider.get_user_info(&participants).await.map_err(|e| {
            error!("Couldn't fetch members of thread {}: {}", thread_id, e);
            e
        })?;

        let default_title = self.config.default_title.clone();
        let record = self
            .store
            .modify(thread_id, |current| {
                let mut record = current.unwrap_or_else(|| GroupRecord::new(thread_id));
                merge(&mut record, &info, &participants, &users, &bot_id, &default_title, is_new);
                if last_message.is_some() {
                    record.last_message = last_message;
                }
                record
            })
            .await?;

        if is_new {
            info!("Registered new thread {} ({})", thread_id, record.name);
            if chatty {
                self.announce(&record).await;
            }
        }

        Ok(record)
    }

    async fn bootstrap(&self, thread_id: &str) {
        let greeting = "Hi! I'm setting things up for this chat, give me a second.";
        if let Err(e) = self.provider.send_message(greeting.into(), thread_id, None).await {
            warn!("Greeting to {} failed: {}", thread_id, e);
        }
        if let Some(nickname) = &self.config.bot_nickname {
            let bot_id = self.provider.bot_id().to_string();
            if let Err(e) = self.provider.change_nickname(nickname, thread_id, &bot_id).await {
                warn!("Setting nickname in {} failed: {}", thread_id, e);
            }
        }
        if let Err(e) = self.provider.mute_thread(thread_id, true).await {
            warn!("Muting {} failed: {}", thread_id, e);
        }
    }

    async fn announce(&self, record: &GroupRecord) {
        if let Some(owner) = &self.config.owner_thread_id {
            let notice = format!("I was added to a new chat: \"{}\" ({})", record.name, record.thread_id);
            if let Err(e) = self.provider.send_message(notice.into(), owner, None).await {
                warn!("Owner notice failed: {}", e);
            }
        }
        let ready = "All set! Send /help to see what I can do.";
        if let Err(e) = self.provider.send_message(ready.into(), &record.thread_id, None).await {
            warn!("Ready message to {} failed: {}", record.thread_id, e);
        }
    }
}

/// Merge live provider state into `record`.
fn merge(
    record: &mut GroupRecord,
    info: &ThreadInfo,
    participants: &[String],
    users: &HashMap<String, UserInfo>,
    bot_id: &str,
    default_title: &str,
    is_new: bool,
) {
    record.name = info
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default_title.to_string());
    record.emoji = info.emoji.clone();
    record.image = info.image.clone();
    record.color = info.color.as_ref().map(|c| {
        if c.starts_with('#') {
            c.clone()
        } else {
            format!("#{c}")
        }
    });
    record.nicknames = info
        .nicknames
        .iter()
        .filter(|(id, _)| id.as_str() != bot_id)
        .map(|(id, nick)| (id.clone(), nick.clone()))
        .collect();
    record.admins = info
        .admin_ids
        .iter()
        .filter(|id| id.as_str() != bot_id)
        .cloned()
        .collect();

    if is_new {
        record.muted = true;
        record.playlists.clear();
        record.aliases.clear();
        record.pinned.clear();
        record.events.clear();
        record.is_group = info.is_group;
    }

    record.members.clear();
    record.names.clear();
    for id in participants {
        let Some(user) = users.get(id) else { continue };
        let first = user.first_name.trim();
        if first.is_empty() {
            continue;
        }
        record.members.insert(first.to_lowercase(), id.clone());
        record.names.insert(id.clone(), first.to_string());
    }
    record.rebuild_user_regexp();

    if record.name == default_title && !record.names.is_empty() {
        record.name = record.names.values().cloned().collect::<Vec<_>>().join("/");
    }
}
