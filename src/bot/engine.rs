//! Group keeper engine - wires the store, provider, refresher and updater
//! together and handles inbound messages.

use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bot::commands;
use crate::bot::error::Result;
use crate::bot::events::{self, DateParser, SimpleDateParser};
use crate::bot::group::GroupRecord;
use crate::bot::group_store::GroupStore;
use crate::bot::health::{DEFAULT_API_BASE, HealthClient};
use crate::bot::kv::KvStore;
use crate::bot::ledger::{DEFAULT_POINTS, Ledger};
use crate::bot::message::InboundMessage;
use crate::bot::properties::{GroupProperty, PropertyOutcome, PropertyUpdater, WriteMode};
use crate::bot::provider::{ChatProvider, OutgoingMessage};
use crate::bot::refresher::Refresher;

/// Title used until the provider reports a real one.
pub const DEFAULT_TITLE: &str = "Unnamed chat";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Thread that gets "added to a new chat" notices.
    pub owner_thread_id: Option<String>,
    pub default_title: String,
    pub bot_nickname: Option<String>,
    /// Send greeting/ready messages to newly seen threads.
    pub should_message: bool,
    /// Stay quiet in new threads while the owner thread is unknown.
    pub fail_silently: bool,
    pub settle_delay: Duration,
    pub score_points: i64,
    pub aggregate_timeout: Duration,
    pub write_mode: WriteMode,
    pub timezone: Tz,
    pub health_api_base: String,
    pub notify_interval: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            owner_thread_id: None,
            default_title: DEFAULT_TITLE.to_string(),
            bot_nickname: None,
            should_message: false,
            fail_silently: true,
            settle_delay: Duration::from_millis(2000),
            score_points: DEFAULT_POINTS,
            aggregate_timeout: Duration::from_millis(3000),
            write_mode: WriteMode::Patch,
            timezone: chrono_tz::UTC,
            health_api_base: DEFAULT_API_BASE.to_string(),
            notify_interval: Duration::from_secs(60),
        }
    }
}

/// The engine. Shared behind an `Arc` so background tasks can hold it.
pub struct GroupKeeper {
    pub(crate) config: BotConfig,
    pub(crate) store: GroupStore,
    pub(crate) provider: Arc<dyn ChatProvider>,
    pub(crate) refresher: Refresher,
    pub(crate) updater: PropertyUpdater,
    pub(crate) ledger: Ledger,
    pub(crate) health: HealthClient,
    pub(crate) http: reqwest::Client,
    pub(crate) parser: Box<dyn DateParser>,
}

impl GroupKeeper {
    pub fn new(config: BotConfig, kv: Arc<dyn KvStore>, provider: Arc<dyn ChatProvider>) -> Self {
        let store = GroupStore::new(kv.clone());
        let refresher = Refresher::new(store.clone(), provider.clone(), config.clone());
        let updater = PropertyUpdater::new(store.clone(), config.settle_delay, config.write_mode);
        let ledger = Ledger::new(kv, config.score_points, config.aggregate_timeout);
        let health = HealthClient::new(config.health_api_base.clone());
        let parser = Box::new(SimpleDateParser::new(config.timezone));

        Self {
            config,
            store,
            provider,
            refresher,
            updater,
            ledger,
            health,
            http: reqwest::Client::new(),
            parser,
        }
    }

    pub fn store(&self) -> &GroupStore {
        &self.store
    }

    /// Handle one inbound message: refresh the group in the background and
    /// dispatch any command it carries.
    pub async fn handle_message(self: &Arc<Self>, msg: InboundMessage) {
        info!(
            "📨 {} ({}) in {}: \"{}\"",
            msg.sender_name,
            msg.sender_id,
            msg.thread_id,
            msg.body.chars().take(50).collect::<String>()
        );

        let previous = match self.store.get_one(&msg.thread_id).await {
            Ok(record) => record.and_then(|r| r.last_message),
            Err(e) => {
                warn!("Couldn't load {}: {}", msg.thread_id, e);
                None
            }
        };

        {
            let this = self.clone();
            let msg = msg.clone();
            tokio::spawn(async move {
                if let Err(e) = this.refresher.refresh(&msg.thread_id, Some(msg.clone())).await {
                    warn!("Refresh of {} failed: {}", msg.thread_id, e);
                }
            });
        }

        let reply = match commands::dispatch(self, &msg, previous.as_ref()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) if e.is_user_facing() => e.user_message().to_string(),
            Err(e) => {
                error!("Command in {} failed: {}", msg.thread_id, e);
                e.user_message().to_string()
            }
        };
        self.reply(&msg.thread_id, reply.into(), Some(&msg.message_id)).await;
    }

    /// Send into a thread and remember the id of what we sent.
    pub async fn reply(self: &Arc<Self>, thread_id: &str, message: OutgoingMessage, reply_to: Option<&str>) {
        match self.provider.send_message(message, thread_id, reply_to).await {
            Ok(message_id) => {
                let this = self.clone();
                let thread_id = thread_id.to_string();
                tokio::spawn(async move {
                    this.track_bot_message(&thread_id, message_id).await;
                });
            }
            Err(e) => error!("Failed to send to {}: {}", thread_id, e),
        }
    }

    async fn track_bot_message(&self, thread_id: &str, message_id: String) {
        let mut record = match self.store.get_one(thread_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!("Couldn't load {} to track message: {}", thread_id, e);
                return;
            }
        };
        match self
            .updater
            .set_property(&mut record, GroupProperty::LastBotMessageId(Some(message_id)))
            .await
        {
            Ok(PropertyOutcome::Written(_)) => {}
            Ok(PropertyOutcome::Dropped) => info!("Skipped message tracking in {}: write pending", thread_id),
            Err(e) => warn!("Couldn't track bot message in {}: {}", thread_id, e),
        }
    }

    /// Stored record for a thread, refreshing it first if we have never seen it.
    pub async fn current_record(&self, thread_id: &str) -> Result<GroupRecord> {
        match self.store.get_one(thread_id).await? {
            Some(record) => Ok(record),
            None => self.refresher.refresh(thread_id, None).await,
        }
    }

    /// Send a notice to the owner thread, if one is configured.
    pub async fn notify_owner(&self, message: &str) {
        let Some(owner) = &self.config.owner_thread_id else {
            return;
        };
        info!("Notifying owner thread ({})", owner);
        if let Err(e) = self.provider.send_message(message.into(), owner, None).await {
            error!("Failed to notify owner: {}", e);
        }
    }

    /// Spawn the background task that announces due events and reminders.
    pub fn start_notifier(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.notify_interval);
            loop {
                interval.tick().await;
                if let Err(e) = this.check_due_events().await {
                    warn!("Event check failed: {}", e);
                }
            }
        });
    }

    /// Announce everything that is due now. Returns how many notices went out.
    pub async fn check_due_events(&self) -> Result<usize> {
        let now = Utc::now();
        let groups = self.store.get_all().await?;
        let mut sent = 0;

        for (thread_id, record) in groups {
            let notices = events::due_notifications(&record, now, self.config.timezone);
            if notices.is_empty() {
                continue;
            }
            info!("Firing {} notice(s) in {}", notices.len(), thread_id);

            let mut delivered = Vec::with_capacity(notices.len());
            for notice in notices {
                let message = OutgoingMessage::Mentions {
                    body: notice.text.clone(),
                    mentions: notice.mentions.clone(),
                };
                match self.provider.send_message(message, &thread_id, None).await {
                    Ok(_) => delivered.push(notice),
                    Err(e) => warn!("Failed to announce {} in {}: {}", notice.key, thread_id, e),
                }
            }
            if delivered.is_empty() {
                continue;
            }
            sent += delivered.len();

            // Unsent notices stay unmarked and are retried on the next tick.
            self.store
                .modify(&thread_id, move |current| {
                    let mut current = current.unwrap_or(record);
                    for notice in &delivered {
                        events::mark_notified(&mut current.events, notice);
                    }
                    current
                })
                .await?;
        }

        Ok(sent)
    }
}
