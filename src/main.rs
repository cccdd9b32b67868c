mod bot;
mod chat_log;
mod config;

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use bot::{Attachment, ChatProvider, GroupKeeper, InboundMessage, KvStore, MemoryKv, SqliteKv, TelegramClient};
use config::Config;

struct BotState {
    keeper: Arc<GroupKeeper>,
    telegram: Arc<TelegramClient>,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "groupkeeper.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let bot_id = match bot.get_me().await {
        Ok(me) => me.id.0.to_string(),
        Err(e) => {
            eprintln!("Failed to get bot info: {e}");
            std::process::exit(1);
        }
    };
    let telegram = Arc::new(TelegramClient::new(bot.clone(), bot_id.clone()));

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("groupkeeper.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_thread_id) = config.log_thread_id.clone() {
        let provider: Arc<dyn ChatProvider> = telegram.clone();
        registry.with(chat_log::ChatLogLayer::new(provider, log_thread_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting groupkeeper...");
    info!("Loaded config from {config_path}");
    info!("Bot user ID: {}", bot_id);

    let db_path = config.data_dir.join("groupkeeper.db");
    let kv: Arc<dyn KvStore> = match SqliteKv::open(&db_path) {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            error!("Failed to open database {:?}: {}, keeping state in memory", db_path, e);
            Arc::new(MemoryKv::new())
        }
    };

    let keeper = Arc::new(GroupKeeper::new(config.bot, kv, telegram.clone()));
    keeper.start_notifier();
    keeper.notify_owner("hey, just restarted").await;

    let state = Arc::new(BotState { keeper, telegram });
    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_new_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(inbound) = telegram_to_inbound(&msg) else {
        return Ok(());
    };
    state.telegram.observe(&msg);
    state.keeper.handle_message(inbound).await;
    Ok(())
}

fn telegram_to_inbound(msg: &Message) -> Option<InboundMessage> {
    let user = msg.from.as_ref()?;
    if user.is_bot {
        return None;
    }

    let mut attachments = Vec::new();
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        attachments.push(Attachment { kind: "photo".into(), file_id: photo.file.id.0.clone() });
    }
    if let Some(doc) = msg.document() {
        attachments.push(Attachment { kind: "document".into(), file_id: doc.file.id.0.clone() });
    }
    if let Some(sticker) = msg.sticker() {
        attachments.push(Attachment { kind: "sticker".into(), file_id: sticker.file.id.0.clone() });
    }
    if let Some(voice) = msg.voice() {
        attachments.push(Attachment { kind: "voice".into(), file_id: voice.file.id.0.clone() });
    }

    Some(InboundMessage {
        message_id: msg.id.0.to_string(),
        thread_id: msg.chat.id.0.to_string(),
        sender_id: user.id.0.to_string(),
        sender_name: user.first_name.clone(),
        timestamp: msg.date.timestamp_millis(),
        body: msg.text().or(msg.caption()).unwrap_or("").to_string(),
        attachments,
        is_group: msg.chat.id.0 < 0,
    })
}
