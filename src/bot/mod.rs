//! Group keeper - tracks chat threads and answers member commands.

pub mod commands;
pub mod engine;
pub mod error;
pub mod events;
pub mod gather;
pub mod group;
pub mod group_store;
pub mod health;
pub mod kv;
pub mod ledger;
pub mod locks;
pub mod message;
pub mod pins;
pub mod properties;
pub mod provider;
pub mod refresher;
pub mod telegram;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{BotConfig, DEFAULT_TITLE, GroupKeeper};
pub use health::DEFAULT_API_BASE;
pub use kv::{KvStore, MemoryKv, SqliteKv};
pub use ledger::DEFAULT_POINTS;
pub use message::{Attachment, InboundMessage};
pub use properties::WriteMode;
pub use provider::ChatProvider;
pub use telegram::TelegramClient;
