//! Single-field group property writes, serialized per thread.
//!
//! A write that arrives while another write for the same thread is still
//! settling is dropped, not queued. After the settle delay the change is
//! persisted according to the configured `WriteMode`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::bot::error::{BotError, Result};
use crate::bot::group::{Event, GroupRecord, Pin};
use crate::bot::group_store::GroupStore;
use crate::bot::locks::ThreadLocks;

/// How a settled property write reaches the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Apply only the changed field to the freshest stored record.
    #[default]
    Patch,
    /// Write back the caller's whole record as it looked before the delay.
    /// A refresh that lands during the delay is overwritten.
    Snapshot,
}

/// One settable field of a `GroupRecord`.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupProperty {
    Image(Option<String>),
    Muted(bool),
    Aliases(BTreeMap<String, String>),
    Pinned(BTreeMap<String, Pin>),
    Events(BTreeMap<String, Event>),
    LastBotMessageId(Option<String>),
}

impl GroupProperty {
    /// Field name as stored.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Muted(_) => "muted",
            Self::Aliases(_) => "aliases",
            Self::Pinned(_) => "pinned",
            Self::Events(_) => "events",
            Self::LastBotMessageId(_) => "lastBotMessageID",
        }
    }

    pub fn apply(self, record: &mut GroupRecord) {
        match self {
            Self::Image(v) => record.image = v,
            Self::Muted(v) => record.muted = v,
            Self::Aliases(v) => {
                record.aliases = v;
                record.rebuild_user_regexp();
            }
            Self::Pinned(v) => record.pinned = v,
            Self::Events(v) => record.events = v,
            Self::LastBotMessageId(v) => record.last_bot_message_id = v,
        }
    }

    /// Apply to `fresh` only what this write changed relative to `before`.
    ///
    /// Map fields are patched key by key, so entries added or removed by
    /// someone else since `before` survive. Notified flags already set on a
    /// stored event stay set.
    pub fn patch(self, before: &GroupRecord, fresh: &mut GroupRecord) {
        match self {
            Self::Aliases(v) => {
                patch_map(&before.aliases, v, &mut fresh.aliases, |_, _| {});
                fresh.rebuild_user_regexp();
            }
            Self::Pinned(v) => patch_map(&before.pinned, v, &mut fresh.pinned, |_, _| {}),
            Self::Events(v) => patch_map(&before.events, v, &mut fresh.events, keep_notified),
            other => other.apply(fresh),
        }
    }
}

fn patch_map<V: Clone + PartialEq>(
    before: &BTreeMap<String, V>,
    after: BTreeMap<String, V>,
    fresh: &mut BTreeMap<String, V>,
    carry: impl Fn(&V, &mut V),
) {
    fresh.retain(|key, _| after.contains_key(key) || !before.contains_key(key));
    for (key, mut value) in after {
        if before.get(&key) == Some(&value) {
            continue;
        }
        if let Some(current) = fresh.get(&key) {
            carry(current, &mut value);
        }
        fresh.insert(key, value);
    }
}

fn keep_notified(current: &Event, value: &mut Event) {
    match (current, value) {
        (Event::Event(current), Event::Event(value)) => {
            value.notified |= current.notified;
            value.early_notified |= current.early_notified;
        }
        (Event::Reminder(current), Event::Reminder(value)) => value.notified |= current.notified,
        _ => {}
    }
}

/// Result of a `set_property` call.
#[derive(Debug)]
pub enum PropertyOutcome {
    /// The record as persisted.
    Written(GroupRecord),
    /// Another write for this thread was pending.
    Dropped,
}

impl PropertyOutcome {
    /// Persisted record, or a user-facing error if the write was dropped.
    pub fn written(self) -> Result<GroupRecord> {
        match self {
            Self::Written(record) => Ok(record),
            Self::Dropped => Err(BotError::Validation(
                "I'm still saving a previous change here, try again in a moment.".into(),
            )),
        }
    }
}

pub struct PropertyUpdater {
    store: GroupStore,
    settle_delay: Duration,
    mode: WriteMode,
    locks: ThreadLocks,
}

impl PropertyUpdater {
    pub fn new(store: GroupStore, settle_delay: Duration, mode: WriteMode) -> Self {
        Self {
            store,
            settle_delay,
            mode,
            locks: ThreadLocks::new(),
        }
    }

    /// True while a write for `thread_id` is settling.
    pub fn is_locked(&self, thread_id: &str) -> bool {
        self.locks.is_locked(thread_id)
    }

    /// Set one field on `record` and persist it after the settle delay.
    ///
    /// `record` is only mutated when the write is accepted.
    pub async fn set_property(
        &self,
        record: &mut GroupRecord,
        property: GroupProperty,
    ) -> Result<PropertyOutcome> {
        let thread_id = record.thread_id.clone();
        let lock = self.locks.get(&thread_id)?;
        let Ok(guard) = lock.clone().try_lock_owned() else {
            debug!(
                "Dropping {} write for thread {}: another write is pending",
                property.key(),
                thread_id
            );
            self.locks.release(&thread_id, lock);
            return Ok(PropertyOutcome::Dropped);
        };

        let result = self.settle_and_write(record, property).await;
        drop(guard);
        self.locks.release(&thread_id, lock);
        result
    }

    async fn settle_and_write(&self, record: &mut GroupRecord, property: GroupProperty) -> Result<PropertyOutcome> {
        let key = property.key();
        let before = record.clone();
        property.clone().apply(record);
        tokio::time::sleep(self.settle_delay).await;

        let stored = match self.mode {
            WriteMode::Snapshot => {
                self.store.put(record.clone()).await?;
                record.clone()
            }
            WriteMode::Patch => {
                let fallback = record.clone();
                self.store
                    .modify(&record.thread_id, move |current| match current {
                        Some(mut fresh) => {
                            property.patch(&before, &mut fresh);
                            fresh
                        }
                        None => fallback,
                    })
                    .await?
            }
        };

        info!("Set {} for thread {}", key, record.thread_id);
        Ok(PropertyOutcome::Written(stored))
    }

    #[cfg(test)]
    pub fn tracked_threads(&self) -> usize {
        self.locks.tracked()
    }
}
