//! Group record store: the whole `thread_id -> GroupRecord` map lives in a
//! single JSON blob, so every write re-serializes everything.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bot::error::Result;
use crate::bot::group::GroupRecord;
use crate::bot::kv::KvStore;

/// KV key holding the serialized group map.
pub const GROUPS_KEY: &str = "groups";

pub type GroupMap = BTreeMap<String, GroupRecord>;

/// Reads and writes the group map through a `KvStore`.
#[derive(Clone)]
pub struct GroupStore {
    kv: Arc<dyn KvStore>,
    /// Serializes read-modify-write cycles within this process.
    writer: Arc<Mutex<()>>,
}

impl GroupStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get_all(&self) -> Result<GroupMap> {
        match self.kv.get(GROUPS_KEY).await? {
            Some(blob) if !blob.trim().is_empty() => Ok(serde_json::from_str(&blob)?),
            _ => Ok(GroupMap::new()),
        }
    }

    pub async fn get_one(&self, thread_id: &str) -> Result<Option<GroupRecord>> {
        Ok(self.get_all().await?.remove(thread_id))
    }

    /// Overwrite the whole blob.
    pub async fn set_all(&self, groups: &GroupMap) -> Result<()> {
        let blob = serde_json::to_string(groups)?;
        self.kv.set(GROUPS_KEY, &blob).await?;
        debug!("Persisted {} group record(s)", groups.len());
        Ok(())
    }

    /// Replace one record wholesale, keeping the others.
    pub async fn put(&self, record: GroupRecord) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut groups = self.get_all().await?;
        groups.insert(record.thread_id.clone(), record);
        self.set_all(&groups).await
    }

    /// Apply `f` to the freshest copy of one record and persist it.
    ///
    /// `f` receives `None` when the thread has no record yet and returns the
    /// record to store. The returned value is the stored record.
    pub async fn modify<F>(&self, thread_id: &str, f: F) -> Result<GroupRecord>
    where
        F: FnOnce(Option<GroupRecord>) -> GroupRecord,
    {
        let _guard = self.writer.lock().await;
        let mut groups = self.get_all().await?;
        let current = groups.remove(thread_id);
        let mut updated = f(current);
        updated.thread_id = thread_id.to_string();
        groups.insert(thread_id.to_string(), updated.clone());
        self.set_all(&groups).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::group::{Event, Pin, Reminder, ScheduledEvent};
    use crate::bot::kv::MemoryKv;
    use crate::bot::message::{Attachment, InboundMessage};

    fn store() -> (Arc<MemoryKv>, GroupStore) {
        let kv = Arc::new(MemoryKv::new());
        (kv.clone(), GroupStore::new(kv))
    }

    fn full_record() -> GroupRecord {
        let mut r = GroupRecord::new("t1");
        r.name = "Crew".into();
        r.emoji = Some("🔥".into());
        r.image = Some("https://img/crew.png".into());
        r.color = Some("#ff0000".into());
        r.nicknames.insert("1".into(), "Boss".into());
        r.members.insert("alice".into(), "1".into());
        r.names.insert("1".into(), "Alice".into());
        r.admins.push("1".into());
        r.aliases.insert("1".into(), "Ali".into());
        r.pinned.insert(
            "rules".into(),
            Pin { text: "be nice".into(), author: "Alice".into(), date: 1 },
        );
        r.events.insert(
            "party".into(),
            Event::Event(ScheduledEvent {
                title: "Party".into(),
                key_title: "party".into(),
                timestamp: 1_900_000_000_000,
                owner: "1".into(),
                owner_name: "Alice".into(),
                remind_at: Some(1_899_999_000_000),
                message_id: Some("m1".into()),
                going: vec!["Alice".into()],
                not_going: vec![],
                notified: false,
                early_notified: false,
            }),
        );
        r.events.insert(
            "1_t1_1900000000000".into(),
            Event::Reminder(Reminder {
                reminder_text: "bring rope".into(),
                key_title: "1_t1_1900000000000".into(),
                timestamp: 1_900_000_000_000,
                owner: "1".into(),
                owner_name: "Alice".into(),
                notified: true,
            }),
        );
        r.playlists.insert(
            "road trip".into(),
            serde_json::json!({"tracks": ["a", "b"], "owner": "1"}),
        );
        r.muted = true;
        r.is_group = true;
        r.last_message = Some(InboundMessage {
            message_id: "77".into(),
            thread_id: "t1".into(),
            sender_id: "1".into(),
            sender_name: "Alice".into(),
            timestamp: 1_700_000_000_000,
            body: "look".into(),
            attachments: vec![Attachment { kind: "photo".into(), file_id: "AgAD".into() }],
            is_group: true,
        });
        r.last_bot_message_id = Some("m2".into());
        r.rebuild_user_regexp();
        r
    }

    #[tokio::test]
    async fn test_empty_when_absent() {
        let (_, store) = store();
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(store.get_one("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_blob_is_empty_map() {
        let (kv, store) = store();
        kv.set(GROUPS_KEY, "").await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_store_error() {
        let (kv, store) = store();
        kv.set(GROUPS_KEY, "{not json").await.unwrap();
        let err = store.get_all().await.unwrap_err();
        assert!(matches!(err, crate::bot::error::BotError::Store(_)));
    }

    #[tokio::test]
    async fn test_round_trip_every_field() {
        let (_, store) = store();
        let mut groups = GroupMap::new();
        groups.insert("t1".into(), full_record());
        store.set_all(&groups).await.unwrap();
        let loaded = store.get_all().await.unwrap();
        assert_eq!(loaded, groups);

        let record = &loaded["t1"];
        assert_eq!(record.image.as_deref(), Some("https://img/crew.png"));
        assert_eq!(record.nicknames.get("1").map(String::as_str), Some("Boss"));
        assert_eq!(record.playlists["road trip"]["tracks"][1], "b");
        let last = record.last_message.as_ref().unwrap();
        assert_eq!(last.attachments[0].file_id, "AgAD");
    }

    #[tokio::test]
    async fn test_modify_keeps_other_records() {
        let (_, store) = store();
        store.put(GroupRecord::new("a")).await.unwrap();
        store
            .modify("b", |r| {
                let mut r = r.unwrap_or_default();
                r.name = "B".into();
                r
            })
            .await
            .unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"].name, "B");
        assert_eq!(all["b"].thread_id, "b");
    }
}
