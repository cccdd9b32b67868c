//! Score and command-usage ledgers, stored as flat keys next to the group
//! blob.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::bot::error::{BotError, Result};
use crate::bot::gather::{Gathered, collect_until};
use crate::bot::kv::KvStore;

pub const DEFAULT_POINTS: i64 = 5;

/// One use of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Epoch millis.
    pub at: i64,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEntry {
    pub user_id: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandStats {
    pub command: String,
    pub total: u64,
    pub records: Vec<UsageRecord>,
}

impl CommandStats {
    /// Distinct users who ran the command.
    pub fn unique_users(&self) -> usize {
        let mut users: Vec<&str> = self.records.iter().map(|r| r.user.as_str()).collect();
        users.sort_unstable();
        users.dedup();
        users.len()
    }
}

fn score_key(user_id: &str) -> String {
    format!("score:{user_id}")
}

fn total_key(command: &str) -> String {
    format!("usage_total_{command}")
}

fn record_key(command: &str) -> String {
    format!("usage_record_{command}")
}

const TOTAL_ALL_KEY: &str = "usage_total_all";

#[derive(Clone)]
pub struct Ledger {
    kv: Arc<dyn KvStore>,
    points: i64,
    timeout: Duration,
}

impl Ledger {
    pub fn new(kv: Arc<dyn KvStore>, points: i64, timeout: Duration) -> Self {
        Self { kv, points, timeout }
    }

    pub async fn get_score(&self, user_id: &str) -> Result<i64> {
        read_int(self.kv.as_ref(), &score_key(user_id)).await
    }

    /// Add or subtract the configured points; returns the new score.
    pub async fn update_score(&self, is_add: bool, user_id: &str) -> Result<i64> {
        let current = self.get_score(user_id).await?;
        let updated = if is_add {
            current + self.points
        } else {
            current - self.points
        };
        self.kv.set(&score_key(user_id), &updated.to_string()).await?;
        debug!("Score for {} is now {}", user_id, updated);
        Ok(updated)
    }

    /// Record one use of `command` by `user_id`.
    pub async fn update_stats(&self, command: &str, user_id: &str) -> Result<()> {
        let mut records = read_records(self.kv.as_ref(), command).await?;
        records.push(UsageRecord {
            at: chrono::Utc::now().timestamp_millis(),
            user: user_id.to_string(),
        });
        self.kv
            .set(&record_key(command), &serde_json::to_string(&records)?)
            .await?;

        let total = read_int(self.kv.as_ref(), &total_key(command)).await?;
        self.kv.set(&total_key(command), &(total + 1).to_string()).await?;

        let all = read_int(self.kv.as_ref(), TOTAL_ALL_KEY).await?;
        self.kv.set(TOTAL_ALL_KEY, &(all + 1).to_string()).await?;
        Ok(())
    }

    pub async fn get_stats(&self, command: &str) -> Result<CommandStats> {
        fetch_stats(self.kv.clone(), command.to_string()).await
    }

    pub async fn total_usage(&self) -> Result<i64> {
        read_int(self.kv.as_ref(), TOTAL_ALL_KEY).await
    }

    /// Scores for every member, highest first, bounded by the aggregate
    /// timeout.
    pub async fn get_all_scores(&self, member_ids: &[String]) -> Gathered<ScoreEntry> {
        let kv = self.kv.clone();
        let mut gathered = collect_until(member_ids.to_vec(), self.timeout, move |user_id| {
            let kv = kv.clone();
            async move {
                let score = read_int(kv.as_ref(), &score_key(&user_id)).await?;
                Ok::<_, BotError>(ScoreEntry { user_id, score })
            }
        })
        .await;
        gathered
            .entries
            .sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.user_id.cmp(&b.user_id)));
        gathered
    }

    /// Usage for every command, most used first.
    pub async fn get_all_stats(&self, commands: &[&str]) -> Gathered<CommandStats> {
        let kv = self.kv.clone();
        let subjects = commands.iter().map(|c| c.to_string()).collect();
        let mut gathered = collect_until(subjects, self.timeout, move |command| {
            fetch_stats(kv.clone(), command)
        })
        .await;
        gathered
            .entries
            .sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.command.cmp(&b.command)));
        gathered
    }
}

async fn read_int(kv: &dyn KvStore, key: &str) -> Result<i64> {
    match kv.get(key).await? {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| BotError::Store(format!("non-numeric value under {key}: {e}"))),
        None => Ok(0),
    }
}

async fn read_records(kv: &dyn KvStore, command: &str) -> Result<Vec<UsageRecord>> {
    match kv.get(&record_key(command)).await? {
        Some(blob) if !blob.trim().is_empty() => Ok(serde_json::from_str(&blob)?),
        _ => Ok(Vec::new()),
    }
}

async fn fetch_stats(kv: Arc<dyn KvStore>, command: String) -> Result<CommandStats> {
    let total = read_int(kv.as_ref(), &total_key(&command)).await?;
    let records = read_records(kv.as_ref(), &command).await?;
    Ok(CommandStats {
        command,
        total: total.max(0) as u64,
        records,
    })
}
