//! Group record data model.
//!
//! One `GroupRecord` per conversation thread. The JSON form keeps the
//! camelCase field names of older stored blobs so they keep loading.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::bot::message::InboundMessage;

/// A named, stored message snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub text: String,
    pub author: String,
    /// Epoch millis when pinned.
    pub date: i64,
}

/// A scheduled group event with RSVP lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEvent {
    pub title: String,
    pub key_title: String,
    /// Epoch millis.
    pub timestamp: i64,
    pub owner: String,
    #[serde(default)]
    pub owner_name: String,
    /// Early reminder time in epoch millis.
    #[serde(default)]
    pub remind_at: Option<i64>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub going: Vec<String>,
    #[serde(default)]
    pub not_going: Vec<String>,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub early_notified: bool,
}

/// A one-shot personal reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub reminder_text: String,
    pub key_title: String,
    pub timestamp: i64,
    pub owner: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub notified: bool,
}

/// Entry in `GroupRecord::events`, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Event(ScheduledEvent),
    Reminder(Reminder),
}

impl Event {
    pub fn key(&self) -> &str {
        match self {
            Event::Event(e) => &e.key_title,
            Event::Reminder(r) => &r.key_title,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Event::Event(e) => &e.owner,
            Event::Reminder(r) => &r.owner,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Event(e) => e.timestamp,
            Event::Reminder(r) => r.timestamp,
        }
    }
}

/// Cached metadata and application state for one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupRecord {
    pub thread_id: String,
    pub name: String,
    pub emoji: Option<String>,
    pub image: Option<String>,
    /// Always `#`-prefixed when set.
    pub color: Option<String>,
    /// Member id -> nickname. Never contains the bot.
    pub nicknames: BTreeMap<String, String>,
    /// Lowercase first name -> member id.
    pub members: BTreeMap<String, String>,
    /// Member id -> first name.
    pub names: BTreeMap<String, String>,
    pub admins: Vec<String>,
    /// Member id -> alias.
    pub aliases: BTreeMap<String, String>,
    #[serde(rename = "userRegExp")]
    pub user_regexp: String,
    pub pinned: BTreeMap<String, Pin>,
    pub events: BTreeMap<String, Event>,
    pub playlists: BTreeMap<String, serde_json::Value>,
    pub muted: bool,
    pub is_group: bool,
    pub last_message: Option<InboundMessage>,
    #[serde(rename = "lastBotMessageID")]
    pub last_bot_message_id: Option<String>,
}

impl GroupRecord {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }

    /// Regenerate `user_regexp` from member names and alias values.
    pub fn rebuild_user_regexp(&mut self) {
        self.user_regexp = build_user_pattern(
            self.members.keys().map(String::as_str),
            self.aliases.values().map(String::as_str),
        );
    }

    /// Compiled form of `user_regexp`, `None` when nobody is known yet.
    /// Names only match as whole words; group 1 is the name itself.
    pub fn user_pattern(&self) -> Option<Regex> {
        if self.user_regexp.is_empty() {
            return None;
        }
        RegexBuilder::new(&format!(r"(?:^|\W)({})(?:\W|$)", self.user_regexp))
            .case_insensitive(true)
            .build()
            .ok()
    }

    /// Find the first member addressed in `text` by name or alias.
    pub fn match_user(&self, text: &str) -> Option<String> {
        let pattern = self.user_pattern()?;
        let matched = pattern.captures(text)?.get(1)?.as_str().to_lowercase();

        if let Some(id) = self.members.get(&matched) {
            return Some(id.clone());
        }
        self.aliases
            .iter()
            .find(|(_, alias)| alias.to_lowercase() == matched)
            .map(|(id, _)| id.clone())
    }

    /// Display name for a member id: alias, then first name, then the id.
    pub fn display_name(&self, id: &str) -> String {
        self.aliases
            .get(id)
            .or_else(|| self.names.get(id))
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.admins.iter().any(|a| a == id)
    }
}

/// Case-insensitive alternation over every known name, longest first so
/// "alexandra" wins over "alex".
pub fn build_user_pattern<'a>(
    names: impl Iterator<Item = &'a str>,
    aliases: impl Iterator<Item = &'a str>,
) -> String {
    let unique: BTreeSet<String> = names
        .chain(aliases)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    if unique.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<String> = unique.into_iter().collect();
    sorted.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));

    let alternatives: Vec<String> = sorted.iter().map(|s| regex::escape(s)).collect();
    format!("(?:{})", alternatives.join("|"))
}

/// Normalised key for pins and event titles.
pub fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}
