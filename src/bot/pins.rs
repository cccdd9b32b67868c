//! Pinned snippets and member aliases.
//!
//! Like the event helpers, these return the replacement map for the
//! property updater instead of mutating the record.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::bot::error::{BotError, Result};
use crate::bot::group::{GroupRecord, Pin, normalize_key};

pub type PinMap = BTreeMap<String, Pin>;

pub fn pin(
    record: &GroupRecord,
    name: &str,
    text: &str,
    author: &str,
    now: DateTime<Utc>,
) -> Result<PinMap> {
    let key = normalize_key(name);
    if key.is_empty() {
        return Err(BotError::Validation("Pins need a name, like /pin rules Be nice.".into()));
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(BotError::Validation(format!("What should I pin under \"{key}\"?")));
    }
    let mut pinned = record.pinned.clone();
    pinned.insert(
        key,
        Pin {
            text: text.to_string(),
            author: author.to_string(),
            date: now.timestamp_millis(),
        },
    );
    Ok(pinned)
}

pub fn recall<'a>(record: &'a GroupRecord, name: &str) -> Result<&'a Pin> {
    let key = normalize_key(name);
    record
        .pinned
        .get(&key)
        .ok_or_else(|| BotError::Validation(format!("Nothing is pinned under \"{key}\".")))
}

pub fn unpin(record: &GroupRecord, name: &str) -> Result<PinMap> {
    let key = normalize_key(name);
    let mut pinned = record.pinned.clone();
    pinned
        .remove(&key)
        .ok_or_else(|| BotError::Validation(format!("Nothing is pinned under \"{key}\".")))?;
    Ok(pinned)
}

pub fn list_pins(record: &GroupRecord) -> Vec<&str> {
    record.pinned.keys().map(String::as_str).collect()
}

/// Give the member addressed in `who` an alias.
pub fn set_alias(record: &GroupRecord, who: &str, alias: &str) -> Result<BTreeMap<String, String>> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Err(BotError::Validation("Usage: /alias <name> <alias>".into()));
    }
    let member = record
        .match_user(who)
        .ok_or_else(|| BotError::Validation(format!("I don't know who \"{}\" is.", who.trim())))?;

    let taken = record.members.contains_key(&alias.to_lowercase())
        || record
            .aliases
            .iter()
            .any(|(id, a)| *id != member && a.eq_ignore_ascii_case(alias));
    if taken {
        return Err(BotError::Validation(format!("\"{alias}\" is already someone's name.")));
    }

    let mut aliases = record.aliases.clone();
    aliases.insert(member, alias.to_string());
    Ok(aliases)
}

pub fn clear_alias(record: &GroupRecord, who: &str) -> Result<BTreeMap<String, String>> {
    let member = record
        .match_user(who)
        .ok_or_else(|| BotError::Validation(format!("I don't know who \"{}\" is.", who.trim())))?;
    let mut aliases = record.aliases.clone();
    aliases
        .remove(&member)
        .ok_or_else(|| BotError::Validation("They don't have an alias.".into()))?;
    Ok(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::properties::GroupProperty;

    fn record() -> GroupRecord {
        let mut r = GroupRecord::new("t1");
        r.members.insert("alice".into(), "1".into());
        r.members.insert("bob".into(), "2".into());
        r.names.insert("1".into(), "Alice".into());
        r.names.insert("2".into(), "Bob".into());
        r.rebuild_user_regexp();
        r
    }

    #[test]
    fn test_pin_and_recall() {
        let mut r = record();
        r.pinned = pin(&r, " Rules ", "be nice", "Alice", Utc::now()).unwrap();
        assert_eq!(recall(&r, "RULES").unwrap().text, "be nice");
        assert_eq!(list_pins(&r), vec!["rules"]);
        r.pinned = unpin(&r, "rules").unwrap();
        assert!(recall(&r, "rules").is_err());
    }

    #[test]
    fn test_unnamed_pin_rejected() {
        let r = record();
        assert!(matches!(pin(&r, "  ", "x", "Alice", Utc::now()), Err(BotError::Validation(_))));
        assert!(matches!(pin(&r, "rules", " ", "Alice", Utc::now()), Err(BotError::Validation(_))));
        assert!(r.pinned.is_empty());
    }

    #[test]
    fn test_alias_keeps_pattern_in_sync() {
        let mut r = record();
        let aliases = set_alias(&r, "bob", "Captain").unwrap();
        GroupProperty::Aliases(aliases).apply(&mut r);

        let pattern = r.user_pattern().unwrap();
        for name in r.members.keys() {
            assert!(pattern.is_match(name));
        }
        assert!(pattern.is_match("captain"));
        assert_eq!(r.match_user("hey Captain").as_deref(), Some("2"));
        assert_eq!(r.display_name("2"), "Captain");

        let aliases = clear_alias(&r, "bob").unwrap();
        GroupProperty::Aliases(aliases).apply(&mut r);
        assert!(!r.user_pattern().unwrap().is_match("captain"));
    }

    #[test]
    fn test_alias_conflicts() {
        let r = record();
        assert!(set_alias(&r, "bob", "alice").is_err());
        assert!(set_alias(&r, "nobody", "x").is_err());
        assert!(set_alias(&r, "bob", "  ").is_err());
    }
}
