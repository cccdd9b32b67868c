//! Events and reminders: creation from loose time expressions, owner-only
//! deletion, RSVPs and due-notification scanning.
//!
//! Operations take the current record and return the new `events` map so
//! the caller can hand it to the property updater in one write.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::bot::error::{BotError, Result};
use crate::bot::group::{Event, GroupRecord, Reminder, ScheduledEvent, normalize_key};

pub type EventMap = BTreeMap<String, Event>;

/// Turns user text into a point in time.
pub trait DateParser: Send + Sync {
    /// `forward_date` rolls an ambiguous clock time ("9pm") that already
    /// passed today over to tomorrow.
    fn parse(&self, text: &str, reference: DateTime<Utc>, forward_date: bool) -> Option<DateTime<Utc>>;
}

static RELATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\+|in\s+)(\d+)\s*([a-z]+)$").unwrap());
static CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").unwrap());

/// Understands `+30m`, `in 2 hours`, `2030-06-15 14:30`, `2030-06-15`,
/// `tomorrow at 9am`, `today 18:00` and bare clock times, in one timezone.
pub struct SimpleDateParser {
    tz: Tz,
}

impl SimpleDateParser {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl DateParser for SimpleDateParser {
    fn parse(&self, text: &str, reference: DateTime<Utc>, forward_date: bool) -> Option<DateTime<Utc>> {
        let input = text.trim().to_lowercase();
        if input.is_empty() {
            return None;
        }

        if RELATIVE.is_match(&input) {
            return parse_relative(&input).and_then(|offset| reference.checked_add_signed(offset));
        }

        if let Ok(naive) = NaiveDateTime::parse_from_str(&input, "%Y-%m-%d %H:%M") {
            return self.localize(naive);
        }
        if let Ok(date) = NaiveDate::parse_from_str(&input, "%Y-%m-%d") {
            return self.localize(date.and_hms_opt(0, 0, 0)?);
        }

        let local_ref = reference.with_timezone(&self.tz);
        let (day_offset, rest) = if let Some(rest) = input.strip_prefix("tomorrow") {
            (Some(1), rest)
        } else if let Some(rest) = input.strip_prefix("today") {
            (Some(0), rest)
        } else {
            (None, input.as_str())
        };
        let rest = rest.trim();
        let rest = rest.strip_prefix("at").map(str::trim).unwrap_or(rest);

        let time = match (rest.is_empty(), day_offset) {
            (true, Some(_)) => local_ref.time(),
            (true, None) => return None,
            (false, _) => parse_clock(rest)?,
        };

        let date = local_ref.date_naive().checked_add_signed(TimeDelta::try_days(day_offset.unwrap_or(0))?)?;
        let when = self.localize(date.and_time(time))?;
        if forward_date && day_offset.is_none() && when <= reference {
            return self.localize(date.succ_opt()?.and_time(time));
        }
        Some(when)
    }
}

/// `None` for unknown units and for offsets chrono can't represent.
fn parse_relative(input: &str) -> Option<TimeDelta> {
    let caps = RELATIVE.captures(input)?;
    let num: i64 = caps[1].parse().ok()?;
    match &caps[2] {
        "m" | "min" | "mins" | "minute" | "minutes" => TimeDelta::try_minutes(num),
        "h" | "hr" | "hrs" | "hour" | "hours" => TimeDelta::try_hours(num),
        "d" | "day" | "days" => TimeDelta::try_days(num),
        "w" | "week" | "weeks" => TimeDelta::try_weeks(num),
        _ => None,
    }
}

fn parse_clock(input: &str) -> Option<NaiveTime> {
    let caps = CLOCK.captures(input)?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
    match caps.get(3).map(|m| m.as_str()) {
        Some(suffix) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            hour %= 12;
            if suffix == "pm" {
                hour += 12;
            }
        }
        None if caps.get(2).is_none() => return None,
        None => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// User input for a new event.
#[derive(Debug, Clone)]
pub struct EventDraft<'a> {
    pub title: &'a str,
    pub when: &'a str,
    pub owner_id: &'a str,
    pub owner_name: &'a str,
    pub early_minutes: Option<i64>,
    pub message_id: Option<String>,
}

pub fn create_event(
    record: &GroupRecord,
    draft: EventDraft<'_>,
    parser: &dyn DateParser,
    now: DateTime<Utc>,
) -> Result<(EventMap, ScheduledEvent)> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(BotError::Validation("Please give the event a name.".into()));
    }
    let key = normalize_key(title);
    if record.events.contains_key(&key) {
        return Err(BotError::Validation(format!(
            "An event called \"{title}\" already exists."
        )));
    }
    let when = parser.parse(draft.when, now, true).ok_or_else(|| {
        BotError::Parse(format!("I couldn't figure out when \"{}\" is.", draft.when.trim()))
    })?;
    if when <= now {
        return Err(BotError::Validation("That time is already in the past.".into()));
    }
    if let Some(minutes) = draft.early_minutes
        && minutes <= 0
    {
        return Err(BotError::Validation("Early reminders need a positive number of minutes.".into()));
    }

    let timestamp = when.timestamp_millis();
    let remind_at = match draft.early_minutes {
        Some(minutes) => {
            let at = minutes
                .checked_mul(60_000)
                .and_then(|lead| timestamp.checked_sub(lead))
                .filter(|at| *at > now.timestamp_millis())
                .ok_or_else(|| {
                    BotError::Validation(format!(
                        "An early reminder {minutes} minutes ahead would already be in the past."
                    ))
                })?;
            Some(at)
        }
        None => None,
    };
    let event = ScheduledEvent {
        title: title.to_string(),
        key_title: key.clone(),
        timestamp,
        owner: draft.owner_id.to_string(),
        owner_name: draft.owner_name.to_string(),
        remind_at,
        message_id: draft.message_id,
        going: vec![draft.owner_name.to_string()],
        not_going: vec![],
        notified: false,
        early_notified: false,
    };

    let mut events = record.events.clone();
    events.insert(key, Event::Event(event.clone()));
    Ok((events, event))
}

pub fn create_reminder(
    record: &GroupRecord,
    text: &str,
    when: &str,
    owner_id: &str,
    owner_name: &str,
    parser: &dyn DateParser,
    now: DateTime<Utc>,
) -> Result<(EventMap, Reminder)> {
    let text = text.trim();
    if text.is_empty() {
        return Err(BotError::Validation("What should I remind you about?".into()));
    }
    let at = parser.parse(when, now, true).ok_or_else(|| {
        BotError::Parse(format!("I couldn't figure out when \"{}\" is.", when.trim()))
    })?;
    if at <= now {
        return Err(BotError::Validation("That time is already in the past.".into()));
    }

    let timestamp = at.timestamp_millis();
    let key = format!("{}_{}_{}", owner_id, record.thread_id, timestamp);
    if record.events.contains_key(&key) {
        return Err(BotError::Validation("You already have a reminder at that exact time.".into()));
    }
    let reminder = Reminder {
        reminder_text: text.to_string(),
        key_title: key.clone(),
        timestamp,
        owner: owner_id.to_string(),
        owner_name: owner_name.to_string(),
        notified: false,
    };

    let mut events = record.events.clone();
    events.insert(key, Event::Reminder(reminder.clone()));
    Ok((events, reminder))
}

/// Resolve user text to an event key: an event title, or the text of one of
/// the requester's reminders.
fn resolve_key(record: &GroupRecord, title: &str, requester: &str) -> Option<String> {
    let key = normalize_key(title);
    if record.events.contains_key(&key) {
        return Some(key);
    }
    record.events.iter().find_map(|(k, e)| match e {
        Event::Reminder(r) if r.owner == requester && normalize_key(&r.reminder_text) == key => {
            Some(k.clone())
        }
        _ => None,
    })
}

/// Remove an event. Only its owner may do this.
pub fn delete_event(record: &GroupRecord, title: &str, requester: &str) -> Result<(EventMap, Event)> {
    if title.trim().is_empty() {
        return Err(BotError::Validation("Which event should I delete?".into()));
    }
    let key = resolve_key(record, title, requester)
        .ok_or_else(|| BotError::Validation(format!("No event called \"{}\".", title.trim())))?;

    let mut events = record.events.clone();
    let Some(event) = events.get(&key) else {
        return Err(BotError::Validation(format!("No event called \"{}\".", title.trim())));
    };
    if event.owner() != requester {
        return Err(BotError::Validation("Only the person who created it can delete it.".into()));
    }
    let removed = events.remove(&key).ok_or_else(|| BotError::Validation("Already deleted.".into()))?;
    Ok((events, removed))
}

/// Move `responder` into the going or not-going list of an event.
pub fn rsvp(record: &GroupRecord, title: &str, responder: &str, going: bool) -> Result<EventMap> {
    let key = normalize_key(title);
    let mut events = record.events.clone();
    let Some(Event::Event(event)) = events.get_mut(&key) else {
        return Err(BotError::Validation(format!("No event called \"{}\".", title.trim())));
    };
    event.going.retain(|r| r != responder);
    event.not_going.retain(|r| r != responder);
    if going {
        event.going.push(responder.to_string());
    } else {
        event.not_going.push(responder.to_string());
    }
    Ok(events)
}

/// Events and reminders in chronological order.
pub fn list_events(record: &GroupRecord) -> Vec<&Event> {
    let mut events: Vec<&Event> = record.events.values().collect();
    events.sort_by_key(|e| e.timestamp());
    events
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Early,
    Start,
}

/// Something the notifier should announce.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub key: String,
    pub kind: NoticeKind,
    pub text: String,
    pub mentions: Vec<String>,
}

/// Announcements due at `now` that have not been sent yet.
pub fn due_notifications(record: &GroupRecord, now: DateTime<Utc>, tz: Tz) -> Vec<Notice> {
    let now_ms = now.timestamp_millis();
    let mut notices = Vec::new();
    for (key, event) in &record.events {
        match event {
            Event::Event(e) if !e.notified && e.timestamp <= now_ms => notices.push(Notice {
                key: key.clone(),
                kind: NoticeKind::Start,
                text: format!("Happening now: {}! Going: {}", e.title, going_list(e)),
                mentions: vec![e.owner.clone()],
            }),
            Event::Event(e)
                if !e.early_notified && !e.notified && e.remind_at.is_some_and(|at| at <= now_ms) =>
            {
                notices.push(Notice {
                    key: key.clone(),
                    kind: NoticeKind::Early,
                    text: format!("Reminder: {} starts {}.", e.title, format_time(e.timestamp, tz)),
                    mentions: vec![e.owner.clone()],
                })
            }
            Event::Reminder(r) if !r.notified && r.timestamp <= now_ms => notices.push(Notice {
                key: key.clone(),
                kind: NoticeKind::Start,
                text: format!("Reminder for {}: {}", r.owner_name, r.reminder_text),
                mentions: vec![r.owner.clone()],
            }),
            _ => {}
        }
    }
    notices
}

/// Flag a notice as sent so it is not announced again.
pub fn mark_notified(events: &mut EventMap, notice: &Notice) {
    match (events.get_mut(&notice.key), notice.kind) {
        (Some(Event::Event(e)), NoticeKind::Start) => {
            e.notified = true;
            e.early_notified = true;
        }
        (Some(Event::Event(e)), NoticeKind::Early) => e.early_notified = true,
        (Some(Event::Reminder(r)), _) => r.notified = true,
        (None, _) => {}
    }
}

fn going_list(e: &ScheduledEvent) -> String {
    if e.going.is_empty() {
        "nobody yet".to_string()
    } else {
        e.going.join(", ")
    }
}

pub fn format_time(timestamp_ms: i64, tz: Tz) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => dt.with_timezone(&tz).format("%a %b %-d at %-I:%M %p %Z").to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// One-line summary for listings.
pub fn describe(event: &Event, tz: Tz) -> String {
    match event {
        Event::Event(e) => format!(
            "{} ({}) - going: {}, not going: {}",
            e.title,
            format_time(e.timestamp, tz),
            going_list(e),
            e.not_going.len()
        ),
        Event::Reminder(r) => format!(
            "Reminder for {}: {} ({})",
            r.owner_name,
            r.reminder_text,
            format_time(r.timestamp, tz)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 15, 12, 0, 0).unwrap()
    }

    fn parser() -> SimpleDateParser {
        SimpleDateParser::new(chrono_tz::UTC)
    }

    fn draft<'a>(title: &'a str, when: &'a str) -> EventDraft<'a> {
        EventDraft {
            title,
            when,
            owner_id: "1",
            owner_name: "Alice",
            early_minutes: None,
            message_id: None,
        }
    }

    #[test]
    fn test_parse_relative() {
        let p = parser();
        assert_eq!(p.parse("+30m", now(), true), Some(now() + Duration::minutes(30)));
        assert_eq!(p.parse("in 2 hours", now(), true), Some(now() + Duration::hours(2)));
        assert_eq!(p.parse("+1w", now(), true), Some(now() + Duration::weeks(1)));
        assert_eq!(p.parse("+30x", now(), true), None);
    }

    #[test]
    fn test_parse_relative_out_of_range() {
        let p = parser();
        assert_eq!(p.parse("+100000000w", now(), true), None);
        assert_eq!(p.parse("+200000000000d", now(), true), None);
        assert_eq!(p.parse("in 99999999999999999999 minutes", now(), true), None);
    }

    #[test]
    fn test_parse_absolute() {
        let p = parser();
        let when = p.parse("2030-06-20 14:30", now(), true).unwrap();
        assert_eq!(when.format("%Y-%m-%d %H:%M").to_string(), "2030-06-20 14:30");
        let day = p.parse("2030-07-01", now(), true).unwrap();
        assert_eq!(day.format("%Y-%m-%d %H:%M").to_string(), "2030-07-01 00:00");
    }

    #[test]
    fn test_parse_day_words() {
        let p = parser();
        let when = p.parse("tomorrow at 9am", now(), true).unwrap();
        assert_eq!(when.format("%Y-%m-%d %H:%M").to_string(), "2030-06-16 09:00");
        let when = p.parse("today 18:00", now(), true).unwrap();
        assert_eq!(when.format("%Y-%m-%d %H:%M").to_string(), "2030-06-15 18:00");
    }

    #[test]
    fn test_forward_date_rolls_past_clock_time() {
        let p = parser();
        let forward = p.parse("9:00", now(), true).unwrap();
        assert_eq!(forward.format("%Y-%m-%d %H:%M").to_string(), "2030-06-16 09:00");
        let literal = p.parse("9:00", now(), false).unwrap();
        assert_eq!(literal.format("%Y-%m-%d %H:%M").to_string(), "2030-06-15 09:00");
    }

    #[test]
    fn test_parse_timezone() {
        let p = SimpleDateParser::new(chrono_tz::America::New_York);
        let when = p.parse("2030-06-20 14:30", now(), true).unwrap();
        assert_eq!(when.format("%H:%M").to_string(), "18:30");
    }

    #[test]
    fn test_parse_garbage() {
        let p = parser();
        assert_eq!(p.parse("whenever", now(), true), None);
        assert_eq!(p.parse("", now(), true), None);
        assert_eq!(p.parse("13pm", now(), true), None);
        assert_eq!(p.parse("7", now(), true), None);
    }

    #[test]
    fn test_create_event() {
        let record = GroupRecord::new("t1");
        let mut d = draft("Movie Night", "tomorrow at 8pm");
        d.early_minutes = Some(30);
        let (events, event) = create_event(&record, d, &parser(), now()).unwrap();
        assert_eq!(event.key_title, "movie night");
        assert_eq!(event.remind_at, Some(event.timestamp - 30 * 60_000));
        assert_eq!(event.going, vec!["Alice".to_string()]);
        assert!(events.contains_key("movie night"));
        assert!(record.events.is_empty());
    }

    #[test]
    fn test_early_reminder_must_fit_before_event() {
        let record = GroupRecord::new("t1");
        let mut d = draft("Party", "+1h");
        d.early_minutes = Some(999_999_999_999_999);
        let err = create_event(&record, d, &parser(), now()).unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));

        let mut d = draft("Party", "+1h");
        d.early_minutes = Some(90);
        let err = create_event(&record, d, &parser(), now()).unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));

        let mut d = draft("Party", "+1h");
        d.early_minutes = Some(59);
        let (_, event) = create_event(&record, d, &parser(), now()).unwrap();
        assert_eq!(event.remind_at, Some(event.timestamp - 59 * 60_000));
    }

    #[test]
    fn test_duplicate_title_rejected() {
        let mut record = GroupRecord::new("t1");
        let (events, original) = create_event(&record, draft("Movie Night", "+1h"), &parser(), now()).unwrap();
        record.events = events;

        let err = create_event(&record, draft("  movie NIGHT ", "+3h"), &parser(), now()).unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        assert_eq!(record.events["movie night"], Event::Event(original));
    }

    #[test]
    fn test_unnamed_and_unparseable() {
        let record = GroupRecord::new("t1");
        let err = create_event(&record, draft("  ", "+1h"), &parser(), now()).unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        let err = create_event(&record, draft("Party", "someday"), &parser(), now()).unwrap_err();
        assert!(matches!(err, BotError::Parse(_)));
    }

    #[test]
    fn test_reminder_key_unique_per_owner_thread_time() {
        let record = GroupRecord::new("t1");
        let (events, reminder) =
            create_reminder(&record, "call mom", "+30m", "1", "Alice", &parser(), now()).unwrap();
        let expected = format!("1_t1_{}", (now() + Duration::minutes(30)).timestamp_millis());
        assert_eq!(reminder.key_title, expected);
        assert!(events.contains_key(&expected));
    }

    #[test]
    fn test_delete_requires_owner() {
        let mut record = GroupRecord::new("t1");
        record.events = create_event(&record, draft("Party", "+1h"), &parser(), now()).unwrap().0;

        let err = delete_event(&record, "party", "2").unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        assert!(record.events.contains_key("party"));

        let (events, removed) = delete_event(&record, "Party", "1").unwrap();
        assert!(!events.contains_key("party"));
        assert_eq!(removed.key(), "party");
    }

    #[test]
    fn test_delete_reminder_by_text() {
        let mut record = GroupRecord::new("t1");
        record.events = create_reminder(&record, "Call Mom", "+30m", "1", "Alice", &parser(), now())
            .unwrap()
            .0;
        assert!(delete_event(&record, "call mom", "2").is_err());
        let (events, _) = delete_event(&record, "call mom", "1").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_rsvp_moves_between_lists() {
        let mut record = GroupRecord::new("t1");
        record.events = create_event(&record, draft("Party", "+1h"), &parser(), now()).unwrap().0;
        record.events = rsvp(&record, "party", "Bob", true).unwrap();
        record.events = rsvp(&record, "party", "Bob", false).unwrap();
        let Event::Event(e) = &record.events["party"] else { panic!("not an event") };
        assert_eq!(e.going, vec!["Alice".to_string()]);
        assert_eq!(e.not_going, vec!["Bob".to_string()]);
        assert!(rsvp(&record, "nope", "Bob", true).is_err());
    }

    #[test]
    fn test_due_notifications_and_marking() {
        let mut record = GroupRecord::new("t1");
        let mut d = draft("Party", "+1h");
        d.early_minutes = Some(15);
        record.events = create_event(&record, d, &parser(), now()).unwrap().0;

        let tz = chrono_tz::UTC;
        assert!(due_notifications(&record, now(), tz).is_empty());

        let early = due_notifications(&record, now() + Duration::minutes(50), tz);
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].kind, NoticeKind::Early);
        mark_notified(&mut record.events, &early[0]);
        assert!(due_notifications(&record, now() + Duration::minutes(50), tz).is_empty());

        let start = due_notifications(&record, now() + Duration::minutes(61), tz);
        assert_eq!(start.len(), 1);
        assert_eq!(start[0].kind, NoticeKind::Start);
        mark_notified(&mut record.events, &start[0]);
        assert!(due_notifications(&record, now() + Duration::days(1), tz).is_empty());
        assert!(record.events.contains_key("party"));
    }

    #[test]
    fn test_list_events_sorted() {
        let mut record = GroupRecord::new("t1");
        record.events = create_event(&record, draft("Later", "+3h"), &parser(), now()).unwrap().0;
        record.events = create_event(&record, draft("Sooner", "+1h"), &parser(), now()).unwrap().0;
        let keys: Vec<&str> = list_events(&record).iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["sooner", "later"]);
    }
}
