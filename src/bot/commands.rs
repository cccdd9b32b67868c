//! Chat command dispatch.

use chrono::Utc;
use tracing::{info, warn};

use crate::bot::engine::GroupKeeper;
use crate::bot::error::{BotError, Result};
use crate::bot::events::{self, EventDraft};
use crate::bot::group::GroupRecord;
use crate::bot::health::format_counts;
use crate::bot::message::InboundMessage;
use crate::bot::pins;
use crate::bot::properties::GroupProperty;

/// Every command the bot answers to.
pub const COMMANDS: &[&str] = &[
    "help", "score", "scores", "stats", "pin", "unpin", "pins", "event", "remind", "events",
    "delete", "going", "notgoing", "alias", "unalias", "mute", "unmute", "photo", "covid", "refresh",
];

const HELP: &str = "\
/score <name> ++|-- - give or take points
/scores - leaderboard
/stats [command] - command usage
/pin <name> <text> - pin something; /pin <name> to recall it
/unpin <name>, /pins
/event <title> | <when> [| <minutes early>] - schedule an event
/remind <when> | <text> - personal reminder
/events, /delete <title>, /going <title>, /notgoing <title>
/alias <name> <alias>, /unalias <name>
/mute, /unmute - admins only
/photo [image url] - change the chat photo (no url: use the photo sent with or just before it)
/covid [country | state <name> | province <name>]
/refresh - reload chat info";

/// Run the command in `msg`, if any. Returns the reply text.
///
/// `previous` is the message seen in the thread before this one, used when
/// a command falls back to an earlier attachment.
pub async fn dispatch(
    keeper: &GroupKeeper,
    msg: &InboundMessage,
    previous: Option<&InboundMessage>,
) -> Result<Option<String>> {
    let Some((name, args)) = msg.command() else {
        return Ok(None);
    };

    if !COMMANDS.contains(&name.as_str()) {
        let record = keeper.store.get_one(&msg.thread_id).await?;
        if record.is_some_and(|r| !r.muted) {
            return Ok(Some(format!("I don't know /{name}. Try /help.")));
        }
        return Ok(None);
    }

    info!("Command /{} from {} in {}", name, msg.sender_id, msg.thread_id);
    if let Err(e) = keeper.ledger.update_stats(&name, &msg.sender_id).await {
        warn!("Couldn't record usage of /{}: {}", name, e);
    }

    let mut record = keeper.current_record(&msg.thread_id).await?;
    let reply = match name.as_str() {
        "help" => HELP.to_string(),
        "score" => score(keeper, &record, msg, args).await?,
        "scores" => scores(keeper, &record).await,
        "stats" => stats(keeper, args).await?,
        "pin" => pin(keeper, &mut record, msg, args).await?,
        "unpin" => {
            let pinned = pins::unpin(&record, args)?;
            set(keeper, &mut record, GroupProperty::Pinned(pinned)).await?;
            format!("Unpinned \"{}\".", args.trim())
        }
        "pins" => {
            let names = pins::list_pins(&record);
            if names.is_empty() {
                "Nothing is pinned yet.".to_string()
            } else {
                format!("Pins: {}", names.join(", "))
            }
        }
        "event" => event(keeper, &mut record, msg, args).await?,
        "remind" => remind(keeper, &mut record, msg, args).await?,
        "events" => {
            let listed = events::list_events(&record);
            if listed.is_empty() {
                "No upcoming events.".to_string()
            } else {
                listed
                    .iter()
                    .map(|e| events::describe(e, keeper.config.timezone))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "delete" => {
            let (remaining, removed) = events::delete_event(&record, args, &msg.sender_id)?;
            set(keeper, &mut record, GroupProperty::Events(remaining)).await?;
            format!("Deleted {}.", events::describe(&removed, keeper.config.timezone))
        }
        "going" | "notgoing" => {
            let going = name == "going";
            let updated = events::rsvp(&record, args, &msg.sender_name, going)?;
            set(keeper, &mut record, GroupProperty::Events(updated)).await?;
            if going {
                format!("See you at {}!", args.trim())
            } else {
                format!("Got it, you're skipping {}.", args.trim())
            }
        }
        "alias" => {
            let (who, alias) = split_first(args);
            let aliases = pins::set_alias(&record, who, alias)?;
            set(keeper, &mut record, GroupProperty::Aliases(aliases)).await?;
            format!("\"{}\" now works as a name too.", alias.trim())
        }
        "unalias" => {
            let aliases = pins::clear_alias(&record, args)?;
            set(keeper, &mut record, GroupProperty::Aliases(aliases)).await?;
            "Alias removed.".to_string()
        }
        "mute" | "unmute" => {
            require_admin(&record, &msg.sender_id)?;
            let muted = name == "mute";
            set(keeper, &mut record, GroupProperty::Muted(muted)).await?;
            if muted { "Muted.".to_string() } else { "Unmuted.".to_string() }
        }
        "photo" => photo(keeper, &mut record, msg, previous, args).await?,
        "covid" => covid(keeper, args).await?,
        "refresh" => {
            let record = keeper.refresher.refresh(&msg.thread_id, None).await?;
            format!("Refreshed \"{}\" ({} members).", record.name, record.members.len())
        }
        _ => return Ok(None),
    };

    Ok(Some(reply))
}

async fn set(keeper: &GroupKeeper, record: &mut GroupRecord, property: GroupProperty) -> Result<GroupRecord> {
    keeper.updater.set_property(record, property).await?.written()
}

/// "a b c" -> ("a", "b c")
fn split_first(args: &str) -> (&str, &str) {
    let args = args.trim();
    match args.find(char::is_whitespace) {
        Some(i) => (&args[..i], args[i..].trim()),
        None => (args, ""),
    }
}

fn require_admin(record: &GroupRecord, user_id: &str) -> Result<()> {
    if record.is_group && !record.is_admin(user_id) {
        return Err(BotError::Validation("Only admins can do that.".into()));
    }
    Ok(())
}

async fn score(keeper: &GroupKeeper, record: &GroupRecord, msg: &InboundMessage, args: &str) -> Result<String> {
    let args = args.trim();
    let (target_text, change) = if let Some(rest) = args.strip_suffix("++") {
        (rest, Some(true))
    } else if let Some(rest) = args.strip_suffix("--") {
        (rest, Some(false))
    } else {
        (args, None)
    };

    let target = if target_text.trim().is_empty() {
        msg.sender_id.clone()
    } else {
        record
            .match_user(target_text)
            .ok_or_else(|| BotError::Validation(format!("I don't know who \"{}\" is.", target_text.trim())))?
    };
    let name = record.display_name(&target);

    match change {
        Some(is_add) => {
            if target == msg.sender_id {
                return Err(BotError::Validation("You can't change your own score.".into()));
            }
            let score = keeper.ledger.update_score(is_add, &target).await?;
            Ok(format!("{name}'s score is now {score}."))
        }
        None => {
            let score = keeper.ledger.get_score(&target).await?;
            Ok(format!("{name} has {score} points."))
        }
    }
}

async fn scores(keeper: &GroupKeeper, record: &GroupRecord) -> String {
    let members: Vec<String> = record.names.keys().cloned().collect();
    if members.is_empty() {
        return "I don't know anyone here yet.".to_string();
    }
    let gathered = keeper.ledger.get_all_scores(&members).await;
    let mut lines: Vec<String> = gathered
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. {}: {}", i + 1, record.display_name(&e.user_id), e.score))
        .collect();
    if !gathered.success {
        let missing: Vec<String> = gathered.missing.iter().map(|id| record.display_name(id)).collect();
        lines.push(format!("(no answer in time for {})", missing.join(", ")));
    }
    lines.join("\n")
}

async fn stats(keeper: &GroupKeeper, args: &str) -> Result<String> {
    let command = args.trim().trim_start_matches('/').to_lowercase();
    if !command.is_empty() {
        let stats = keeper.ledger.get_stats(&command).await?;
        return Ok(format!(
            "/{} has been used {} times by {} people.",
            stats.command,
            stats.total,
            stats.unique_users()
        ));
    }

    let total = keeper.ledger.total_usage().await?;
    let gathered = keeper.ledger.get_all_stats(COMMANDS).await;
    let mut lines = vec![format!("{total} commands run in total.")];
    lines.extend(
        gathered
            .entries
            .iter()
            .filter(|s| s.total > 0)
            .map(|s| format!("/{}: {}", s.command, s.total)),
    );
    if !gathered.success {
        lines.push(format!("(missing: {})", gathered.missing.join(", ")));
    }
    Ok(lines.join("\n"))
}

async fn pin(keeper: &GroupKeeper, record: &mut GroupRecord, msg: &InboundMessage, args: &str) -> Result<String> {
    let (name, text) = split_first(args);
    if text.is_empty() {
        let pinned = pins::recall(record, name)?;
        return Ok(format!("{} (pinned by {})", pinned.text, pinned.author));
    }
    let pinned = pins::pin(record, name, text, &msg.sender_name, Utc::now())?;
    set(keeper, record, GroupProperty::Pinned(pinned)).await?;
    Ok(format!("Pinned \"{}\".", name.trim().to_lowercase()))
}

async fn event(keeper: &GroupKeeper, record: &mut GroupRecord, msg: &InboundMessage, args: &str) -> Result<String> {
    let parts: Vec<&str> = args.split('|').map(str::trim).collect();
    let (title, when) = match parts.as_slice() {
        [title, when, ..] => (*title, *when),
        _ => return Err(BotError::Validation("Usage: /event <title> | <when> [| <minutes early>]".into())),
    };
    let early_minutes = match parts.get(2) {
        Some(m) if !m.is_empty() => Some(
            m.parse::<i64>()
                .map_err(|_| BotError::Validation(format!("\"{m}\" isn't a number of minutes.")))?,
        ),
        _ => None,
    };

    let draft = EventDraft {
        title,
        when,
        owner_id: &msg.sender_id,
        owner_name: &msg.sender_name,
        early_minutes,
        message_id: Some(msg.message_id.clone()),
    };
    let (updated, created) = events::create_event(record, draft, keeper.parser.as_ref(), Utc::now())?;
    set(keeper, record, GroupProperty::Events(updated)).await?;
    Ok(format!(
        "Created {} for {}. Reply /going {} to join.",
        created.title,
        events::format_time(created.timestamp, keeper.config.timezone),
        created.title
    ))
}

async fn remind(keeper: &GroupKeeper, record: &mut GroupRecord, msg: &InboundMessage, args: &str) -> Result<String> {
    let Some((when, text)) = args.split_once('|') else {
        return Err(BotError::Validation("Usage: /remind <when> | <text>".into()));
    };
    let (updated, reminder) = events::create_reminder(
        record,
        text,
        when,
        &msg.sender_id,
        &msg.sender_name,
        keeper.parser.as_ref(),
        Utc::now(),
    )?;
    set(keeper, record, GroupProperty::Events(updated)).await?;
    Ok(format!(
        "I'll remind you {}.",
        events::format_time(reminder.timestamp, keeper.config.timezone)
    ))
}

#[derive(Debug, PartialEq)]
enum PhotoSource<'a> {
    Url(&'a str),
    File(&'a str),
}

/// Where `/photo` gets its image: an explicit URL, else a photo attached to
/// the command itself, else one on the message before it.
fn photo_source<'a>(
    msg: &'a InboundMessage,
    previous: Option<&'a InboundMessage>,
    args: &'a str,
) -> Result<PhotoSource<'a>> {
    let url = args.trim();
    if !url.is_empty() {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(PhotoSource::Url(url));
        }
        return Err(BotError::Validation("Usage: /photo <image url>".into()));
    }
    std::iter::once(msg)
        .chain(previous)
        .find_map(InboundMessage::photo_file)
        .map(PhotoSource::File)
        .ok_or_else(|| {
            BotError::Validation("Send a photo first, or use /photo <image url>.".into())
        })
}

async fn photo(
    keeper: &GroupKeeper,
    record: &mut GroupRecord,
    msg: &InboundMessage,
    previous: Option<&InboundMessage>,
    args: &str,
) -> Result<String> {
    let (image, source) = match photo_source(msg, previous, args)? {
        PhotoSource::Url(url) => (download(keeper, url).await?, url.to_string()),
        PhotoSource::File(file_id) => (keeper.provider.download_file(file_id).await?, file_id.to_string()),
    };

    keeper.provider.change_group_image(image, &msg.thread_id).await?;
    set(keeper, record, GroupProperty::Image(Some(source))).await?;
    if let Err(e) = keeper
        .provider
        .set_message_reaction("👍", &msg.message_id, &msg.thread_id)
        .await
    {
        warn!("Couldn't react in {}: {}", msg.thread_id, e);
    }
    Ok("New photo is up.".to_string())
}

async fn download(keeper: &GroupKeeper, url: &str) -> Result<Vec<u8>> {
    let response = keeper
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| BotError::Provider(format!("HTTP error: {e}")))?;
    if !response.status().is_success() {
        return Err(BotError::Validation(format!("Couldn't download that image ({}).", response.status())));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| BotError::Provider(format!("image download failed: {e}")))?;
    Ok(bytes.to_vec())
}

async fn covid(keeper: &GroupKeeper, args: &str) -> Result<String> {
    let args = args.trim();
    let (kind, place) = split_first(args);
    let counts = match kind.to_lowercase().as_str() {
        "" => keeper.health.global().await?,
        "state" if !place.is_empty() => keeper.health.state(place).await?,
        "province" if !place.is_empty() => keeper.health.province(place).await?,
        _ => keeper.health.country(args).await?,
    };
    Ok(format_counts(&counts))
}
