use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bot::{BotConfig, DEFAULT_API_BASE, DEFAULT_POINTS, DEFAULT_TITLE, WriteMode};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Unknown IANA timezone name.
    InvalidTimezone { name: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidTimezone { name } => write!(f, "unknown timezone '{}'", name),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidTimezone { .. } | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Chat that receives "added to a new chat" notices and restart pings.
    owner_thread_id: Option<i64>,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    default_title: Option<String>,
    bot_nickname: Option<String>,
    #[serde(default)]
    should_message: bool,
    #[serde(default = "default_true")]
    fail_silently: bool,
    #[serde(default = "default_settle_delay_ms")]
    settle_delay_ms: u64,
    #[serde(default = "default_score_points")]
    score_points: i64,
    #[serde(default = "default_aggregate_timeout_ms")]
    aggregate_timeout_ms: u64,
    #[serde(default)]
    write_mode: WriteMode,
    log_thread_id: Option<i64>,
    health_api_base: Option<String>,
    timezone: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_score_points() -> i64 {
    DEFAULT_POINTS
}

fn default_aggregate_timeout_ms() -> u64 {
    3000
}

pub struct Config {
    pub telegram_bot_token: String,
    /// Directory for state files (logs, database).
    pub data_dir: PathBuf,
    pub log_thread_id: Option<String>,
    pub bot: BotConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.score_points <= 0 {
            return Err(ConfigError::Validation("score_points must be positive".into()));
        }
        if file.aggregate_timeout_ms == 0 {
            return Err(ConfigError::Validation("aggregate_timeout_ms must be positive".into()));
        }

        let timezone = match file.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone { name })?,
            None => chrono_tz::UTC,
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let bot = BotConfig {
            owner_thread_id: file.owner_thread_id.map(|id| id.to_string()),
            default_title: file
                .default_title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            bot_nickname: file.bot_nickname,
            should_message: file.should_message,
            fail_silently: file.fail_silently,
            settle_delay: Duration::from_millis(file.settle_delay_ms),
            score_points: file.score_points,
            aggregate_timeout: Duration::from_millis(file.aggregate_timeout_ms),
            write_mode: file.write_mode,
            timezone,
            health_api_base: file
                .health_api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            ..BotConfig::default()
        };

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            data_dir,
            log_thread_id: file.log_thread_id.map(|id| id.to_string()),
            bot,
        })
    }
}
