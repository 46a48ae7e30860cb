//! Configuration types.
//!
//! Everything is read from the environment at startup. Only the bot token
//! and the control chat are required.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default database location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "./data/post-relay.db";

/// Process-wide relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Chat that receives service messages and operator commands.
    pub control_chat_id: i64,
    /// Operator display name used in greetings.
    pub owner_name: String,
    /// Operator user id, written into synthetic CSV rows.
    pub owner_id: i64,
    /// SQLite/libSQL database file.
    pub db_path: PathBuf,
    /// Forward no-forward-protected content anyway.
    pub enable_forbidden_content: bool,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Build the configuration from `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("RELAY_BOT_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_BOT_TOKEN".into()))?;

        let control_chat_id = lookup("RELAY_CONTROL_CHAT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_CONTROL_CHAT_ID".into()))
            .and_then(|raw| parse_i64("RELAY_CONTROL_CHAT_ID", &raw))?;

        let owner_id = match lookup("RELAY_OWNER_ID") {
            Some(raw) => parse_i64("RELAY_OWNER_ID", &raw)?,
            None => 0,
        };

        let enable_forbidden_content = match lookup("RELAY_ENABLE_FORBIDDEN_CONTENT") {
            Some(raw) => parse_bool("RELAY_ENABLE_FORBIDDEN_CONTENT", &raw)?,
            None => false,
        };

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            control_chat_id,
            owner_name: lookup("RELAY_OWNER_NAME").unwrap_or_else(|| "operator".to_string()),
            owner_id,
            db_path: lookup("RELAY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            enable_forbidden_content,
            log_dir: lookup("RELAY_LOG_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// The subset of settings the router needs.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            control_chat_id: self.control_chat_id,
            enable_forbidden_content: self.enable_forbidden_content,
        }
    }

    /// The subset of settings the control panel needs.
    pub fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            control_chat_id: self.control_chat_id,
            owner_name: self.owner_name.clone(),
            owner_id: self.owner_id,
        }
    }
}

/// Router settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterConfig {
    /// Where dispatch failures are reported.
    pub control_chat_id: i64,
    /// Forward no-forward-protected content anyway.
    pub enable_forbidden_content: bool,
}

/// Control panel settings.
#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    /// The only chat commands are accepted from.
    pub control_chat_id: i64,
    pub owner_name: String,
    pub owner_id: i64,
}

fn parse_i64(key: &str, raw: &str) -> Result<i64, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{e}"),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
