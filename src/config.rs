//! Process configuration
//!
//! Read once at startup from the environment (an optional `.env` file is
//! loaded first). Privileged identities live here and are handed to the
//! engine; nothing re-reads them later.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default bind address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was present but could not be parsed
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Engine tunables and privileged identities
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The single Owner identity
    pub owner: String,
    /// Display label shown for the Owner
    pub owner_label: String,
    /// Admins granted at startup
    pub seed_admins: Vec<String>,
    /// Delay before an empty private room is deleted
    pub room_expiry: Duration,
    /// Capacity of private rooms
    pub max_private_members: usize,
    /// Number of recent messages sent to a joiner
    pub history_window: usize,
    /// Maximum message length in characters
    pub max_message_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            owner: "owner".to_string(),
            owner_label: "Owner".to_string(),
            seed_admins: Vec::new(),
            room_expiry: Duration::from_secs(5 * 60),
            max_private_members: 15,
            history_window: 45,
            max_message_len: 400,
        }
    }
}

/// Full process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub engine: EngineConfig,
}

impl Config {
    /// Build the configuration from `RELAY_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let seed_admins = lookup("RELAY_ADMINS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let expiry_secs = parse_or(&lookup, "RELAY_ROOM_EXPIRY_SECS", defaults.room_expiry.as_secs())?;

        Ok(Self {
            bind_addr: lookup("RELAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            engine: EngineConfig {
                owner: lookup("RELAY_OWNER").unwrap_or(defaults.owner),
                owner_label: lookup("RELAY_OWNER_LABEL").unwrap_or(defaults.owner_label),
                seed_admins,
                room_expiry: Duration::from_secs(expiry_secs),
                max_private_members: parse_or(
                    &lookup,
                    "RELAY_MAX_PRIVATE_MEMBERS",
                    defaults.max_private_members,
                )?,
                history_window: parse_or(&lookup, "RELAY_HISTORY_WINDOW", defaults.history_window)?,
                max_message_len: parse_or(&lookup, "RELAY_MAX_MESSAGE_LEN", defaults.max_message_len)?,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
