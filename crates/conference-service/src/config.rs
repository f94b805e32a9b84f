//! Conference service configuration.
//!
//! Configuration is loaded from environment variables. The database URL and
//! the message encryption key are redacted in Debug output.

use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::{ExposeSecret, SecretBox};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Conferences older than this many days become reclamation candidates.
pub const DEFAULT_CONFERENCE_RETENTION_DAYS: i64 = 30;

/// Temporary participants older than this many hours become reclamation candidates.
pub const DEFAULT_TEMPORARY_PARTICIPANT_MAX_AGE_HOURS: i64 = 24;

/// Default conference cleanup interval (72 hours).
pub const DEFAULT_CONFERENCE_CLEANUP_INTERVAL_SECONDS: u64 = 72 * 60 * 60;

/// Default temporary participant cleanup interval (1 hour).
pub const DEFAULT_PARTICIPANT_CLEANUP_INTERVAL_SECONDS: u64 = 60 * 60;

/// Default bcrypt cost for conference passwords.
pub const DEFAULT_PASSWORD_HASH_COST: u32 = 10;

/// Default drain period before shutdown, in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Length of the AES-256-GCM message key in bytes.
pub const MESSAGE_KEY_LENGTH: usize = 32;

/// Conference service configuration.
pub struct Config {
    /// PostgreSQL connection URL. `None` selects the in-memory store.
    pub database_url: Option<String>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// AES-256-GCM key used to encrypt message text at rest.
    pub message_encryption_key: SecretBox<[u8; MESSAGE_KEY_LENGTH]>,

    pub conference_retention_days: i64,

    pub temporary_participant_max_age_hours: i64,

    /// Fallback interval when the `conferenceInterval` setting is absent.
    pub conference_cleanup_interval: Duration,

    /// Fallback interval when the `userInterval` setting is absent.
    pub participant_cleanup_interval: Duration,

    /// When true, a conference with any active join is never reclaimed.
    pub reclaim_require_idle: bool,

    /// bcrypt cost factor (4..=31).
    pub password_hash_cost: u32,

    pub drain_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("message_encryption_key", &"[REDACTED]")
            .field("conference_retention_days", &self.conference_retention_days)
            .field(
                "temporary_participant_max_age_hours",
                &self.temporary_participant_max_age_hours,
            )
            .field(
                "conference_cleanup_interval",
                &self.conference_cleanup_interval,
            )
            .field(
                "participant_cleanup_interval",
                &self.participant_cleanup_interval,
            )
            .field("reclaim_require_idle", &self.reclaim_require_idle)
            .field("password_hash_cost", &self.password_hash_cost)
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            database_url: self.database_url.clone(),
            bind_address: self.bind_address.clone(),
            message_encryption_key: SecretBox::new(Box::new(
                *self.message_encryption_key.expose_secret(),
            )),
            conference_retention_days: self.conference_retention_days,
            temporary_participant_max_age_hours: self.temporary_participant_max_age_hours,
            conference_cleanup_interval: self.conference_cleanup_interval,
            participant_cleanup_interval: self.participant_cleanup_interval,
            reclaim_require_idle: self.reclaim_require_idle,
            password_hash_cost: self.password_hash_cost,
            drain_seconds: self.drain_seconds,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid message encryption key: {0}")]
    InvalidEncryptionKey(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .cloned();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let encoded_key = vars
            .get("MESSAGE_ENCRYPTION_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("MESSAGE_ENCRYPTION_KEY".to_string()))?;
        let message_encryption_key = decode_message_key(encoded_key)?;

        let conference_retention_days = positive(
            vars,
            "CONFERENCE_RETENTION_DAYS",
            DEFAULT_CONFERENCE_RETENTION_DAYS,
        )?;

        let temporary_participant_max_age_hours = positive(
            vars,
            "TEMPORARY_PARTICIPANT_MAX_AGE_HOURS",
            DEFAULT_TEMPORARY_PARTICIPANT_MAX_AGE_HOURS,
        )?;

        let conference_cleanup_interval = Duration::from_secs(positive(
            vars,
            "CONFERENCE_CLEANUP_INTERVAL_SECONDS",
            DEFAULT_CONFERENCE_CLEANUP_INTERVAL_SECONDS,
        )?);

        let participant_cleanup_interval = Duration::from_secs(positive(
            vars,
            "PARTICIPANT_CLEANUP_INTERVAL_SECONDS",
            DEFAULT_PARTICIPANT_CLEANUP_INTERVAL_SECONDS,
        )?);

        let reclaim_require_idle = match vars.get("RECLAIM_REQUIRE_IDLE") {
            None => true,
            Some(value) => value.parse::<bool>().map_err(|e| ConfigError::InvalidValue {
                name: "RECLAIM_REQUIRE_IDLE".to_string(),
                reason: format!("expected 'true' or 'false', got '{}': {}", value, e),
            })?,
        };

        let password_hash_cost =
            positive(vars, "PASSWORD_HASH_COST", DEFAULT_PASSWORD_HASH_COST)?;
        if !(4..=31).contains(&password_hash_cost) {
            return Err(ConfigError::InvalidValue {
                name: "PASSWORD_HASH_COST".to_string(),
                reason: format!("must be between 4 and 31, got {}", password_hash_cost),
            });
        }

        let drain_seconds = match vars.get("CS_DRAIN_SECONDS") {
            None => DEFAULT_DRAIN_SECONDS,
            Some(value) => value.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                name: "CS_DRAIN_SECONDS".to_string(),
                reason: format!("must be a non-negative integer, got '{}': {}", value, e),
            })?,
        };

        Ok(Config {
            database_url,
            bind_address,
            message_encryption_key,
            conference_retention_days,
            temporary_participant_max_age_hours,
            conference_cleanup_interval,
            participant_cleanup_interval,
            reclaim_require_idle,
            password_hash_cost,
            drain_seconds,
        })
    }
}

fn decode_message_key(
    encoded: &str,
) -> Result<SecretBox<[u8; MESSAGE_KEY_LENGTH]>, ConfigError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfigError::InvalidEncryptionKey(format!("not valid base64: {}", e)))?;

    let key: [u8; MESSAGE_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        ConfigError::InvalidEncryptionKey(format!(
            "expected {} bytes, got {}",
            MESSAGE_KEY_LENGTH,
            bytes.len()
        ))
    })?;

    Ok(SecretBox::new(Box::new(key)))
}

/// Parse an optional strictly positive integer variable.
fn positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("must be a valid positive integer, got '{}': {}", value_str, e),
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    Ok(value)
}
