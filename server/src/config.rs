//! Server configuration module.
//!
//! This module provides configuration loading for the visualizer server from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `BTREE_TOKEN_SECRET`: Secret for signing session tokens (required)
//! - `BTREE_LISTEN_PORT`: Port to listen on (default: `3000`)
//! - `BTREE_SESSION_DIRECTORY`: Directory for session artifacts (default: `./sessions`)
//! - `BTREE_SAMPLE_DIRECTORY`: Directory holding the sample inputs (default: `./samples`)
//! - `BTREE_ENGINE_PATH`: Tree engine executable (default: `./visualize_btree`)
//! - `BTREE_AUDIT_LOG`: Audit log file (default: no audit log)
//! - `BTREE_SESSION_TTL_SECS`: Session time-to-live (default: `1197`)
//! - `BTREE_ID_REUSE_AFTER_SECS`: Idle time before an id may be reused (default: `1200`)
//! - `BTREE_ID_MIN`, `BTREE_ID_MAX`: Session id range (default: `10`..=`25`)
//! - `BTREE_ALLOCATION_ATTEMPTS`: Id samples before giving up (default: `32`)
//! - `BTREE_ENGINE_TIMEOUT_SECS`: Engine run limit (default: `30`)
//! - `BTREE_SWEEP_INTERVAL_SECS`: Sweep period (default: `60`)
//! - `BTREE_SWEEP_GRACE_MULTIPLE`: TTLs past expiry before a sweep reclaims (default: `2`)
//! - `BTREE_MAX_UPLOAD_BYTES`: Upload size limit (default: `256000`)
//! - `BTREE_TOKEN_LIFETIME_SECS`: Session token lifetime (default: `86400`)
//!
//! # Invariants
//!
//! - `listen_port` is always a valid port number (1-65535)
//! - `id_min <= id_max` and `id_min >= 1`
//! - `token_secret` is never empty

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::session::{SessionConfig, SweepConfig};

/// Server configuration.
///
/// # Pre-conditions
///
/// When constructed via `from_env()`:
/// - `BTREE_TOKEN_SECRET` must be set
/// - All values that are set must be valid for their respective types
#[derive(Clone)]
pub struct ServerConfig {
    /// Secret for signing session tokens.
    pub token_secret: Vec<u8>,
    /// Port to listen on for HTTP connections.
    pub listen_port: u16,
    /// Directory where session artifacts are stored.
    pub session_directory: PathBuf,
    /// Directory holding the canned sample inputs.
    pub sample_directory: PathBuf,
    /// Tree engine executable.
    pub engine_path: PathBuf,
    /// Audit log file, if auditing is enabled.
    pub audit_log: Option<PathBuf>,
    pub session_ttl_secs: u64,
    pub id_reuse_after_secs: u64,
    pub id_min: u32,
    pub id_max: u32,
    pub allocation_attempts: u32,
    pub engine_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_grace_multiple: u64,
    pub max_upload_bytes: usize,
    pub token_lifetime_secs: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("token_secret", &"<redacted>")
            .field("listen_port", &self.listen_port)
            .field("session_directory", &self.session_directory)
            .field("sample_directory", &self.sample_directory)
            .field("engine_path", &self.engine_path)
            .field("audit_log", &self.audit_log)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("id_reuse_after_secs", &self.id_reuse_after_secs)
            .field("id_min", &self.id_min)
            .field("id_max", &self.id_max)
            .field("allocation_attempts", &self.allocation_attempts)
            .field("engine_timeout_secs", &self.engine_timeout_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("sweep_grace_multiple", &self.sweep_grace_multiple)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .finish()
    }
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Default port for the server.
    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_SESSION_DIRECTORY: &'static str = "./sessions";
    pub const DEFAULT_SAMPLE_DIRECTORY: &'static str = "./samples";
    pub const DEFAULT_ENGINE_PATH: &'static str = "./visualize_btree";
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
    pub const DEFAULT_SWEEP_GRACE_MULTIPLE: u64 = 2;
    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 256_000;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `BTREE_TOKEN_SECRET` is not set or is empty
    /// - a numeric variable is set but not a valid number
    /// - the id range is empty or includes zero
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token_secret = load_token_secret(&lookup)?;
        let session_defaults = SessionConfig::default();

        let id_min = load_number(&lookup, "BTREE_ID_MIN", *session_defaults.id_range.start())?;
        let id_max = load_number(&lookup, "BTREE_ID_MAX", *session_defaults.id_range.end())?;
        if id_min == 0 || id_min > id_max {
            return Err(ConfigError::InvalidValue {
                name: "BTREE_ID_MIN".to_string(),
                message: format!("id range {id_min}..={id_max} must be non-empty and start at 1 or above"),
            });
        }

        let allocation_attempts = load_number(
            &lookup,
            "BTREE_ALLOCATION_ATTEMPTS",
            session_defaults.allocation_attempts,
        )?;
        if allocation_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "BTREE_ALLOCATION_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            token_secret,
            listen_port: load_number(&lookup, "BTREE_LISTEN_PORT", Self::DEFAULT_PORT)?,
            session_directory: load_path(
                &lookup,
                "BTREE_SESSION_DIRECTORY",
                Self::DEFAULT_SESSION_DIRECTORY,
            ),
            sample_directory: load_path(
                &lookup,
                "BTREE_SAMPLE_DIRECTORY",
                Self::DEFAULT_SAMPLE_DIRECTORY,
            ),
            engine_path: load_path(&lookup, "BTREE_ENGINE_PATH", Self::DEFAULT_ENGINE_PATH),
            audit_log: lookup("BTREE_AUDIT_LOG")
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            session_ttl_secs: load_number(
                &lookup,
                "BTREE_SESSION_TTL_SECS",
                session_defaults.ttl_secs,
            )?,
            id_reuse_after_secs: load_number(
                &lookup,
                "BTREE_ID_REUSE_AFTER_SECS",
                session_defaults.id_reuse_after_secs,
            )?,
            id_min,
            id_max,
            allocation_attempts,
            engine_timeout_secs: load_number(&lookup, "BTREE_ENGINE_TIMEOUT_SECS", 30)?,
            sweep_interval_secs: load_number(
                &lookup,
                "BTREE_SWEEP_INTERVAL_SECS",
                Self::DEFAULT_SWEEP_INTERVAL_SECS,
            )?,
            sweep_grace_multiple: load_number(
                &lookup,
                "BTREE_SWEEP_GRACE_MULTIPLE",
                Self::DEFAULT_SWEEP_GRACE_MULTIPLE,
            )?,
            max_upload_bytes: load_number(
                &lookup,
                "BTREE_MAX_UPLOAD_BYTES",
                Self::DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            token_lifetime_secs: load_number(&lookup, "BTREE_TOKEN_LIFETIME_SECS", 86_400)?,
        })
    }

    /// Session store settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ttl_secs: self.session_ttl_secs,
            id_reuse_after_secs: self.id_reuse_after_secs,
            id_range: self.id_min..=self.id_max,
            allocation_attempts: self.allocation_attempts,
        }
    }

    /// Background sweep settings derived from this configuration.
    #[must_use]
    pub const fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            grace_multiple: self.sweep_grace_multiple,
        }
    }

    #[must_use]
    pub const fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

/// Load the token secret.
///
/// # Errors
///
/// Returns an error if the variable is not set or is empty.
fn load_token_secret(lookup: &impl Fn(&str) -> Option<String>) -> Result<Vec<u8>, ConfigError> {
    let secret = lookup("BTREE_TOKEN_SECRET")
        .ok_or_else(|| ConfigError::MissingEnvVar("BTREE_TOKEN_SECRET".to_string()))?;

    if secret.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: "BTREE_TOKEN_SECRET".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    Ok(secret.into_bytes())
}

/// Load a path, falling back to `default` when not set.
fn load_path(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> PathBuf {
    lookup(name)
        .filter(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Load a number, falling back to `default` when not set.
///
/// # Errors
///
/// Returns an error if the value is set but does not parse.
fn load_number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a valid number"),
        }),
        None => Ok(default),
    }
}
