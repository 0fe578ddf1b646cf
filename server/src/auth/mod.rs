//! Session token authentication.
//!
//! A fresh build returns a signed token naming the session it created.
//! Continuation requests must present that token; it replaces trusting the
//! `Referer` header as the anti-forgery check.
//!
//! # Invariants
//! - Signing secrets are never empty.
//! - A token is bound to one session id and that session's creation time, so
//!   it stops working once the id is reallocated to someone else.

pub mod token;

pub use token::{SessionClaims, SessionTokens, TokenError};

/// Error returned when token configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenConfigError {
    /// The HS256 secret is empty.
    EmptySecret,
}

impl std::fmt::Display for TokenConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySecret => write!(f, "token secret must not be empty"),
        }
    }
}

impl std::error::Error for TokenConfigError {}

/// Signing configuration for session tokens.
#[derive(Clone)]
pub struct TokenConfig {
    secret: Vec<u8>,
    /// How long an issued token stays valid, in seconds.
    pub lifetime_secs: u64,
}

impl TokenConfig {
    /// Default token lifetime: one day.
    pub const DEFAULT_LIFETIME_SECS: u64 = 86_400;

    /// Create an HS256 configuration.
    ///
    /// # Errors
    /// Returns `TokenConfigError::EmptySecret` if the secret is empty.
    pub fn new_hs256(secret: Vec<u8>, lifetime_secs: u64) -> Result<Self, TokenConfigError> {
        if secret.is_empty() {
            return Err(TokenConfigError::EmptySecret);
        }
        Ok(Self {
            secret,
            lifetime_secs,
        })
    }

    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

// Never print the secret.
impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("lifetime_secs", &self.lifetime_secs)
            .finish()
    }
}
