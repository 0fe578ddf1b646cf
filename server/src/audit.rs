//! Append-only request audit log.
//!
//! One CSV line per request:
//!
//! ```text
//! "<ms>","<kind>","<user agent>","<address>","<origin>","<artifact>","<size|err>"[,"<anomaly>"...]
//! ```
//!
//! Writing is best effort. A failed write is logged and never fails the
//! request it describes.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::params::ParameterAnomaly;

/// What kind of request a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    /// The start page was viewed.
    StartPage,
    /// A fresh build was dispatched.
    Build,
    /// A continuation was dispatched.
    Continue,
    /// The request was rejected before classification completed.
    Rejected,
}

impl AuditEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartPage => "start",
            Self::Build => "build",
            Self::Continue => "continue",
            Self::Rejected => "rejected",
        }
    }
}

/// Size column of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSize {
    /// Size of the input in bytes; zero for continuations.
    Bytes(u64),
    /// The request failed.
    Error,
}

/// One audit line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub timestamp_ms: u64,
    pub event: AuditEvent,
    pub user_agent: String,
    pub client_address: String,
    /// The origin the client declared, verbatim.
    pub origin: String,
    /// Resolved artifact path the request worked on, if any.
    pub artifact: String,
    pub size: AuditSize,
    pub anomalies: Vec<ParameterAnomaly>,
}

impl AuditRecord {
    /// Render the record as one CSV line without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        let size = match self.size {
            AuditSize::Bytes(bytes) => bytes.to_string(),
            AuditSize::Error => "err".to_string(),
        };
        let mut line = String::new();
        let fields = [
            self.timestamp_ms.to_string(),
            self.event.as_str().to_string(),
            self.user_agent.clone(),
            self.client_address.clone(),
            self.origin.clone(),
            self.artifact.clone(),
            size,
        ];
        for (index, field) in fields
            .iter()
            .cloned()
            .chain(self.anomalies.iter().map(ToString::to_string))
            .enumerate()
        {
            if index > 0 {
                line.push(',');
            }
            let _ = write!(line, "\"{}\"", quote(&field));
        }
        line
    }
}

/// Escape a CSV field and flatten line breaks.
fn quote(field: &str) -> String {
    field
        .replace('"', "\"\"")
        .replace(['\r', '\n'], " ")
}

/// Append-only audit log file.
///
/// A log without a path discards records.
#[derive(Debug)]
pub struct AuditLog {
    path: Option<PathBuf>,
    // Serializes appends so lines from concurrent requests never interleave.
    write_lock: Mutex<()>,
}

impl AuditLog {
    #[must_use]
    pub const fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(None)
    }

    /// Append a record. Failures are logged and swallowed.
    pub fn record(&self, record: &AuditRecord) {
        let Some(path) = &self.path else {
            return;
        };
        let line = record.to_line();

        let Ok(_guard) = self.write_lock.lock() else {
            tracing::warn!("audit log lock poisoned, dropping record");
            return;
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));

        if let Err(e) = result {
            tracing::warn!("failed to write audit record to {}: {e}", path.display());
        }
    }
}
