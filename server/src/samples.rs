//! Canned sample inputs offered on the start page.
//!
//! Only names from [`SAMPLES`] are accepted; client input is never joined
//! onto a filesystem path.

use std::path::{Path, PathBuf};

/// A sample input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub name: &'static str,
    pub description: &'static str,
}

/// Every sample, in menu order. Each holds random integers in `0..1_000_000`.
pub const SAMPLES: [Sample; 4] = [
    Sample {
        name: "r0100",
        description: "100 random integers",
    },
    Sample {
        name: "r0500",
        description: "500 random integers",
    },
    Sample {
        name: "r1000",
        description: "1000 random integers",
    },
    Sample {
        name: "r5000",
        description: "5000 random integers",
    },
];

/// Sample preselected on the start page.
pub const DEFAULT_SAMPLE: &str = "r1000";

/// Error returned when a sample cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    /// The name is not in the catalog.
    Unknown(String),
    /// The name is known but its file is missing.
    Missing(PathBuf),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "unknown sample '{name}'"),
            Self::Missing(path) => write!(f, "sample file {} is missing", path.display()),
        }
    }
}

impl std::error::Error for SampleError {}

/// Resolves sample names to files in the sample directory.
#[derive(Debug, Clone)]
pub struct SampleCatalog {
    directory: PathBuf,
}

impl SampleCatalog {
    #[must_use]
    pub const fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Resolve a sample name to an existing file.
    ///
    /// # Errors
    ///
    /// Returns `Unknown` for names outside the catalog and `Missing` when the
    /// file is not present.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, SampleError> {
        let sample = SAMPLES
            .iter()
            .find(|sample| sample.name == name.trim())
            .ok_or_else(|| SampleError::Unknown(name.to_string()))?;

        let path = self.directory.join(sample.name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(SampleError::Missing(path))
        }
    }
}
