//! Tree parameter sanitization.
//!
//! Leaf size, fanout and build mode arrive as free-form form fields. Invalid
//! values never fail a request: they are replaced by defaults, and every
//! substitution is reported as a [`ParameterAnomaly`] so it ends up in the
//! audit log.
//!
//! # Invariants
//!
//! - A validated leaf size is always within `LEAF_SIZE_RANGE`.
//! - A validated fanout is always within `FANOUT_RANGE`.

use std::fmt;
use std::ops::RangeInclusive;

/// Default maximum records per leaf.
pub const DEFAULT_LEAF_SIZE: u32 = 40;
/// Default maximum fanout of an internal node.
pub const DEFAULT_FANOUT: u32 = 10;
/// Each leaf is stored in one engine block.
pub const LEAF_SIZE_RANGE: RangeInclusive<u32> = 2..=2045;
/// Each internal node is stored in one engine block.
pub const FANOUT_RANGE: RangeInclusive<u32> = 4..=1024;

/// How the engine should construct a fresh tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Repeated insertion of every input value.
    #[default]
    Insert,
    /// Bottom-up bulk loading of the sorted input.
    BulkLoad,
}

impl BuildMode {
    /// The single-letter form value used by the web forms.
    #[must_use]
    pub const fn form_value(self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::BulkLoad => "b",
        }
    }
}

/// Which form field an anomaly was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterField {
    LeafSize,
    Fanout,
    BuildMode,
}

impl ParameterField {
    /// The form field name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LeafSize => "lns",
            Self::Fanout => "fan",
            Self::BuildMode => "blm",
        }
    }
}

/// A parameter that was replaced by its default.
///
/// Not an error: the request proceeds with the default value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterAnomaly {
    pub field: ParameterField,
    /// The raw submitted value; empty when the field was absent.
    pub raw: String,
}

impl fmt::Display for ParameterAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.field.name(), self.raw)
    }
}

/// Raw, unvalidated tree parameters as submitted by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParameters {
    pub leaf_size: Option<String>,
    pub fanout: Option<String>,
    pub build_mode: Option<String>,
}

/// Validated tree parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParameters {
    pub leaf_size: u32,
    pub fanout: u32,
    pub build_mode: BuildMode,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            leaf_size: DEFAULT_LEAF_SIZE,
            fanout: DEFAULT_FANOUT,
            build_mode: BuildMode::default(),
        }
    }
}

/// Result of validation: usable parameters plus every substitution made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub parameters: TreeParameters,
    pub anomalies: Vec<ParameterAnomaly>,
}

/// Validate raw parameters, falling back to defaults.
///
/// # Post-conditions
///
/// - Never fails.
/// - `anomalies` contains one entry per field that was substituted.
#[must_use]
pub fn validate(raw: &RawParameters) -> Validated {
    let mut anomalies = Vec::new();

    let leaf_size = validate_number(
        raw.leaf_size.as_deref(),
        ParameterField::LeafSize,
        &LEAF_SIZE_RANGE,
        DEFAULT_LEAF_SIZE,
        &mut anomalies,
    );
    let fanout = validate_number(
        raw.fanout.as_deref(),
        ParameterField::Fanout,
        &FANOUT_RANGE,
        DEFAULT_FANOUT,
        &mut anomalies,
    );
    let build_mode = validate_build_mode(raw.build_mode.as_deref(), &mut anomalies);

    Validated {
        parameters: TreeParameters {
            leaf_size,
            fanout,
            build_mode,
        },
        anomalies,
    }
}

fn validate_number(
    raw: Option<&str>,
    field: ParameterField,
    range: &RangeInclusive<u32>,
    default: u32,
    anomalies: &mut Vec<ParameterAnomaly>,
) -> u32 {
    let parsed = raw
        .map(str::trim)
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| range.contains(value));

    parsed.unwrap_or_else(|| {
        anomalies.push(ParameterAnomaly {
            field,
            raw: raw.unwrap_or_default().to_string(),
        });
        default
    })
}

fn validate_build_mode(raw: Option<&str>, anomalies: &mut Vec<ParameterAnomaly>) -> BuildMode {
    match raw.map(str::trim) {
        None | Some("" | "i") => BuildMode::Insert,
        Some("b") => BuildMode::BulkLoad,
        Some(other) => {
            anomalies.push(ParameterAnomaly {
                field: ParameterField::BuildMode,
                raw: other.to_string(),
            });
            BuildMode::Insert
        }
    }
}
