//! Error taxonomy for the aggregation core and its file-backed collaborators.

use thiserror::Error;

/// Errors raised by the aggregation core.
///
/// `MissingData`, `Configuration`, `NamingCollision` and `InsufficientHistory`
/// come from the computation itself; the remaining variants wrap failures at the
/// file boundary (`sources`, `storage`).
#[derive(Debug, Error)]
pub enum AggError {
    /// A ratio denominator never overlaps the numerator for any year of a group.
    #[error("missing data for group '{group}': {detail}")]
    MissingData { group: String, detail: String },

    /// Invalid grouping key, unknown taxonomy, out-of-range threshold, ...
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Two requested groups produced the same label for the same year.
    #[error("naming collision: label '{label}' in {year} is produced by both '{first}' and '{second}'")]
    NamingCollision {
        label: String,
        year: i32,
        first: String,
        second: String,
    },

    /// A group has no years of data, so its expected reporting count is undefined.
    #[error("insufficient history: group '{0}' has no years of data")]
    InsufficientHistory(String),

    /// A cell in an input file could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AggError>;

impl AggError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
