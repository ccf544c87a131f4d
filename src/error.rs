//! Custom error types for infoscience-import.
//!
//! Input contract violations, unmappable domain data and collaborator
//! failures all share one error enum. Engines decide per call site whether a
//! variant is fatal to a record, recoverable per item, or fatal to the run.

use crate::model::Source;
use thiserror::Error;

/// Main error type for infoscience-import operations.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The same `(source, internal_id)` pair was supplied more than once
    #[error("DuplicateSourceRecordError: {origin}:{internal_id} appears more than once")]
    DuplicateSourceRecord { origin: Source, internal_id: String },

    /// A source record is missing a required field
    #[error("MalformedSourceRecordError: {0}")]
    MalformedSourceRecord(String),

    /// A source doctype has no Infoscience collection mapping
    #[error("UnmappedDoctypeError: {origin} doctype '{doctype}' has no collection mapping")]
    UnmappedDoctype { origin: Source, doctype: String },

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message from API
        message: String,
    },

    /// Response or field parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV table error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML configuration parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ImportError {
    /// Short machine-readable label used as a summary bucket
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::DuplicateSourceRecord { .. } => "duplicate_source_record",
            ImportError::MalformedSourceRecord(_) => "malformed_source_record",
            ImportError::UnmappedDoctype { .. } => "unmapped_doctype",
            ImportError::Network(_) => "network",
            ImportError::Api { .. } => "api",
            ImportError::Parse(_) => "parse",
            ImportError::Io(_) => "io",
            ImportError::Json(_) => "json",
            ImportError::Csv(_) => "csv",
            ImportError::Toml(_) => "toml",
            ImportError::Config(_) => "config",
            ImportError::Validation(_) => "validation",
        }
    }
}

/// Result type alias using `ImportError`
pub type Result<T> = std::result::Result<T, ImportError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ImportError::Parse(msg.to_string()))
    }
}
