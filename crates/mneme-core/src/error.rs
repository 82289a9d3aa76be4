use thiserror::Error;

use crate::types::MemoryId;

/// Unified error type for the Mneme memory engine.
#[derive(Error, Debug)]
pub enum MnemeError {
    // ── Store errors ───────────────────────────────────────────
    #[error("memory not found: {0}")]
    NotFound(MemoryId),

    #[error("memory store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid memory entry: {field}: {reason}")]
    InvalidEntry { field: String, reason: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MnemeError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean the backing store could not be reached,
    /// as opposed to a problem with the request itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, MnemeError>;
