//! # mneme-config
//!
//! Configuration system for the Mneme memory engine. Reads from `mneme.toml`,
//! environment variables, and CLI overrides, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod schema;
pub mod loader;

pub use schema::MnemeConfig;
pub use schema::{
    ConfigWarning, LoggingConfig, MemoryConfig, RetrievalConfig, ScoringConfig, SweepConfig,
    WarningSeverity,
};
pub use loader::ConfigLoader;
