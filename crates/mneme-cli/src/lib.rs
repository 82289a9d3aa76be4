//! # mneme-cli
//!
//! Command-line interface for the Mneme agent memory engine.
//!
//! ## Commands
//!
//! - `mneme record`: Classify a finished task and store its memories
//! - `mneme recall`: Retrieve ranked memories for an agent
//! - `mneme sweep`: Run one decay & consolidation sweep
//! - `mneme run`: Sweep periodically until interrupted
//! - `mneme stats`: Per-agent memory statistics
//! - `mneme get`: Show a single memory and its related entries
//! - `mneme config`: Show or check the configuration

pub mod commands;

pub use commands::{Cli, resolve_db_path};
