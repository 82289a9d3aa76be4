//! # mneme-core
//!
//! Core types and primitives for the Mneme memory engine.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! the error type, memory tiers and categories, and the task boundary types the
//! external task executor hands over after each task.

pub mod error;
pub mod task;
pub mod types;

pub use error::{MnemeError, Result};
pub use task::{TaskDescriptor, TaskOutcome};
pub use types::*;
