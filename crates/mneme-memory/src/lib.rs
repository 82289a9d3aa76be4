//! # mneme-memory
//!
//! Hierarchical memory for agent personalities:
//!
//! - **Working memory**: conversation context (ephemeral, low importance).
//! - **Episodic memory**: one record per completed task (what happened, how it went).
//! - **Semantic memory**: knowledge and solutions distilled from task results.
//!
//! After each task the [`MemoryClassifier`] decides what to persist, scoring each
//! entry with the [`ImportanceScorer`]. The [`Sweeper`] periodically decays,
//! promotes and prunes entries, and the [`RetrievalEngine`] ranks memories for
//! prompt augmentation. Everything goes through a [`RecordStore`], normally the
//! SQLite-backed [`SqliteStore`].

pub mod classifier;
pub mod entry;
pub mod retrieval;
pub mod scorer;
pub mod store;
pub mod sweeper;

pub use classifier::MemoryClassifier;
pub use entry::{EntryUpdate, MemoryEntry};
pub use retrieval::{QueryContext, RetrievalEngine, format_context};
pub use scorer::ImportanceScorer;
pub use store::{MemoryFilter, MemoryStats, RecordStore, SqliteStore};
pub use sweeper::{SweepReport, Sweeper};
