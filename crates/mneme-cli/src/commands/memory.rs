use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use mneme_config::MnemeConfig;
use mneme_core::{Category, MnemeError, TaskDescriptor, TaskOutcome, Tier};
use mneme_memory::{
    ImportanceScorer, MemoryClassifier, QueryContext, RecordStore, RetrievalEngine, SqliteStore,
    format_context,
};

use super::{join_tags, print_entry};

/// Input of `mneme record`: a finished task as reported by the executor.
#[derive(Debug, Deserialize)]
pub(crate) struct TaskRecord {
    pub task: TaskDescriptor,
    pub outcome: TaskOutcome,
}

pub(crate) fn read_task_record(file: &Path) -> mneme_core::Result<TaskRecord> {
    let raw = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).map_err(|e| {
            MnemeError::Config(format!("cannot read task record {}: {e}", file.display()))
        })?
    };
    let record: TaskRecord = serde_json::from_str(&raw)?;
    if record.task.agent_id.trim().is_empty() {
        return Err(MnemeError::invalid("task.agent_id", "must not be empty"));
    }
    Ok(record)
}

pub(super) fn cmd_record(
    config: &MnemeConfig,
    store: Arc<SqliteStore>,
    file: &Path,
    json: bool,
) -> mneme_core::Result<()> {
    let record = read_task_record(file)?;
    let classifier = MemoryClassifier::new(store, ImportanceScorer::new(config.scoring.clone()));
    let stored = classifier.on_task_completed(&record.task, &record.outcome);

    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(());
    }
    if stored.is_empty() {
        println!("No memories stored (see log for details).");
        return Ok(());
    }
    println!("Stored {} memories for {}:", stored.len(), record.task.agent_id);
    for entry in &stored {
        print_entry(entry);
    }
    Ok(())
}

pub(super) fn build_query(
    tags: Vec<String>,
    text: Option<String>,
    tier: Option<Tier>,
    category: Option<Category>,
    min_importance: Option<f64>,
) -> QueryContext {
    let mut query = QueryContext::new().with_tags(tags);
    if let Some(text) = text {
        query = query.with_text(text);
    }
    query.tier = tier;
    query.category = category;
    query.min_importance = min_importance;
    query
}

pub(super) fn cmd_recall(
    config: &MnemeConfig,
    store: Arc<SqliteStore>,
    agent: &str,
    query: &QueryContext,
    limit: usize,
    prompt: bool,
    json: bool,
) -> mneme_core::Result<()> {
    let store: Arc<dyn RecordStore> = store;
    let engine = RetrievalEngine::new(store, config.retrieval.clone());
    let results = engine.retrieve(agent, query, limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if prompt {
        println!("{}", format_context(&results));
        return Ok(());
    }
    if results.is_empty() {
        println!("No matching memories for {agent}.");
        return Ok(());
    }
    for entry in &results {
        print_entry(entry);
        if !entry.tags.is_empty() {
            println!("   tags: {}", join_tags(entry));
        }
    }
    Ok(())
}
