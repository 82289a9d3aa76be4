//! Decides which memories a completed task leaves behind.
//!
//! Every task yields one episodic record. A successful task whose result carries
//! a review/summary adds a semantic knowledge entry, and one with a non-empty
//! suggestion list adds a semantic solution entry.

use mneme_core::{Category, TaskDescriptor, TaskOutcome, Tier};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entry::MemoryEntry;
use crate::scorer::ImportanceScorer;
use crate::store::RecordStore;

/// Result fields recognised as a knowledge signal, in order of preference.
const SUMMARY_FIELDS: [&str; 2] = ["summary", "review"];

/// Result field recognised as a solution signal.
const SUGGESTIONS_FIELD: &str = "suggestions";

/// Builds and persists memories for completed tasks.
pub struct MemoryClassifier {
    store: Arc<dyn RecordStore>,
    scorer: ImportanceScorer,
}

impl MemoryClassifier {
    pub fn new(store: Arc<dyn RecordStore>, scorer: ImportanceScorer) -> Self {
        Self { store, scorer }
    }

    /// Classify a finished task and persist the resulting memories.
    ///
    /// Returns the entries that were stored. Store failures are logged and
    /// swallowed; recording memory never fails the task itself.
    pub fn on_task_completed(
        &self,
        task: &TaskDescriptor,
        outcome: &TaskOutcome,
    ) -> Vec<MemoryEntry> {
        let entries = self.classify(task, outcome);
        let planned = entries.len();

        let stored: Vec<MemoryEntry> = entries
            .into_iter()
            .filter(|entry| match self.store.put(entry) {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        agent = %task.agent_id,
                        task_type = %task.task_type,
                        category = %entry.category,
                        error = %e,
                        "failed to store task memory, discarding"
                    );
                    false
                }
            })
            .collect();

        info!(
            agent = %task.agent_id,
            task_type = %task.task_type,
            succeeded = outcome.succeeded,
            stored = stored.len(),
            planned,
            "recorded task memory"
        );
        stored
    }

    /// Build the memories for a finished task without touching the store.
    pub fn classify(&self, task: &TaskDescriptor, outcome: &TaskOutcome) -> Vec<MemoryEntry> {
        let knowledge = outcome
            .succeeded
            .then(|| outcome.result.as_ref().and_then(knowledge_signal))
            .flatten();
        let suggestions = outcome
            .succeeded
            .then(|| outcome.result.as_ref().and_then(solution_signal))
            .flatten();

        let confidence = self.scorer.confidence();
        let has_knowledge = knowledge.is_some();
        let has_solution = suggestions.is_some();

        let episode = MemoryEntry::new(
            task.agent_id.clone(),
            Tier::Episodic,
            Category::Task,
            episode_content(task, outcome),
        )
        .with_context(episode_context(task, outcome))
        .with_tags(task_tags(task, &["episodic"]))
        .with_importance(self.scorer.score(
            Category::Task,
            outcome.succeeded,
            has_knowledge,
            has_solution,
        ))
        .with_confidence(confidence);
        let episode_id = episode.id;

        let mut entries = vec![episode];

        if let Some(summary) = knowledge {
            debug!(agent = %task.agent_id, task_type = %task.task_type, "knowledge signal found");
            entries.push(
                MemoryEntry::new(
                    task.agent_id.clone(),
                    Tier::Semantic,
                    Category::Knowledge,
                    summary,
                )
                .with_context(semantic_context(task))
                .with_tags(task_tags(task, &["knowledge"]))
                .with_importance(self.scorer.score(
                    Category::Knowledge,
                    outcome.succeeded,
                    has_knowledge,
                    has_solution,
                ))
                .with_confidence(confidence)
                .with_related(episode_id),
            );
        }

        if let Some(suggestions) = suggestions {
            debug!(
                agent = %task.agent_id,
                task_type = %task.task_type,
                count = suggestions.len(),
                "solution signal found"
            );
            entries.push(
                MemoryEntry::new(
                    task.agent_id.clone(),
                    Tier::Semantic,
                    Category::Solution,
                    suggestions.join("; "),
                )
                .with_context(semantic_context(task))
                .with_tags(task_tags(task, &["suggestions", "solution"]))
                .with_importance(self.scorer.score(
                    Category::Solution,
                    outcome.succeeded,
                    has_knowledge,
                    has_solution,
                ))
                .with_confidence(confidence)
                .with_related(episode_id),
            );
        }

        entries
    }
}

/// The review/summary text of a result, if it carries one.
fn knowledge_signal(result: &Value) -> Option<String> {
    let obj = result.as_object()?;
    SUMMARY_FIELDS.iter().find_map(|field| {
        let text = match obj.get(*field)? {
            Value::String(s) => s.as_str(),
            // A structured review nests its own summary
            Value::Object(inner) => inner.get("summary")?.as_str()?,
            _ => return None,
        };
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

/// The non-empty suggestion texts of a result, if any.
fn solution_signal(result: &Value) -> Option<Vec<String>> {
    let items = result.as_object()?.get(SUGGESTIONS_FIELD)?.as_array()?;
    let suggestions: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty())
        .collect();
    (!suggestions.is_empty()).then_some(suggestions)
}

fn task_tags(task: &TaskDescriptor, extra: &[&str]) -> Vec<String> {
    let task_type = task.task_type.trim();
    (!task_type.is_empty())
        .then(|| task_type.to_string())
        .into_iter()
        .chain(extra.iter().map(|t| t.to_string()))
        .collect()
}

fn episode_content(task: &TaskDescriptor, outcome: &TaskOutcome) -> String {
    let mut content = format!("Task: {} - {}", task.task_type, task.description);
    if !task.parameters.is_empty() {
        content.push_str(&format!(
            " | Parameters: {}",
            Value::Object(task.parameters.clone())
        ));
    }
    if outcome.succeeded {
        content.push_str(&format!(
            " | Outcome: succeeded in {:.2}s",
            outcome.execution_time_secs
        ));
    } else {
        content.push_str(&format!(
            " | Outcome: failed after {:.2}s",
            outcome.execution_time_secs
        ));
        if let Some(ref err) = outcome.error_message {
            content.push_str(&format!(": {err}"));
        }
    }
    content
}

fn episode_context(task: &TaskDescriptor, outcome: &TaskOutcome) -> Value {
    json!({
        "agent": task.agent_id,
        "task_id": task.task_id,
        "task_type": task.task_type,
        "parameters": task.parameters,
        "success": outcome.succeeded,
        "execution_time_secs": outcome.execution_time_secs,
        "error": outcome.error_message,
    })
}

fn semantic_context(task: &TaskDescriptor) -> Value {
    json!({
        "source_task_type": task.task_type,
        "task_id": task.task_id,
    })
}
