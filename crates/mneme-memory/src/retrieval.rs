//! Memory retrieval for response generation.
//!
//! Candidates are an agent's entries matching the query's tags or text. They
//! are ranked by importance weighted with an exponential recency decay on
//! their creation time, and every returned entry counts as an access.

use chrono::{DateTime, Utc};
use mneme_config::RetrievalConfig;
use mneme_core::{Category, Tier};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::entry::{EntryUpdate, MemoryEntry, now};
use crate::store::{MemoryFilter, RecordStore};

/// What the caller is looking for. With neither tags nor text, every entry of
/// the agent is a candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    pub tags: Vec<String>,
    pub text: Option<String>,
    pub tier: Option<Tier>,
    pub category: Option<Category>,
    pub min_importance: Option<f64>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = (!text.trim().is_empty()).then_some(text);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    fn to_filter(&self, owner: &str) -> MemoryFilter {
        let mut filter = MemoryFilter::for_owner(owner)
            .tags(self.tags.iter().cloned())
            .match_any();
        filter.text = self.text.clone();
        filter.tier = self.tier;
        filter.category = self.category;
        filter.min_importance = self.min_importance;
        filter
    }
}

pub struct RetrievalEngine {
    store: Arc<dyn RecordStore>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    /// The `max_results` most relevant memories of `owner`, best first.
    ///
    /// `max_results == 0` means the configured default. Store failures yield
    /// an empty list.
    pub fn retrieve(&self, owner: &str, query: &QueryContext, max_results: usize) -> Vec<MemoryEntry> {
        self.retrieve_at(now(), owner, query, max_results)
    }

    /// [`retrieve`](Self::retrieve) with recency measured from `now`.
    pub fn retrieve_at(
        &self,
        now: DateTime<Utc>,
        owner: &str,
        query: &QueryContext,
        max_results: usize,
    ) -> Vec<MemoryEntry> {
        let limit = if max_results == 0 {
            self.config.default_max_results
        } else {
            max_results
        };
        if limit == 0 {
            return Vec::new();
        }

        let candidates = match self.store.query(&query.to_filter(owner)) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(owner, error = %e, "memory retrieval failed, continuing without memories");
                return Vec::new();
            }
        };
        let candidate_count = candidates.len();

        let mut scored: Vec<(f64, MemoryEntry)> = candidates
            .into_iter()
            .map(|entry| (self.score(&entry, now), entry))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| rank(*sa, a, *sb, b));
        scored.truncate(limit);

        let results: Vec<MemoryEntry> = scored
            .into_iter()
            .map(|(_, mut entry)| {
                match self
                    .store
                    .update_importance_and_access(entry.id, &EntryUpdate::touch())
                {
                    Ok(()) => {
                        entry.access_count += 1;
                        entry.accessed_at = crate::entry::now();
                    }
                    Err(e) => {
                        warn!(memory_id = %entry.id, error = %e, "failed to record memory access");
                    }
                }
                entry
            })
            .collect();

        debug!(
            owner,
            candidates = candidate_count,
            returned = results.len(),
            "retrieved memories"
        );
        results
    }

    /// importance x recency weight of the entry's age at `now`.
    pub fn score(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        let age_hours = entry.age(now).num_milliseconds() as f64 / 3_600_000.0;
        entry.importance
            * recency_weight(
                age_hours,
                self.config.recency_half_life_hours,
                self.config.min_recency_weight,
            )
    }
}

/// `0.5^(age / half_life)`, never below `floor`. Fresh entries weigh 1.0.
pub fn recency_weight(age_hours: f64, half_life_hours: f64, floor: f64) -> f64 {
    if half_life_hours <= 0.0 || age_hours <= 0.0 {
        return 1.0;
    }
    0.5_f64
        .powf(age_hours / half_life_hours)
        .max(floor.clamp(0.0, 1.0))
}

/// Score desc, then importance desc, then newest first. Id as the last resort
/// keeps the order stable across calls.
fn rank(score_a: f64, a: &MemoryEntry, score_b: f64, b: &MemoryEntry) -> Ordering {
    score_b
        .total_cmp(&score_a)
        .then_with(|| b.importance.total_cmp(&a.importance))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Render retrieved memories as a context block for a prompt. Empty input
/// renders as an empty string.
pub fn format_context(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = entries.iter().map(format_entry).collect();
    format!("## Relevant Context from Memory\n\n{}", parts.join("\n\n"))
}

fn format_entry(entry: &MemoryEntry) -> String {
    let label = match (entry.tier, entry.category) {
        (Tier::Semantic, Category::Solution) => "Solution",
        (Tier::Semantic, _) => "Fact",
        (Tier::Episodic, _) => "Event",
        (Tier::Working, _) => "Recent",
    };
    format!(
        "**[{}]** ({}, importance {:.2})\n{}",
        label, entry.category, entry.importance, entry.content
    )
}
