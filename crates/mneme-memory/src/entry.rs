use chrono::{DateTime, SubsecRound, Utc};
use mneme_core::{AgentId, Category, MemoryId, MnemeError, Tier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// A single memory record.
///
/// Only `importance`, `access_count`, `accessed_at` and `last_consolidated_at`
/// change after creation. Moving a memory to another tier means creating a new
/// entry that links back through `related_memory_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub owner_agent_id: AgentId,
    pub tier: Tier,
    pub category: Category,
    pub content: String,
    /// Structured auxiliary data (task parameters, execution metadata).
    pub context: Value,
    pub tags: BTreeSet<String>,
    /// Ranking and retention priority, 0.0-1.0.
    pub importance: f64,
    /// Confidence score 0.0-1.0.
    pub confidence: f64,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub last_consolidated_at: Option<DateTime<Utc>>,
    /// Ids of linked memories. Resolved through the store; targets may be gone.
    pub related_memory_ids: BTreeSet<MemoryId>,
}

/// A mutation of the mutable bookkeeping fields of one entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryUpdate {
    /// New importance (clamped to 0.0-1.0 by the store).
    pub importance: Option<f64>,
    /// Increment `access_count` and set `accessed_at` to now.
    pub touch_access: bool,
    /// Set `last_consolidated_at`.
    pub consolidated_at: Option<DateTime<Utc>>,
}

impl EntryUpdate {
    /// A retrieval hit.
    pub fn touch() -> Self {
        Self {
            touch_access: true,
            ..Self::default()
        }
    }

    /// A sweeper pass that leaves the entry at `importance`.
    pub fn consolidate(importance: f64, at: DateTime<Utc>) -> Self {
        Self {
            importance: Some(importance),
            touch_access: false,
            consolidated_at: Some(at),
        }
    }
}

/// Current time at the precision the store persists (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Clamp a score into 0.0-1.0. NaN becomes 0.0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl MemoryEntry {
    /// Create a new entry with a fresh id, neutral importance and full confidence.
    pub fn new(
        owner_agent_id: impl Into<AgentId>,
        tier: Tier,
        category: Category,
        content: impl Into<String>,
    ) -> Self {
        let created_at = now();
        Self {
            id: Uuid::new_v4(),
            owner_agent_id: owner_agent_id.into(),
            tier,
            category,
            content: content.into(),
            context: Value::Null,
            tags: BTreeSet::new(),
            importance: 0.5,
            confidence: 1.0,
            access_count: 0,
            created_at,
            accessed_at: created_at,
            last_consolidated_at: None,
            related_memory_ids: BTreeSet::new(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = clamp_unit(importance);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_related(mut self, id: MemoryId) -> Self {
        self.related_memory_ids.insert(id);
        self
    }

    /// Backdate creation and last access, for imports.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        let created_at = created_at.trunc_subsecs(6);
        self.created_at = created_at;
        self.accessed_at = created_at;
        self
    }

    /// Age of the entry relative to `now`. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    /// Reject entries the store must never hold.
    pub fn validate(&self) -> mneme_core::Result<()> {
        if self.owner_agent_id.trim().is_empty() {
            return Err(MnemeError::invalid("owner_agent_id", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(MnemeError::invalid(
                "importance",
                format!("{} is outside 0.0..=1.0", self.importance),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(MnemeError::invalid(
                "confidence",
                format!("{} is outside 0.0..=1.0", self.confidence),
            ));
        }
        if self.related_memory_ids.contains(&self.id) {
            return Err(MnemeError::invalid(
                "related_memory_ids",
                "an entry cannot be related to itself",
            ));
        }
        Ok(())
    }
}
