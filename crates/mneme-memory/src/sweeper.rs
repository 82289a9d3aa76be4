//! Decay & consolidation sweep.
//!
//! One sweep walks every entry older than `min_age_hours` in id order, one
//! bounded batch at a time, and for each entry:
//!
//! 1. promotes frequently used episodic memories into a new semantic entry,
//! 2. multiplies importance by `decay_factor`,
//! 3. deletes the entry if it is now below `prune_floor`, older than
//!    `retention_days` and accessed fewer than `low_use_threshold` times.
//!
//! Entries are processed independently. The store lock is only held per
//! statement, and the shutdown signal is checked between batches, so a
//! cancelled sweep just leaves the remaining entries for the next run.

use chrono::{DateTime, TimeDelta, Utc};
use mneme_config::SweepConfig;
use mneme_core::{AgentId, Category, MemoryId, MnemeError, Tier};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::entry::{EntryUpdate, MemoryEntry, clamp_unit, now};
use crate::store::{MemoryFilter, RecordStore};

/// Tag carried by every semantic entry created through promotion.
pub const PROMOTED_TAG: &str = "promoted";

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub decayed: usize,
    pub pruned: usize,
    pub promoted: usize,
    /// Entries folded into consolidated duplicates.
    pub merged: usize,
    pub failed: usize,
    /// Stopped early because shutdown was requested.
    pub cancelled: bool,
    /// Stopped early because the store could not be read.
    pub aborted: bool,
}

fn hours(n: u64) -> TimeDelta {
    i64::try_from(n)
        .ok()
        .and_then(TimeDelta::try_hours)
        .unwrap_or(TimeDelta::MAX)
}

fn days(n: u64) -> TimeDelta {
    i64::try_from(n)
        .ok()
        .and_then(TimeDelta::try_days)
        .unwrap_or(TimeDelta::MAX)
}

/// Apply one step of decay. Never increases importance and never goes below 0.0.
pub fn decay(importance: f64, factor: f64) -> f64 {
    let factor = clamp_unit(factor);
    (clamp_unit(importance) * factor).max(0.0)
}

pub struct Sweeper {
    store: Arc<dyn RecordStore>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(store: Arc<dyn RecordStore>, config: SweepConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run one sweep against the current time.
    pub fn sweep(&self, cancel: &watch::Receiver<bool>) -> SweepReport {
        self.sweep_at(now(), cancel)
    }

    /// Run one sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>, cancel: &watch::Receiver<bool>) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(cutoff) = now.checked_sub_signed(hours(self.config.min_age_hours)) else {
            debug!(min_age_hours = self.config.min_age_hours, "no memory is old enough to sweep");
            return report;
        };
        let batch_size = self.config.batch_size.max(1);
        // Entries created by this sweep are never swept by it
        let mut created: HashSet<MemoryId> = HashSet::new();
        let mut after: Option<MemoryId> = None;

        debug!(%cutoff, batch_size, "memory sweep starting");

        loop {
            if *cancel.borrow() {
                info!(scanned = report.scanned, "memory sweep cancelled");
                report.cancelled = true;
                return report;
            }

            let batch = match self.store.scan_batch(cutoff, after, batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, scanned = report.scanned, "memory sweep aborted: cannot read batch");
                    report.aborted = true;
                    return report;
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);
            let full = batch.len() == batch_size;

            for entry in batch {
                if created.contains(&entry.id) {
                    continue;
                }
                self.process(entry, now, &mut created, &mut report);
            }

            if !full {
                break;
            }
        }

        if self.config.merge_duplicates {
            self.merge_duplicates(now, cutoff, cancel, &mut report);
        }

        info!(
            scanned = report.scanned,
            decayed = report.decayed,
            pruned = report.pruned,
            promoted = report.promoted,
            merged = report.merged,
            failed = report.failed,
            "memory sweep finished"
        );
        report
    }

    fn process(
        &self,
        entry: MemoryEntry,
        now: DateTime<Utc>,
        created: &mut HashSet<MemoryId>,
        report: &mut SweepReport,
    ) {
        report.scanned += 1;

        if self.should_promote(&entry, report) {
            let promoted = self.promote(&entry);
            match self.store.put(&promoted) {
                Ok(id) => {
                    debug!(source = %entry.id, promoted = %id, "promoted episodic memory");
                    created.insert(id);
                    report.promoted += 1;
                }
                Err(e) => {
                    warn!(memory_id = %entry.id, error = %e, "failed to promote memory");
                    report.failed += 1;
                }
            }
        }

        let importance = decay(entry.importance, self.config.decay_factor);
        let retention = days(self.config.retention_days);
        let prunable = importance < self.config.prune_floor
            && entry.age(now) > retention
            && entry.access_count < self.config.low_use_threshold;

        let result = if prunable {
            self.store.delete(entry.id)
        } else {
            self.store
                .update_importance_and_access(entry.id, &EntryUpdate::consolidate(importance, now))
        };

        match result {
            Ok(()) if prunable => {
                debug!(memory_id = %entry.id, importance, "pruned memory");
                report.pruned += 1;
            }
            Ok(()) => report.decayed += 1,
            Err(MnemeError::NotFound(_)) => {
                debug!(memory_id = %entry.id, "memory vanished during sweep");
            }
            Err(e) => {
                warn!(memory_id = %entry.id, error = %e, "failed to sweep memory, skipping");
                report.failed += 1;
            }
        }
    }

    /// Thresholds are checked on every sweep; an episode is promoted at most once.
    fn should_promote(&self, entry: &MemoryEntry, report: &mut SweepReport) -> bool {
        let eligible = self.config.promote_episodic
            && entry.tier == Tier::Episodic
            && entry.importance > self.config.promote_min_importance
            && entry.access_count > self.config.promote_min_access;
        if !eligible {
            return false;
        }

        let existing = MemoryFilter::for_owner(entry.owner_agent_id.clone())
            .tier(Tier::Semantic)
            .tags([PROMOTED_TAG])
            .related_to(entry.id)
            .limit(1);
        match self.store.query(&existing) {
            Ok(found) => found.is_empty(),
            Err(e) => {
                warn!(memory_id = %entry.id, error = %e, "cannot check for earlier promotion, skipping");
                report.failed += 1;
                false
            }
        }
    }

    /// A new semantic entry distilled from an episodic one.
    fn promote(&self, source: &MemoryEntry) -> MemoryEntry {
        MemoryEntry::new(
            source.owner_agent_id.clone(),
            Tier::Semantic,
            source.category,
            format!("Learned: {}", source.content),
        )
        .with_context(json!({
            "promoted_from": source.id,
            "source_context": source.context,
        }))
        .with_tags(source.tags.iter().cloned())
        .with_tags([PROMOTED_TAG])
        .with_importance(source.importance * self.config.promote_boost)
        .with_confidence(source.confidence)
        .with_related(source.id)
    }

    /// Fold low-importance entries older than `cutoff` with identical owner,
    /// tier, category and content into one consolidated entry.
    fn merge_duplicates(
        &self,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        cancel: &watch::Receiver<bool>,
        report: &mut SweepReport,
    ) {
        let batch_size = self.config.batch_size.max(1);
        let mut groups: HashMap<(AgentId, Tier, Category, String), Vec<MemoryEntry>> =
            HashMap::new();
        let mut after: Option<MemoryId> = None;

        loop {
            if *cancel.borrow() {
                report.cancelled = true;
                return;
            }
            let batch = match self.store.scan_batch(cutoff, after, batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "skipping duplicate merge: cannot read candidates");
                    return;
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);
            let full = batch.len() == batch_size;

            for entry in batch
                .into_iter()
                .filter(|e| e.importance < self.config.merge_max_importance)
            {
                let key = (
                    entry.owner_agent_id.clone(),
                    entry.tier,
                    entry.category,
                    entry.content.trim().to_lowercase(),
                );
                groups.entry(key).or_default().push(entry);
            }

            if !full {
                break;
            }
        }

        for group in groups.into_values().filter(|g| g.len() > 1) {
            if *cancel.borrow() {
                report.cancelled = true;
                return;
            }

            let merged = consolidate_group(&group, now);
            if let Err(e) = self.store.put(&merged) {
                warn!(error = %e, size = group.len(), "failed to store merged memory, keeping duplicates");
                report.failed += 1;
                continue;
            }

            for entry in &group {
                match self.store.delete(entry.id) {
                    Ok(()) | Err(MnemeError::NotFound(_)) => report.merged += 1,
                    Err(e) => {
                        error!(memory_id = %entry.id, merged_into = %merged.id, error = %e, "failed to delete merged duplicate");
                        report.failed += 1;
                    }
                }
            }
            debug!(merged_into = %merged.id, size = group.len(), "merged duplicate memories");
        }
    }
}

/// Summed access count, max importance, union of tags and links.
fn consolidate_group(group: &[MemoryEntry], now: DateTime<Utc>) -> MemoryEntry {
    let first = &group[0];
    let member_ids: BTreeSet<MemoryId> = group.iter().map(|e| e.id).collect();

    let mut merged = MemoryEntry::new(
        first.owner_agent_id.clone(),
        first.tier,
        first.category,
        first.content.clone(),
    )
    .with_context(first.context.clone())
    .with_tags(group.iter().flat_map(|e| e.tags.iter().cloned()))
    .with_importance(group.iter().map(|e| e.importance).fold(0.0, f64::max))
    .with_confidence(group.iter().map(|e| e.confidence).fold(0.0, f64::max));

    merged.access_count = group.iter().map(|e| e.access_count).sum();
    if let Some(earliest) = group.iter().map(|e| e.created_at).min() {
        merged.created_at = earliest;
    }
    if let Some(latest) = group.iter().map(|e| e.accessed_at).max() {
        merged.accessed_at = latest;
    }
    merged.last_consolidated_at = Some(now);
    merged.related_memory_ids = group
        .iter()
        .flat_map(|e| e.related_memory_ids.iter().copied())
        .filter(|id| !member_ids.contains(id))
        .collect();
    merged
}

impl Sweeper {
    /// Sweep every `interval_secs` until `shutdown` flips to true.
    ///
    /// The first sweep runs immediately. Each sweep runs on the blocking pool
    /// and observes the same shutdown signal between batches.
    pub async fn run_periodic(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config.interval_secs.max(1));
        info!(interval_secs = period.as_secs(), "memory sweeper started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let sweeper = Arc::clone(&self);
            let cancel = shutdown.clone();
            match tokio::task::spawn_blocking(move || sweeper.sweep(&cancel)).await {
                Ok(report) if report.cancelled => break,
                Ok(_) => {}
                Err(e) => error!(error = %e, "memory sweep task failed"),
            }
        }

        info!("memory sweeper stopped");
    }
}
