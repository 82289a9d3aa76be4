use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, maps to `mneme.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemeConfig {
    pub memory: MemoryConfig,
    pub scoring: ScoringConfig,
    pub sweep: SweepConfig,
    pub retrieval: RetrievalConfig,
    pub logging: LoggingConfig,
}

// ── Memory store ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// When false, completed tasks are not recorded. Existing memories can
    /// still be recalled and swept.
    pub enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("memory.db"),
            enabled: true,
        }
    }
}

// ── Importance scoring ─────────────────────────────────────────

/// Rule table for the importance scorer. Values are clamped to 0.0–1.0 at use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Episodic task memory when the task failed. Failures are worth remembering.
    pub episodic_failure: f64,
    /// Episodic task memory when the task succeeded.
    pub episodic_success: f64,
    /// Semantic knowledge distilled from a review/summary.
    pub knowledge: f64,
    /// Semantic solution built from a suggestion list.
    pub solution: f64,
    /// Working-tier conversation memory.
    pub conversation: f64,
    /// Confidence stamped on every new memory. Fixed policy value.
    pub confidence: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            episodic_failure: 0.7,
            episodic_success: 0.4,
            knowledge: 0.9,
            solution: 0.8,
            conversation: 0.3,
            confidence: 1.0,
        }
    }
}

// ── Decay & consolidation sweep ────────────────────────────────

/// Largest accepted `sweep.min_age_hours` (ten years).
pub const MAX_MIN_AGE_HOURS: u64 = 87_600;

/// Largest accepted `sweep.retention_days` (a century, effectively "never prune").
pub const MAX_RETENTION_DAYS: u64 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweeps when running the periodic sweeper.
    pub interval_secs: u64,
    /// Only entries older than this are decayed.
    pub min_age_hours: u64,
    /// Multiplier applied to importance on each sweep (0.0 < factor < 1.0).
    pub decay_factor: f64,
    /// Entries whose decayed importance falls below this may be pruned.
    pub prune_floor: f64,
    /// Entries younger than this are never pruned.
    pub retention_days: u64,
    /// Entries accessed this many times or more are never pruned.
    pub low_use_threshold: u64,
    /// Entries fetched per batch. The store lock is released between batches.
    pub batch_size: usize,
    /// Promote frequently used episodic memories into new semantic memories.
    pub promote_episodic: bool,
    /// Importance an episodic memory must exceed to be promoted.
    pub promote_min_importance: f64,
    /// Access count an episodic memory must exceed to be promoted.
    pub promote_min_access: u64,
    /// Importance multiplier for the promoted semantic memory (capped at 1.0).
    pub promote_boost: f64,
    /// Merge low-importance duplicates into a single consolidated memory.
    pub merge_duplicates: bool,
    /// Only entries below this importance take part in merging.
    pub merge_max_importance: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            min_age_hours: 24,
            decay_factor: 0.8,
            prune_floor: 0.1,
            retention_days: 30,
            low_use_threshold: 5,
            batch_size: 256,
            promote_episodic: true,
            promote_min_importance: 0.6,
            promote_min_access: 3,
            promote_boost: 1.1,
            merge_duplicates: false,
            merge_max_importance: 0.3,
        }
    }
}

// ── Retrieval ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Result cap used when the caller passes 0.
    pub default_max_results: usize,
    /// Age at which the recency weight halves.
    pub recency_half_life_hours: f64,
    /// Lower bound of the recency weight, so old but important memories still surface.
    pub min_recency_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: 10,
            recency_half_life_hours: 168.0,
            min_recency_weight: 0.1,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

fn check_unit(warnings: &mut Vec<ConfigWarning>, field: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        warnings.push(ConfigWarning {
            field: field.into(),
            message: format!("{value} is outside 0.0–1.0"),
            severity: WarningSeverity::Error,
            hint: Some("Importance and confidence values are fractions between 0.0 and 1.0".into()),
        });
    }
}

impl MnemeConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Database path ───
        if self.memory.db_path.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "memory.db_path".into(),
                message: "database path is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'memory.db' or ':memory:'".into()),
            });
        }

        // ── Scoring table ───
        check_unit(&mut warnings, "scoring.episodic_failure", self.scoring.episodic_failure);
        check_unit(&mut warnings, "scoring.episodic_success", self.scoring.episodic_success);
        check_unit(&mut warnings, "scoring.knowledge", self.scoring.knowledge);
        check_unit(&mut warnings, "scoring.solution", self.scoring.solution);
        check_unit(&mut warnings, "scoring.conversation", self.scoring.conversation);
        check_unit(&mut warnings, "scoring.confidence", self.scoring.confidence);

        // ── Decay ───
        let decay = self.sweep.decay_factor;
        if !(decay > 0.0 && decay <= 1.0) {
            warnings.push(ConfigWarning {
                field: "sweep.decay_factor".into(),
                message: format!("decay factor {decay} must be in (0.0, 1.0]"),
                severity: WarningSeverity::Error,
                hint: Some("0.8 loses a fifth of the importance per sweep".into()),
            });
        } else if decay == 1.0 {
            warnings.push(ConfigWarning {
                field: "sweep.decay_factor".into(),
                message: "decay factor 1.0 disables decay".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }
        check_unit(&mut warnings, "sweep.prune_floor", self.sweep.prune_floor);
        check_unit(&mut warnings, "sweep.promote_min_importance", self.sweep.promote_min_importance);
        check_unit(&mut warnings, "sweep.merge_max_importance", self.sweep.merge_max_importance);

        if self.sweep.batch_size == 0 {
            warnings.push(ConfigWarning {
                field: "sweep.batch_size".into(),
                message: "batch size is 0; the sweeper would never make progress".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 256".into()),
            });
        }
        if self.sweep.min_age_hours > MAX_MIN_AGE_HOURS {
            warnings.push(ConfigWarning {
                field: "sweep.min_age_hours".into(),
                message: format!(
                    "{} hours exceeds the maximum of {MAX_MIN_AGE_HOURS}",
                    self.sweep.min_age_hours
                ),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 24".into()),
            });
        }
        if self.sweep.retention_days > MAX_RETENTION_DAYS {
            warnings.push(ConfigWarning {
                field: "sweep.retention_days".into(),
                message: format!(
                    "{} days exceeds the maximum of {MAX_RETENTION_DAYS}",
                    self.sweep.retention_days
                ),
                severity: WarningSeverity::Error,
                hint: Some(format!("Use {MAX_RETENTION_DAYS} to effectively never prune")),
            });
        }
        if self.sweep.interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "sweep.interval_secs".into(),
                message: "interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3600 (hourly)".into()),
            });
        } else if self.sweep.interval_secs < 60 {
            warnings.push(ConfigWarning {
                field: "sweep.interval_secs".into(),
                message: format!(
                    "sweeping every {}s decays importance very quickly",
                    self.sweep.interval_secs
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Each sweep multiplies importance by decay_factor".into()),
            });
        }
        if self.sweep.promote_boost < 1.0 {
            warnings.push(ConfigWarning {
                field: "sweep.promote_boost".into(),
                message: "promotion boost below 1.0 makes promoted memories less important".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Retrieval ───
        if self.retrieval.recency_half_life_hours <= 0.0 {
            warnings.push(ConfigWarning {
                field: "retrieval.recency_half_life_hours".into(),
                message: "half-life must be positive".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 168 (one week)".into()),
            });
        }
        check_unit(&mut warnings, "retrieval.min_recency_weight", self.retrieval.min_recency_weight);
        if self.retrieval.default_max_results == 0 {
            warnings.push(ConfigWarning {
                field: "retrieval.default_max_results".into(),
                message: "default result cap is 0".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Callers passing 0 will always get an empty list".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
