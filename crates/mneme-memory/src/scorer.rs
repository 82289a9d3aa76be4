//! Rule-based importance scoring.
//!
//! | condition                      | default |
//! |--------------------------------|---------|
//! | episodic task, failed          | 0.7     |
//! | episodic task, succeeded       | 0.4     |
//! | semantic knowledge             | 0.9     |
//! | semantic solution              | 0.8     |
//! | working-tier conversation      | 0.3     |
//!
//! Failed tasks outrank successful ones: they are the lessons worth recalling.

use mneme_config::ScoringConfig;
use mneme_core::Category;

use crate::entry::clamp_unit;

/// Deterministic importance scorer. No side effects, no randomness.
#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    config: ScoringConfig,
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ImportanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Importance for a new memory, always within 0.0-1.0.
    ///
    /// A Knowledge or Solution score requires the matching signal; without it
    /// the entry is scored like the episodic record of the same outcome.
    pub fn score(
        &self,
        category: Category,
        task_succeeded: bool,
        has_knowledge_signal: bool,
        has_solution_signal: bool,
    ) -> f64 {
        let raw = match category {
            Category::Knowledge if has_knowledge_signal => self.config.knowledge,
            Category::Solution if has_solution_signal => self.config.solution,
            Category::Conversation => self.config.conversation,
            Category::Task | Category::Knowledge | Category::Solution => {
                self.episodic(task_succeeded)
            }
        };
        clamp_unit(raw)
    }

    /// Confidence stamped on every new memory.
    pub fn confidence(&self) -> f64 {
        clamp_unit(self.config.confidence)
    }

    fn episodic(&self, task_succeeded: bool) -> f64 {
        if task_succeeded {
            self.config.episodic_success
        } else {
            self.config.episodic_failure
        }
    }
}
