use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MnemeError;

/// Unique identifier for a memory entry.
pub type MemoryId = Uuid;

/// Identifier of the agent personality that owns a memory.
pub type AgentId = String;

/// Retention class of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Ephemeral, conversation-scoped.
    Working,
    /// Event history: what happened during a task.
    Episodic,
    /// Distilled knowledge and reusable solutions.
    Semantic,
}

/// What the content of a memory represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Conversation,
    Task,
    Knowledge,
    Solution,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Working, Tier::Episodic, Tier::Semantic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::Episodic => "episodic",
            Tier::Semantic => "semantic",
        }
    }
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Conversation,
        Category::Task,
        Category::Knowledge,
        Category::Solution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Conversation => "conversation",
            Category::Task => "task",
            Category::Knowledge => "knowledge",
            Category::Solution => "solution",
        }
    }

    /// The tier a memory of this category is created in.
    pub fn default_tier(&self) -> Tier {
        match self {
            Category::Conversation => Tier::Working,
            Category::Task => Tier::Episodic,
            Category::Knowledge | Category::Solution => Tier::Semantic,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "working" => Ok(Tier::Working),
            "episodic" => Ok(Tier::Episodic),
            "semantic" => Ok(Tier::Semantic),
            other => Err(MnemeError::invalid("tier", format!("unknown tier '{other}'"))),
        }
    }
}

impl FromStr for Category {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conversation" => Ok(Category::Conversation),
            "task" => Ok(Category::Task),
            "knowledge" => Ok(Category::Knowledge),
            "solution" => Ok(Category::Solution),
            other => Err(MnemeError::invalid(
                "category",
                format!("unknown category '{other}'"),
            )),
        }
    }
}
