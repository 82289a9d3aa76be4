//! Task boundary types.
//!
//! The task executor lives outside this workspace. After running a task it hands
//! a [`TaskDescriptor`] and a [`TaskOutcome`] to the memory classifier.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::AgentId;

/// What the agent was asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Optional executor-assigned id, carried into the episodic context.
    #[serde(default)]
    pub task_id: Option<String>,
    /// The agent that ran the task; becomes the memory owner.
    pub agent_id: AgentId,
    /// Task type, e.g. "code_review" or "research".
    pub task_type: String,
    /// Free-text description of the request.
    pub description: String,
    /// Task parameters as supplied by the caller.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// How the task ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub succeeded: bool,
    /// Structured result payload. May carry a `summary`/`review` field and a
    /// `suggestions` list.
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Wall-clock execution time in seconds.
    #[serde(default)]
    pub execution_time_secs: f64,
}

impl TaskDescriptor {
    pub fn new(
        agent_id: impl Into<AgentId>,
        task_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            task_id: None,
            agent_id: agent_id.into(),
            task_type: task_type.into(),
            description: description.into(),
            parameters: Map::new(),
        }
    }

    /// Add a parameter (builder style).
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

impl TaskOutcome {
    pub fn success(result: Option<Value>, execution_time_secs: f64) -> Self {
        Self {
            succeeded: true,
            result,
            error_message: None,
            execution_time_secs,
        }
    }

    pub fn failure(error_message: impl Into<String>, execution_time_secs: f64) -> Self {
        Self {
            succeeded: false,
            result: None,
            error_message: Some(error_message.into()),
            execution_time_secs,
        }
    }
}
