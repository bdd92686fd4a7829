//! Task model - a single node of a decomposed request.

use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capabilities::CapabilityResult;

pub type TaskId = u64;

/// A single subtask produced by decomposition. Immutable once the graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within a graph
    pub id: TaskId,

    /// Human-readable summary
    #[serde(default)]
    pub description: String,

    /// Capability to invoke
    #[serde(alias = "tool")]
    pub capability: String,

    /// Capability arguments
    #[serde(default, alias = "arguments", alias = "parameters")]
    pub args: Map<String, Value>,

    /// Tasks that must have a recorded result first
    #[serde(default, alias = "depends_on", alias = "dependencies")]
    pub depends_on: BTreeSet<TaskId>,
}

impl Task {
    pub fn new(id: TaskId, capability: impl Into<String>) -> Self {
        Self {
            id,
            description: String::new(),
            capability: capability.into(),
            args: Map::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, id: TaskId) -> Self {
        self.depends_on.insert(id);
        self
    }

    /// Check if this task can run given the set of completed ids
    pub fn is_ready(&self, completed: &BTreeSet<TaskId>) -> bool {
        self.depends_on.is_subset(completed)
    }
}

/// Outcome of dispatching one task. Written exactly once by the worker that ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl TaskResult {
    /// Fold a dispatcher outcome into the task's single result record
    pub fn from_capability(task_id: TaskId, result: &CapabilityResult) -> Self {
        Self {
            task_id,
            succeeded: result.succeeded,
            value: result
                .succeeded
                .then(|| Value::Object(result.payload.clone())),
            error: result.error.clone(),
            elapsed_ms: result.elapsed_ms,
        }
    }
}

/// In-flight agent, kept only for progress reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: TaskId,
    pub description: String,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Done,
}

/// In-flight agents of one scheduler run.
#[derive(Debug, Default)]
pub struct AgentTable {
    records: Mutex<Vec<AgentRecord>>,
}

impl AgentTable {
    pub fn start(&self, id: TaskId, description: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(AgentRecord {
                id,
                description: description.to_string(),
                status: AgentStatus::Running,
            });
        }
    }

    /// Mark an agent done and drop it from the table
    pub fn finish(&self, id: TaskId) -> Option<AgentRecord> {
        let mut records = self.records.lock().ok()?;
        let position = records.iter().position(|a| a.id == id)?;
        let mut record = records.remove(position);
        record.status = AgentStatus::Done;
        Some(record)
    }

    pub fn snapshot(&self) -> Vec<AgentRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}
