//! Task graph - validated dependency graph of a decomposed request.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::task::{Task, TaskId};
use crate::error::KernelError;

/// The decomposed work graph - all tasks keyed by id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskGraph {
    /// Build a graph, rejecting duplicate ids, self-references and
    /// references to ids outside the graph. Cycles are allowed here and
    /// surface as unresolved tasks at execution time.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, KernelError> {
        if tasks.is_empty() {
            return Err(KernelError::Decomposition("task graph is empty".into()));
        }

        let mut graph = Self::default();
        for task in tasks {
            if graph.tasks.contains_key(&task.id) {
                return Err(KernelError::Decomposition(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
            if task.depends_on.contains(&task.id) {
                return Err(KernelError::Decomposition(format!(
                    "task {} depends on itself",
                    task.id
                )));
            }
            graph.tasks.insert(task.id, task);
        }

        for task in graph.tasks.values() {
            if let Some(missing) = task.depends_on.iter().find(|d| !graph.tasks.contains_key(d)) {
                return Err(KernelError::Decomposition(format!(
                    "task {} depends on unknown task {}",
                    task.id, missing
                )));
            }
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get a task by ID
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All tasks in id order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> BTreeSet<TaskId> {
        self.tasks.keys().copied().collect()
    }

    /// Pending tasks whose dependencies are all completed (the next wavefront)
    pub fn ready<'a>(
        &'a self,
        pending: &BTreeSet<TaskId>,
        completed: &BTreeSet<TaskId>,
    ) -> Vec<&'a Task> {
        pending
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.is_ready(completed))
            .collect()
    }
}
