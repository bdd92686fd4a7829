//! Prompt text for the agent loop, decomposition and synthesis requests.

use std::collections::{BTreeMap, BTreeSet};

use crate::capabilities::CapabilitySchema;
use crate::error::ErrorKind;
use crate::state::{TaskGraph, TaskId, TaskResult};

const AGENT_PROMPT: &str = "You are a local assistant with access to the capabilities listed below. \
Call capabilities when you need to inspect or change the local machine or fetch information, \
then answer the user directly. A failed capability result is information, not a reason to stop: \
read the error and adjust. Never attempt destructive operations on system paths.";

const DECOMPOSE_PROMPT: &str = "Break the user's request into the smallest set of capability calls \
that satisfies it. Reply with JSON only, no prose, in this shape:\n\
{\"tasks\": [{\"id\": 1, \"description\": \"...\", \"capability\": \"<name>\", \
\"args\": {...}, \"dependsOn\": []}]}\n\
Ids are positive integers unique within the plan. List a dependency only when a task truly \
needs another task's outcome first; independent tasks run in parallel. \
Use only the capabilities listed below.";

const SYNTHESIZE_PROMPT: &str = "Summarize for the user what was done to satisfy their request, \
based on the operation results below. Mention each operation, say plainly which ones failed and why, \
and keep it short.";

/// Nudge appended when the loop hits its iteration cap
pub const FINAL_ANSWER_NUDGE: &str = "Tool access is no longer available. Using the results \
gathered so far, give your final answer to the user now.";

fn render_catalog(catalog: &[CapabilitySchema]) -> String {
    serde_json::to_string_pretty(catalog).unwrap_or_else(|_| "[]".to_string())
}

/// System prompt seeding a single-agent conversation
pub fn agent_system_prompt(catalog: &[CapabilitySchema]) -> String {
    format!("{}\n\nAvailable capabilities:\n{}", AGENT_PROMPT, render_catalog(catalog))
}

pub fn decomposition_prompt(catalog: &[CapabilitySchema]) -> String {
    format!("{}\n\nCapabilities:\n{}", DECOMPOSE_PROMPT, render_catalog(catalog))
}

pub fn synthesis_prompt() -> &'static str {
    SYNTHESIZE_PROMPT
}

/// User-side message listing every recorded outcome, then the tasks that
/// never ran
pub fn synthesis_input(
    request: &str,
    graph: &TaskGraph,
    results: &BTreeMap<TaskId, TaskResult>,
    unresolved: &BTreeSet<TaskId>,
) -> String {
    let label = |id: TaskId| {
        graph
            .get(id)
            .map(|t| (t.description.as_str(), t.capability.as_str()))
            .unwrap_or(("", ""))
    };

    let mut out = format!("Original request: {}\n\nOperation results:\n", request);
    for (id, result) in results {
        let (description, capability) = label(*id);
        out.push_str(&format!(
            "- task {} [{}] {}: {}\n",
            id,
            capability,
            description,
            serde_json::to_string(result).unwrap_or_default()
        ));
    }
    for id in unresolved {
        let (description, capability) = label(*id);
        let status = serde_json::json!({
            "taskId": id,
            "succeeded": false,
            "errorKind": ErrorKind::Unresolved,
            "error": "not run: its dependencies never completed",
        });
        out.push_str(&format!("- task {} [{}] {}: {}\n", id, capability, description, status));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityResult;
    use crate::error::CapabilityError;
    use crate::state::Task;

    #[test]
    fn synthesis_input_lists_failures_too() {
        let graph = TaskGraph::from_tasks(vec![
            Task::new(1, "read_file").with_description("read notes"),
            Task::new(2, "execute_command"),
        ])
        .unwrap();
        let mut results = BTreeMap::new();
        results.insert(
            1,
            TaskResult::from_capability(1, &CapabilityResult::success(Default::default(), 3)),
        );
        let blocked = CapabilityResult::failure(&CapabilityError::SafetyBlocked("mkfs".into()), 0);
        results.insert(2, TaskResult::from_capability(2, &blocked));

        let text = synthesis_input("tidy up", &graph, &results, &BTreeSet::new());
        assert!(text.contains("read notes"));
        assert!(text.contains("Blocked by safety policy"));
        assert!(!text.contains("unresolved"));
    }

    #[test]
    fn synthesis_input_marks_unresolved_tasks() {
        let graph = TaskGraph::from_tasks(vec![
            Task::new(1, "read_file").depends_on(2),
            Task::new(2, "write_file").with_description("save").depends_on(1),
        ])
        .unwrap();

        let text = synthesis_input("loop", &graph, &BTreeMap::new(), &BTreeSet::from([1, 2]));
        assert_eq!(text.matches("\"errorKind\":\"unresolved\"").count(), 2);
        assert!(text.contains("- task 2 [write_file] save"));
    }
}
