//! Scheduler - decomposes a request into a task graph and runs it in
//! dependency-ordered wavefronts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::dispatcher::Dispatcher;
use super::prompts;
use crate::config::ModelSettings;
use crate::error::{ErrorKind, KernelError, Result};
use crate::model::{extract_json, ChatRequest, ModelClient};
use crate::observability::{EventSink, ProgressEvent};
use crate::state::{AgentRecord, AgentTable, ConversationMessage, Task, TaskGraph, TaskId, TaskResult};

/// Everything recorded while executing a graph.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// One entry per dispatched task
    pub results: BTreeMap<TaskId, TaskResult>,
    /// Tasks that never became ready (cycles or dependents of cycles)
    pub unresolved: BTreeSet<TaskId>,
    pub wavefronts: usize,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Deterministic summary used when synthesis is unavailable
    pub fn template_summary(&self) -> String {
        let mut summary = format!(
            "Executed {} operations ({} succeeded, {} failed).",
            self.results.len(),
            self.succeeded(),
            self.failed()
        );
        if !self.unresolved.is_empty() {
            summary.push_str(&format!(
                " {} tasks could not run because their dependencies never completed.",
                self.unresolved.len()
            ));
        }
        summary
    }
}

/// Final output of a swarm run.
#[derive(Debug, Clone)]
pub struct SwarmOutcome {
    pub content: String,
    pub report: ExecutionReport,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Plan {
    Wrapped { tasks: Vec<Task> },
    Bare(Vec<Task>),
}

/// Swarm scheduler. Decomposition, each wavefront and synthesis run in
/// sequence; tasks inside a wavefront run concurrently with no cap.
pub struct Scheduler {
    dispatcher: Dispatcher,
    model: Arc<dyn ModelClient>,
    sink: Arc<dyn EventSink>,
    model_name: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    agents: AgentTable,
}

impl Scheduler {
    pub fn new(dispatcher: Dispatcher, model: Arc<dyn ModelClient>, sink: Arc<dyn EventSink>) -> Self {
        let model_name = model.model_name().to_string();
        Self {
            dispatcher,
            model,
            sink,
            model_name,
            temperature: None,
            max_tokens: None,
            agents: AgentTable::default(),
        }
    }

    pub fn with_settings(mut self, settings: &ModelSettings) -> Self {
        self.model_name = settings.model.clone();
        self.temperature = settings.temperature;
        self.max_tokens = settings.max_tokens;
        self
    }

    /// Agents currently in flight
    pub fn active_agents(&self) -> Vec<AgentRecord> {
        self.agents.snapshot()
    }

    /// Decompose, execute and synthesize. Ends the event stream with
    /// `complete` + `done`, or `error` + `done` if decomposition fails.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, request: &str) -> Result<SwarmOutcome> {
        let graph = match self.decompose(request).await {
            Ok(graph) => graph,
            Err(e) => {
                self.report_failure(&e).await;
                return Err(e);
            }
        };
        Ok(self.run_graph(request, &graph).await)
    }

    /// Ask the model for a task graph. Emits `phase` and `tasks` but no
    /// terminal events; falling back to another mode is the caller's call.
    pub async fn decompose(&self, request: &str) -> Result<TaskGraph> {
        self.sink
            .emit(ProgressEvent::phase("decompose", None))
            .await;

        let catalog = self.dispatcher.registry().catalog();
        let messages = vec![
            ConversationMessage::system(prompts::decomposition_prompt(&catalog)),
            ConversationMessage::user(request),
        ];
        let chat = ChatRequest::new(&self.model_name, messages)
            .with_sampling(self.temperature, self.max_tokens);
        let response = self.model.chat(chat).await?;

        let graph = parse_plan(&response.content)?;
        tracing::info!(tasks = graph.len(), "Request decomposed");
        self.sink
            .emit(ProgressEvent::Tasks {
                tasks: graph.tasks().cloned().collect(),
            })
            .await;
        Ok(graph)
    }

    /// Execute, synthesize and emit the terminal events for a graph
    pub async fn run_graph(&self, request: &str, graph: &TaskGraph) -> SwarmOutcome {
        let report = self.execute(graph).await;
        let content = self.synthesize(request, graph, &report).await;

        self.sink
            .emit(ProgressEvent::Message {
                content: content.clone(),
            })
            .await;
        self.sink
            .emit(ProgressEvent::Complete {
                content: content.clone(),
                unresolved: report.unresolved.iter().copied().collect(),
            })
            .await;
        self.sink.emit(ProgressEvent::Done).await;

        SwarmOutcome { content, report }
    }

    /// Batched wavefront execution
    pub async fn execute(&self, graph: &TaskGraph) -> ExecutionReport {
        self.sink
            .emit(ProgressEvent::phase("execute", Some(format!("{} tasks", graph.len()))))
            .await;

        let mut pending = graph.ids();
        let mut completed = BTreeSet::new();
        let mut report = ExecutionReport::default();

        while !pending.is_empty() {
            let ready = graph.ready(&pending, &completed);
            if ready.is_empty() {
                break;
            }
            report.wavefronts += 1;
            tracing::debug!(
                wavefront = report.wavefronts,
                tasks = ?ready.iter().map(|t| t.id).collect::<Vec<_>>(),
                "Dispatching wavefront"
            );

            let outcomes = futures::future::join_all(ready.into_iter().map(|t| self.run_task(t))).await;
            for result in outcomes {
                // A failed task still counts as completed for its dependents
                pending.remove(&result.task_id);
                completed.insert(result.task_id);
                report.results.insert(result.task_id, result);
            }
        }

        if !pending.is_empty() {
            tracing::warn!(unresolved = ?pending, "Tasks never became ready");
        }
        report.unresolved = pending;
        report
    }

    async fn run_task(&self, task: &Task) -> TaskResult {
        self.agents.start(task.id, &task.description);
        self.sink
            .emit(ProgressEvent::AgentStart {
                agent_id: task.id,
                description: task.description.clone(),
                capability: task.capability.clone(),
            })
            .await;

        let result = self
            .dispatcher
            .invoke(&task.capability, &Value::Object(task.args.clone()))
            .await;
        tracing::info!(
            task_id = task.id,
            capability = %task.capability,
            success = result.succeeded,
            elapsed_ms = result.elapsed_ms,
            "Task finished"
        );

        let task_result = TaskResult::from_capability(task.id, &result);
        let event = if result.succeeded {
            ProgressEvent::AgentComplete {
                agent_id: task.id,
                result,
            }
        } else {
            ProgressEvent::AgentError {
                agent_id: task.id,
                error: result.error.clone().unwrap_or_default(),
                result,
            }
        };
        self.sink.emit(event).await;
        if let Some(record) = self.agents.finish(task.id) {
            tracing::debug!(agent_id = record.id, status = ?record.status, "Agent finished");
        }

        task_result
    }

    /// Summarize results with the model, falling back to a template
    pub async fn synthesize(&self, request: &str, graph: &TaskGraph, report: &ExecutionReport) -> String {
        self.sink
            .emit(ProgressEvent::phase("synthesize", None))
            .await;

        let messages = vec![
            ConversationMessage::system(prompts::synthesis_prompt()),
            ConversationMessage::user(prompts::synthesis_input(
                request,
                graph,
                &report.results,
                &report.unresolved,
            )),
        ];
        let chat = ChatRequest::new(&self.model_name, messages)
            .with_sampling(self.temperature, self.max_tokens);

        match self.model.chat(chat).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            Ok(_) => report.template_summary(),
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis failed, using template summary");
                report.template_summary()
            }
        }
    }

    /// Emit `error` + `done` for a run that cannot continue
    pub async fn report_failure(&self, error: &KernelError) {
        let kind = match error {
            KernelError::Model(_) => ErrorKind::Transient,
            _ => ErrorKind::Execution,
        };
        self.sink
            .emit(ProgressEvent::Error {
                message: error.to_string(),
                kind: Some(kind),
            })
            .await;
        self.sink.emit(ProgressEvent::Done).await;
    }
}

/// Parse a decomposition reply into a validated graph
fn parse_plan(content: &str) -> Result<TaskGraph> {
    let value = extract_json(content)
        .ok_or_else(|| KernelError::Decomposition("model reply contained no JSON plan".into()))?;
    let plan: Plan = serde_json::from_value(value)
        .map_err(|e| KernelError::Decomposition(format!("malformed plan: {}", e)))?;
    let tasks = match plan {
        Plan::Wrapped { tasks } | Plan::Bare(tasks) => tasks,
    };
    TaskGraph::from_tasks(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_and_bare_plans() {
        let wrapped = r#"```json
{"tasks": [{"id": 1, "capability": "list_directory", "args": {"path": "/tmp"}},
           {"id": 2, "capability": "read_file", "args": {"path": "/tmp/a"}, "dependsOn": [1]}]}
```"#;
        let graph = parse_plan(wrapped).unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.get(2).unwrap().depends_on.contains(&1));

        let bare = r#"[{"id": 7, "tool": "web_search", "arguments": {"query": "rust"}}]"#;
        assert_eq!(parse_plan(bare).unwrap().get(7).unwrap().capability, "web_search");
    }

    #[test]
    fn empty_or_prose_plans_are_decomposition_errors() {
        assert!(matches!(parse_plan("I can't"), Err(KernelError::Decomposition(_))));
        assert!(matches!(parse_plan(r#"{"tasks": []}"#), Err(KernelError::Decomposition(_))));
    }

    #[test]
    fn template_summary_counts_outcomes() {
        let mut report = ExecutionReport::default();
        report.results.insert(
            1,
            TaskResult {
                task_id: 1,
                succeeded: true,
                value: None,
                error: None,
                elapsed_ms: 1,
            },
        );
        report.results.insert(
            2,
            TaskResult {
                task_id: 2,
                succeeded: false,
                value: None,
                error: Some("boom".into()),
                elapsed_ms: 1,
            },
        );
        report.unresolved.insert(3);
        let summary = report.template_summary();
        assert!(summary.starts_with("Executed 2 operations (1 succeeded, 1 failed)."));
        assert!(summary.contains("1 tasks could not run"));
    }
}
