//! Observability - progress events and the sinks that carry them.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::capabilities::CapabilityResult;
use crate::error::ErrorKind;
use crate::state::{Task, TaskId};

/// A progress event, one JSON object with a `type` tag per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Thinking {
        iteration: usize,
    },
    AgentStart {
        agent_id: TaskId,
        description: String,
        capability: String,
    },
    AgentComplete {
        agent_id: TaskId,
        result: CapabilityResult,
    },
    AgentError {
        agent_id: TaskId,
        error: String,
        result: CapabilityResult,
    },
    ToolStart {
        id: String,
        name: String,
        args: serde_json::Value,
        iteration: usize,
    },
    ToolComplete {
        id: String,
        name: String,
        result: CapabilityResult,
        iteration: usize,
    },
    Token {
        content: String,
    },
    Phase {
        phase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Tasks {
        tasks: Vec<Task>,
    },
    Message {
        content: String,
    },
    Complete {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unresolved: Vec<TaskId>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
    Done,
}

impl ProgressEvent {
    pub fn phase(phase: impl Into<String>, detail: Option<String>) -> Self {
        Self::Phase {
            phase: phase.into(),
            detail,
        }
    }

    /// The `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::AgentStart { .. } => "agent_start",
            Self::AgentComplete { .. } => "agent_complete",
            Self::AgentError { .. } => "agent_error",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolComplete { .. } => "tool_complete",
            Self::Token { .. } => "token",
            Self::Phase { .. } => "phase",
            Self::Tasks { .. } => "tasks",
            Self::Message { .. } => "message",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    /// Newline-delimited JSON rendering (no trailing newline)
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"event serialization failed: {}"}}"#, e)
        })
    }

    /// Server-sent-events rendering
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_json_line())
    }
}

/// Ordered, append-only destination for progress events.
///
/// Sinks swallow their own delivery failures; a broken observer never
/// aborts a run.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Forwards events over an unbounded channel in emission order.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped");
        }
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Event `type` tags in emission order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind()).collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Discards everything.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: ProgressEvent) {}
}

/// Writes every event to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn emit(&self, event: ProgressEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

/// One line of the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

/// Appends timestamped events to a JSONL file.
pub struct JsonlSink {
    path: PathBuf,
    session_id: Option<String>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session_id: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: ProgressEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let entry = LoggedEvent {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            event,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open event log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl EventSink for JsonlSink {
    async fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.append(event).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write event");
        }
    }
}

/// Read the last `limit` events from a JSONL event log.
///
/// A missing file yields no events; malformed lines are skipped.
pub fn read_recent(path: &Path, limit: usize) -> Vec<LoggedEvent> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let reader = BufReader::new(file);
    let mut events: Vec<LoggedEvent> = reader
        .lines()
        .map_while(|line| line.ok())
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect();

    if events.len() > limit {
        events.drain(0..events.len() - limit);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(ProgressEvent::AgentStart {
            agent_id: 3,
            description: "list".into(),
            capability: "list_directory".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "agent_start");
        assert_eq!(value["agentId"], 3);

        assert_eq!(
            serde_json::to_value(ProgressEvent::Done).unwrap(),
            json!({"type": "done"})
        );
    }

    #[test]
    fn sse_rendering_is_data_framed() {
        let sse = ProgressEvent::Token { content: "hi".into() }.to_sse();
        assert_eq!(sse, "data: {\"type\":\"token\",\"content\":\"hi\"}\n\n");
    }

    #[tokio::test]
    async fn channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        for i in 0..5 {
            sink.emit(ProgressEvent::Thinking { iteration: i }).await;
        }
        drop(sink);
        let mut seen = Vec::new();
        while let Some(ProgressEvent::Thinking { iteration }) = rx.recv().await {
            seen.push(iteration);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn jsonl_sink_round_trips_through_read_recent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/events.jsonl");
        let sink = JsonlSink::new(&path).with_session("s-1");

        sink.emit(ProgressEvent::phase("decompose", None)).await;
        sink.emit(ProgressEvent::Message { content: "ok".into() }).await;
        sink.emit(ProgressEvent::Done).await;

        let recent = read_recent(&path, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event, ProgressEvent::Message { content: "ok".into() });
        assert_eq!(recent[1].session_id.as_deref(), Some("s-1"));
        assert!(read_recent(&dir.path().join("missing.jsonl"), 10).is_empty());
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new(vec![a.clone() as Arc<dyn EventSink>, b.clone()]);
        tokio_test::block_on(fanout.emit(ProgressEvent::Done));
        assert_eq!(a.kinds(), vec!["done"]);
        assert_eq!(b.kinds(), vec!["done"]);
    }
}
