#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use plexus_core::capabilities::{Args, Capability, CapabilityRegistry, CapabilitySchema, ParamType};
use plexus_core::model::{ChatRequest, ChatResponse, ModelClient, TokenStream, ToolCallRequest};
use plexus_core::observability::MemorySink;
use plexus_core::{CapabilityError, KernelConfig, ModelError, Session};

type Responder = dyn Fn(&ChatRequest) -> Result<ChatResponse, ModelError> + Send + Sync;

/// Model mock that answers from a script, then from a fallback responder.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatResponse, ModelError>>>,
    fallback: Box<Responder>,
    fragments: Option<Vec<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ChatResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Box::new(|_| Ok(ChatResponse::text("done"))),
            fragments: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(replies: Vec<ChatResponse>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    pub fn responding<F>(f: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<ChatResponse, ModelError> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Box::new(f),
            fragments: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer streamed requests with these fragments, in order
    pub fn with_stream(mut self, fragments: &[&str]) -> Self {
        self.fragments = Some(fragments.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => (self.fallback)(&request),
        }
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream, ModelError> {
        let Some(fragments) = self.fragments.clone() else {
            let content = self.chat(request).await?.content;
            return Ok(Box::pin(futures::stream::once(async move { Ok(content) })));
        };
        self.requests.lock().unwrap().push(request);
        Ok(Box::pin(futures::stream::iter(fragments.into_iter().map(Ok))))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Start and end instants of one `delay` invocation.
#[derive(Debug, Clone)]
pub struct DelaySpan {
    pub label: String,
    pub start: Instant,
    pub end: Instant,
}

/// Sleeps for `ms` milliseconds and records when it ran.
pub struct DelayCapability {
    schema: CapabilitySchema,
    spans: Arc<Mutex<Vec<DelaySpan>>>,
}

impl DelayCapability {
    pub fn new() -> (Self, Arc<Mutex<Vec<DelaySpan>>>) {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let capability = Self {
            schema: CapabilitySchema::new("delay", "Sleep, then report")
                .param("label", ParamType::String, "Span label", true)
                .param("ms", ParamType::Integer, "Milliseconds to sleep", true)
                .param("fail", ParamType::Boolean, "Fail after sleeping", false),
            spans: spans.clone(),
        };
        (capability, spans)
    }
}

#[async_trait]
impl Capability for DelayCapability {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let label = args["label"].as_str().unwrap_or_default().to_string();
        let ms = args["ms"].as_u64().unwrap_or(0);
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.spans.lock().unwrap().push(DelaySpan {
            label: label.clone(),
            start,
            end: Instant::now(),
        });

        if args.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(CapabilityError::Execution(format!("{} failed on purpose", label)));
        }
        match json!({"label": label, "sleptMs": ms}) {
            Value::Object(map) => Ok(map),
            _ => unreachable!(),
        }
    }
}

/// Built-in registry plus the `delay` capability
pub fn registry_with_delay() -> (CapabilityRegistry, Arc<Mutex<Vec<DelaySpan>>>) {
    let mut registry = CapabilityRegistry::builtin(&KernelConfig::default().capabilities);
    let (delay, spans) = DelayCapability::new();
    registry.register(Arc::new(delay));
    (registry, spans)
}

pub fn session(model: Arc<ScriptedModel>, registry: CapabilityRegistry) -> (Session, Arc<MemorySink>) {
    build_session(model, registry, false)
}

/// Session with the default config, token streaming on
pub fn streaming_session(
    model: Arc<ScriptedModel>,
    registry: CapabilityRegistry,
) -> (Session, Arc<MemorySink>) {
    build_session(model, registry, true)
}

fn build_session(
    model: Arc<ScriptedModel>,
    registry: CapabilityRegistry,
    stream: bool,
) -> (Session, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let mut config = KernelConfig::default();
    config.model.stream = stream;
    let session = Session::with_registry(config, registry, model, sink.clone()).unwrap();
    (session, sink)
}

/// JSON decomposition reply wrapping `tasks`
pub fn plan(tasks: Value) -> ChatResponse {
    ChatResponse::text(json!({"tasks": tasks}).to_string())
}
