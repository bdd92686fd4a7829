//! Single-agent loop - alternates model reasoning with capability calls
//! until the model answers or the iteration cap forces a final answer.

use std::sync::Arc;

use futures::StreamExt;

use super::dispatcher::Dispatcher;
use super::prompts;
use crate::config::ModelSettings;
use crate::error::{ErrorKind, KernelError, ModelError, Result};
use crate::model::{ChatRequest, ChatResponse, ModelClient};
use crate::observability::{EventSink, ProgressEvent};
use crate::state::{CapabilityInvocation, Conversation, ConversationMessage};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Loop states. `ToolDispatch` may repeat up to the iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Thinking,
    ToolDispatch,
    Streaming,
    Complete,
}

/// Outcome of one user turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub content: String,
    /// Completed Thinking -> ToolDispatch transitions
    pub iterations: usize,
    pub tool_calls: usize,
    /// True when the answer was forced by the iteration cap
    pub reached_limit: bool,
}

pub struct AgentLoop {
    dispatcher: Dispatcher,
    model: Arc<dyn ModelClient>,
    sink: Arc<dyn EventSink>,
    max_iterations: usize,
    model_name: String,
    stream: bool,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl AgentLoop {
    pub fn new(dispatcher: Dispatcher, model: Arc<dyn ModelClient>, sink: Arc<dyn EventSink>) -> Self {
        let model_name = model.model_name().to_string();
        Self {
            dispatcher,
            model,
            sink,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            model_name,
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_settings(mut self, settings: &ModelSettings) -> Self {
        self.model_name = settings.model.clone();
        self.stream = settings.stream;
        self.temperature = settings.temperature;
        self.max_tokens = settings.max_tokens;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn request(&self, conversation: &Conversation) -> ChatRequest {
        ChatRequest::new(&self.model_name, conversation.messages().to_vec())
            .with_sampling(self.temperature, self.max_tokens)
    }

    /// Run one user turn over `conversation`, appending every message it
    /// produces. Model failures end the turn with `error` + `done`.
    #[tracing::instrument(skip_all, fields(max_iterations = self.max_iterations))]
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        user_message: &str,
    ) -> Result<TurnOutcome> {
        let catalog = self.dispatcher.registry().catalog();
        if !conversation.has_system_prompt() {
            conversation.push(ConversationMessage::system(prompts::agent_system_prompt(&catalog)));
        }
        conversation.push(ConversationMessage::user(user_message));

        let mut iterations = 0;
        let mut tool_calls = 0;
        let mut state = LoopState::Thinking;

        loop {
            tracing::debug!(?state, iteration = iterations, "Requesting model response");
            self.sink.emit(ProgressEvent::Thinking { iteration: iterations }).await;

            let request = self.request(conversation).with_tools(catalog.clone());
            let response = match self.model.chat(request).await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e).await),
            };

            if !response.wants_tools() {
                state = LoopState::Streaming;
                tracing::debug!(?state, "Model answered without tools");
                self.sink
                    .emit(ProgressEvent::Token {
                        content: response.content.clone(),
                    })
                    .await;
                return Ok(self
                    .finish(conversation, response.content, iterations, tool_calls, false)
                    .await);
            }

            state = LoopState::ToolDispatch;
            tracing::debug!(?state, calls = response.tool_calls.len(), iteration = iterations, "Dispatching tool calls");
            tool_calls += response.tool_calls.len();
            self.dispatch_calls(conversation, response, iterations).await;
            iterations += 1;

            if iterations >= self.max_iterations {
                tracing::info!(iterations, "Iteration cap reached, forcing final answer");
                break;
            }
            state = LoopState::Thinking;
        }

        state = LoopState::Streaming;
        tracing::debug!(?state, "Requesting final answer without tools");
        let content = match self.final_answer(conversation).await {
            Ok(content) => content,
            Err(e) => return Err(self.fail(e).await),
        };
        Ok(self
            .finish(conversation, content, iterations, tool_calls, true)
            .await)
    }

    /// Execute each requested call in order and append the exchange
    async fn dispatch_calls(
        &self,
        conversation: &mut Conversation,
        response: ChatResponse,
        iteration: usize,
    ) {
        let mut invocations = Vec::with_capacity(response.tool_calls.len());

        for call in response.tool_calls {
            self.sink
                .emit(ProgressEvent::ToolStart {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                    iteration,
                })
                .await;

            let result = self.dispatcher.invoke(&call.name, &call.arguments).await;
            tracing::info!(
                capability = %call.name,
                iteration,
                success = result.succeeded,
                elapsed_ms = result.elapsed_ms,
                "Tool call finished"
            );

            self.sink
                .emit(ProgressEvent::ToolComplete {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                    iteration,
                })
                .await;

            invocations.push(CapabilityInvocation {
                id: call.id,
                name: call.name,
                args: call.arguments,
                result,
            });
        }

        let outcomes: Vec<ConversationMessage> = invocations
            .iter()
            .map(|inv| ConversationMessage::tool(&inv.id, inv.result.to_envelope().to_string()))
            .collect();
        conversation.push(ConversationMessage::assistant_with_invocations(
            response.content,
            invocations,
        ));
        for outcome in outcomes {
            conversation.push(outcome);
        }
    }

    /// Final synthesis with tool access withdrawn
    async fn final_answer(&self, conversation: &Conversation) -> std::result::Result<String, ModelError> {
        let mut messages = conversation.messages().to_vec();
        messages.push(ConversationMessage::system(prompts::FINAL_ANSWER_NUDGE));
        let request = ChatRequest::new(&self.model_name, messages)
            .with_sampling(self.temperature, self.max_tokens)
            .streaming(self.stream);

        let content = if self.stream {
            let mut tokens = self.model.stream_chat(request).await?;
            let mut content = String::new();
            while let Some(fragment) = tokens.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                content.push_str(&fragment);
                self.sink
                    .emit(ProgressEvent::Token { content: fragment })
                    .await;
            }
            content
        } else {
            let content = self.model.chat(request).await?.content;
            if !content.is_empty() {
                self.sink
                    .emit(ProgressEvent::Token {
                        content: content.clone(),
                    })
                    .await;
            }
            content
        };

        if content.trim().is_empty() {
            let fallback = format!(
                "Reached the maximum of {} tool iterations without a final answer.",
                self.max_iterations
            );
            self.sink
                .emit(ProgressEvent::Token {
                    content: fallback.clone(),
                })
                .await;
            return Ok(fallback);
        }
        Ok(content)
    }

    async fn finish(
        &self,
        conversation: &mut Conversation,
        content: String,
        iterations: usize,
        tool_calls: usize,
        reached_limit: bool,
    ) -> TurnOutcome {
        conversation.push(ConversationMessage::assistant(content.clone()));
        self.sink
            .emit(ProgressEvent::Message {
                content: content.clone(),
            })
            .await;
        self.sink
            .emit(ProgressEvent::Complete {
                content: content.clone(),
                unresolved: Vec::new(),
            })
            .await;
        self.sink.emit(ProgressEvent::Done).await;

        tracing::debug!(state = ?LoopState::Complete, iterations, tool_calls, "Turn complete");
        TurnOutcome {
            content,
            iterations,
            tool_calls,
            reached_limit,
        }
    }

    async fn fail(&self, e: ModelError) -> KernelError {
        tracing::warn!(error = %e, "Model request failed, ending turn");
        self.sink
            .emit(ProgressEvent::Error {
                message: e.to_string(),
                kind: Some(ErrorKind::Transient),
            })
            .await;
        self.sink.emit(ProgressEvent::Done).await;
        KernelError::Model(e)
    }
}
