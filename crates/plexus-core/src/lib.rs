//! Plexus Core - agent execution kernel
//!
//! This crate provides a capability registry guarded by a safety gate,
//! a dispatcher that turns every capability call into a structured
//! result, a bounded single-agent tool-calling loop, and a swarm
//! scheduler that runs decomposed task graphs in concurrent wavefronts.
//! Progress is reported as typed events through an [`EventSink`].

pub mod capabilities;
pub mod config;
pub mod error;
pub mod kernel;
pub mod model;
pub mod observability;
pub mod session;
pub mod state;

pub use capabilities::{Capability, CapabilityRegistry, CapabilityResult, CapabilitySchema};
pub use config::KernelConfig;
pub use error::{CapabilityError, ErrorKind, KernelError, ModelError};
pub use kernel::{AgentLoop, Dispatcher, Scheduler};
pub use model::{ModelClient, OpenAiCompatClient};
pub use observability::{EventSink, ProgressEvent};
pub use session::Session;
pub use state::{Conversation, Task, TaskGraph, TaskResult};
