//! Kernel - dispatching capability calls, the single-agent loop and the
//! swarm scheduler.

mod agent_loop;
mod dispatcher;
pub mod prompts;
mod scheduler;

pub use agent_loop::{AgentLoop, LoopState, TurnOutcome, DEFAULT_MAX_ITERATIONS};
pub use dispatcher::Dispatcher;
pub use scheduler::{ExecutionReport, Scheduler, SwarmOutcome};
