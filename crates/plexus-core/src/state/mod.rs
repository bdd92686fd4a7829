//! State - task graph, results and conversation threads.

mod conversation;
mod graph;
mod task;

pub use conversation::{CapabilityInvocation, Conversation, ConversationMessage, Role};
pub use graph::TaskGraph;
pub use task::{AgentRecord, AgentStatus, AgentTable, Task, TaskId, TaskResult};
