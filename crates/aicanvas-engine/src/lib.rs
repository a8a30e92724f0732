pub mod chat;
pub mod conversation;
pub mod graph;
pub mod orchestrator;
pub mod session;

pub use chat::NodeChat;
pub use conversation::{ConversationStore, SharedConversations};
pub use graph::{
    break_cycles, compute_execution_order, detect_cycles, make_acyclic, Cycle, ExecutionPlan,
    GraphSnapshot, GraphStore,
};
pub use orchestrator::{ExecuteOptions, ExecutionOrchestrator, ExecutionReport};
pub use session::{ExecutionSession, SessionSlot};
