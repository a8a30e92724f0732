//! Workflow graph model and analysis.
//!
//! A workflow is a directed graph of model-call nodes. `GraphStore` owns
//! nodes and edges in insertion order; the analysis passes read it:
//! cycle detection (three-color DFS), scheduling (Kahn's algorithm with an
//! insertion-rank tie-break), and cycle breaking (deterministic edge removal).

pub mod breaker;
pub mod cycles;
pub mod schedule;
pub mod store;

pub use breaker::{break_cycles, make_acyclic};
pub use cycles::{detect_cycles, Cycle};
pub use schedule::{compute_execution_order, ExecutionPlan};
pub use store::{GraphSnapshot, GraphStore};
