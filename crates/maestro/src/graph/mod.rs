pub mod engine;
pub mod types;

pub use engine::{GraphEngine, GraphError};
pub use types::{
    GraphConfig, GraphEvent, GraphNode, JudgeVerdict, PlannedCapability, PlannerDecision,
};
