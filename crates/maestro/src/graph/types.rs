use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Named nodes of the execution graph. `Entry` is the only initial state,
/// `Finalizer` the only successful terminal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    Entry,
    Planner,
    Builder,
    Ideator,
    Judge,
    Finalizer,
}

impl GraphNode {
    pub fn name(&self) -> &'static str {
        match self {
            GraphNode::Entry => "entry",
            GraphNode::Planner => "planner",
            GraphNode::Builder => "builder",
            GraphNode::Ideator => "ideator",
            GraphNode::Judge => "judge",
            GraphNode::Finalizer => "finalizer",
        }
    }

    /// Coarse completion percentage reported when the node begins.
    pub fn progress_percent(&self) -> u8 {
        match self {
            GraphNode::Entry => 5,
            GraphNode::Planner => 20,
            GraphNode::Builder => 45,
            GraphNode::Ideator => 45,
            GraphNode::Judge => 70,
            GraphNode::Finalizer => 90,
        }
    }
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for GraphNode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(GraphNode::Entry),
            "planner" => Ok(GraphNode::Planner),
            "builder" => Ok(GraphNode::Builder),
            "ideator" => Ok(GraphNode::Ideator),
            "judge" => Ok(GraphNode::Judge),
            "finalizer" => Ok(GraphNode::Finalizer),
            _ => Err(format!("Unknown graph node: {}", s)),
        }
    }
}

/// Structured planner output: which branch to take and which capabilities
/// the builder should invoke.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerDecision {
    pub route: String,
    #[serde(default)]
    pub plan_summary: String,
    #[serde(default)]
    pub capabilities: Vec<PlannedCapability>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedCapability {
    pub capability: String,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

/// Structured judge output.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    pub feedback: Option<String>,
    pub improvements: Option<Vec<String>>,
}

/// Lifecycle events mirrored onto the engine's broadcast channel.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    #[serde(rename_all = "camelCase")]
    SessionStarted { session_id: Uuid, task_id: String },
    #[serde(rename_all = "camelCase")]
    NodeStarted { session_id: Uuid, node: GraphNode },
    #[serde(rename_all = "camelCase")]
    NodeFinished {
        session_id: Uuid,
        node: GraphNode,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    SessionFinished { session_id: Uuid, status: String },
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Judge scores at or above this accept the work product.
    pub acceptance_threshold: f64,
    /// Completion budget passed to every model call.
    pub max_output_tokens: Option<u32>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.8,
            max_output_tokens: Some(4096),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_names_round_trip() {
        for node in [
            GraphNode::Entry,
            GraphNode::Planner,
            GraphNode::Builder,
            GraphNode::Ideator,
            GraphNode::Judge,
            GraphNode::Finalizer,
        ] {
            let parsed: GraphNode = node.name().parse().expect("parse");
            assert_eq!(parsed, node);
        }
    }

    #[test]
    fn planned_capability_defaults_to_empty_object_params() {
        let decision: PlannerDecision = serde_json::from_str(
            r#"{"route": "builder", "capabilities": [{"capability": "clock/now"}]}"#,
        )
        .expect("parse");
        assert_eq!(decision.capabilities.len(), 1);
        assert!(decision.capabilities[0].params.is_object());
        assert_eq!(decision.plan_summary, "");
    }

    #[test]
    fn judge_verdict_tolerates_missing_optionals() {
        let verdict: JudgeVerdict = serde_json::from_str(r#"{"score": 0.92}"#).expect("parse");
        assert!(verdict.feedback.is_none());
        assert!(verdict.improvements.is_none());
    }
}
