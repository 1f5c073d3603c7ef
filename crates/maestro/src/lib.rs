//! # Maestro - Orchestration Engine
//!
//! Node-based execution graph that routes a task through planning, tool-use and
//! evaluation stages. Each stage selects a model through the deterministic router
//! and dispatches capabilities through the schema-validated tool broker.

pub mod broker;
pub mod builtin;
pub mod graph;
pub mod providers;
pub mod registry;
pub mod router;
pub mod schema;


pub use broker::{BrokerConfig, ToolBroker, ToolError, ToolInvocation};
pub use graph::{
    GraphConfig, GraphEngine, GraphError, GraphEvent, GraphNode, JudgeVerdict, PlannedCapability,
    PlannerDecision,
};
pub use providers::{
    AnthropicProvider, ChatMessage, CompletionRequest, CompletionResponse, ModelProviderTrait,
    OllamaProvider, OpenAIProvider, ProviderError, ProviderKind, TokenUsage,
};
pub use registry::{AdapterRegistry, CapabilityHandler, CapabilityRegistration, FnAdapter};
pub use router::{
    LatencyTolerance, ModelChoice, ModelHandle, ModelRole, ModelRouter, RouteConstraints,
    RouteError, RouterCacheStats, RouterConfig,
};
pub use schema::FieldIssue;

use std::sync::Arc;

use db::DBService;
use services::services::{
    agent_end_task::AgentEndTaskService, credentials::CredentialStore,
    notifications::NotificationService,
};

/// Core configuration for the engine and its sub-components.
#[derive(Debug, Clone, Default)]
pub struct MaestroConfig {
    pub graph: GraphConfig,
    pub broker: BrokerConfig,
    pub router: RouterConfig,
}

/// Main error types for maestro operations
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, MaestroError>;

/// Initialize the engine: build the adapter registry with the built-in
/// capabilities, construct providers from the credential store, and wire the
/// graph engine to its persistence and notification collaborators.
pub async fn initialize_maestro(
    config: MaestroConfig,
    db: DBService,
    credentials: &dyn CredentialStore,
    notifications: NotificationService,
    end_tasks: AgentEndTaskService,
) -> Result<GraphEngine> {
    tracing::info!("Initializing maestro execution engine...");

    let registry = Arc::new(AdapterRegistry::new());
    builtin::register_builtin_adapters(&registry).await?;

    let broker = Arc::new(ToolBroker::new(registry.clone(), config.broker));
    let router = Arc::new(ModelRouter::from_credentials(config.router, credentials).await);

    let engine = GraphEngine::new(
        config.graph,
        db,
        router,
        broker,
        notifications,
        end_tasks,
    );

    tracing::info!(
        "Maestro engine ready with {} registered capabilities",
        registry.len().await
    );
    Ok(engine)
}
