//! Deterministic model routing. A fixed scoring table ranks candidate models
//! by quality for the task type, then cost, then latency; the same role,
//! constraints and provider availability always produce the same choice.
//! Instantiated provider clients are kept in an LRU cache keyed by
//! `provider:model`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use services::services::credentials::CredentialStore;
use thiserror::Error;
use ts_rs::TS;

use crate::providers::{
    AnthropicProvider, ChatMessage, CompletionRequest, CompletionResponse, ModelProviderTrait,
    OllamaProvider, OpenAIProvider, ProviderError, ProviderKind,
};

const QUALITY_WEIGHT: f64 = 0.80;
const COST_WEIGHT: f64 = 0.12;
const LATENCY_WEIGHT: f64 = 0.08;
const COST_CEILING_PER_1K: f64 = 0.03;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("No provider available for role {role} (task type {task_type})")]
    NoProviderAvailable { role: String, task_type: String },
    #[error("Provider {0} is not registered")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Planner,
    Builder,
    Judge,
    Ideator,
}

impl ModelRole {
    /// Sampling temperature per stage: planning and judging stay close to
    /// deterministic, ideation runs hot.
    pub fn temperature(&self) -> f32 {
        match self {
            ModelRole::Planner => 0.2,
            ModelRole::Builder => 0.3,
            ModelRole::Judge => 0.1,
            ModelRole::Ideator => 0.9,
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelRole::Planner => "planner",
            ModelRole::Builder => "builder",
            ModelRole::Judge => "judge",
            ModelRole::Ideator => "ideator",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ModelRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(ModelRole::Planner),
            "builder" => Ok(ModelRole::Builder),
            "judge" => Ok(ModelRole::Judge),
            "ideator" => Ok(ModelRole::Ideator),
            _ => Err(format!("Unknown model role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LatencyTolerance {
    /// Only fast models qualify.
    Strict,
    /// Fast and standard models qualify.
    Standard,
    /// Any model qualifies.
    Relaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatencyClass {
    Fast,
    Standard,
    Slow,
}

impl LatencyClass {
    fn fits(&self, tolerance: LatencyTolerance) -> bool {
        match tolerance {
            LatencyTolerance::Strict => *self == LatencyClass::Fast,
            LatencyTolerance::Standard => *self != LatencyClass::Slow,
            LatencyTolerance::Relaxed => true,
        }
    }

    fn score(&self) -> f64 {
        match self {
            LatencyClass::Fast => 1.0,
            LatencyClass::Standard => 0.6,
            LatencyClass::Slow => 0.3,
        }
    }
}

/// Soft constraints accompanying a routing request.
#[derive(Debug, Clone, Default)]
pub struct RouteConstraints {
    pub task_type: String,
    /// Approximate request payload size in bytes; filters models whose
    /// context window cannot hold it.
    pub payload_size: Option<usize>,
    pub latency_tolerance: Option<LatencyTolerance>,
    /// Maximum acceptable blended cost per 1k tokens, in USD.
    pub cost_budget: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
enum QualityDimension {
    Code,
    Analysis,
    Research,
    Creative,
    General,
}

fn dimension_for(role: ModelRole, task_type: &str) -> QualityDimension {
    match role {
        ModelRole::Judge => QualityDimension::Analysis,
        ModelRole::Ideator => QualityDimension::Creative,
        ModelRole::Planner | ModelRole::Builder => match task_type {
            "code_generation" | "coding" | "code" => QualityDimension::Code,
            "analysis" => QualityDimension::Analysis,
            "research" => QualityDimension::Research,
            "creative" => QualityDimension::Creative,
            _ => QualityDimension::General,
        },
    }
}

struct TaskQuality {
    code: f64,
    analysis: f64,
    research: f64,
    creative: f64,
    general: f64,
}

impl TaskQuality {
    fn score_for(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::Code => self.code,
            QualityDimension::Analysis => self.analysis,
            QualityDimension::Research => self.research,
            QualityDimension::Creative => self.creative,
            QualityDimension::General => self.general,
        }
    }
}

struct ModelCandidate {
    provider: ProviderKind,
    model: &'static str,
    cost_per_1k: f64,
    latency: LatencyClass,
    context_tokens: u32,
    quality: TaskQuality,
}

impl ModelCandidate {
    fn supports_payload(&self, payload_bytes: usize) -> bool {
        // rough 4-bytes-per-token estimate
        payload_bytes / 4 <= self.context_tokens as usize
    }

    fn weighted_score(&self, dimension: QualityDimension) -> f64 {
        let cost_score = 1.0 - (self.cost_per_1k / COST_CEILING_PER_1K).min(1.0);
        QUALITY_WEIGHT * self.quality.score_for(dimension)
            + COST_WEIGHT * cost_score
            + LATENCY_WEIGHT * self.latency.score()
    }
}

#[rustfmt::skip]
static CANDIDATES: &[ModelCandidate] = &[
    ModelCandidate {
        provider: ProviderKind::OpenAI, model: "gpt-4o",
        cost_per_1k: 0.0100, latency: LatencyClass::Standard, context_tokens: 128_000,
        quality: TaskQuality { code: 0.88, analysis: 0.90, research: 0.88, creative: 0.85, general: 0.90 },
    },
    ModelCandidate {
        provider: ProviderKind::OpenAI, model: "gpt-4o-mini",
        cost_per_1k: 0.0006, latency: LatencyClass::Fast, context_tokens: 128_000,
        quality: TaskQuality { code: 0.78, analysis: 0.80, research: 0.78, creative: 0.75, general: 0.82 },
    },
    ModelCandidate {
        provider: ProviderKind::Anthropic, model: "claude-sonnet-4-20250514",
        cost_per_1k: 0.0090, latency: LatencyClass::Standard, context_tokens: 200_000,
        quality: TaskQuality { code: 0.92, analysis: 0.91, research: 0.90, creative: 0.88, general: 0.90 },
    },
    ModelCandidate {
        provider: ProviderKind::Anthropic, model: "claude-3-5-haiku-20241022",
        cost_per_1k: 0.0020, latency: LatencyClass::Fast, context_tokens: 200_000,
        quality: TaskQuality { code: 0.80, analysis: 0.82, research: 0.80, creative: 0.78, general: 0.82 },
    },
    ModelCandidate {
        provider: ProviderKind::Ollama, model: "qwen2.5-coder:7b",
        cost_per_1k: 0.0, latency: LatencyClass::Standard, context_tokens: 32_768,
        quality: TaskQuality { code: 0.82, analysis: 0.70, research: 0.62, creative: 0.58, general: 0.68 },
    },
    ModelCandidate {
        provider: ProviderKind::Ollama, model: "deepseek-coder:6.7b",
        cost_per_1k: 0.0, latency: LatencyClass::Standard, context_tokens: 16_384,
        quality: TaskQuality { code: 0.80, analysis: 0.72, research: 0.60, creative: 0.55, general: 0.66 },
    },
    ModelCandidate {
        provider: ProviderKind::Ollama, model: "llama3.1:8b",
        cost_per_1k: 0.0, latency: LatencyClass::Fast, context_tokens: 32_768,
        quality: TaskQuality { code: 0.65, analysis: 0.72, research: 0.70, creative: 0.72, general: 0.75 },
    },
    ModelCandidate {
        provider: ProviderKind::Ollama, model: "qwen2.5:14b",
        cost_per_1k: 0.0, latency: LatencyClass::Slow, context_tokens: 32_768,
        quality: TaskQuality { code: 0.75, analysis: 0.78, research: 0.74, creative: 0.70, general: 0.78 },
    },
];

/// The routing decision: concrete provider, model and sampling temperature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ModelChoice {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
}

/// A routed model ready to take completions.
#[derive(Clone)]
pub struct ModelHandle {
    pub choice: ModelChoice,
    provider: Arc<dyn ModelProviderTrait>,
}

impl ModelHandle {
    /// `provider:model`, recorded on steps as the agent that ran the node.
    pub fn label(&self) -> String {
        format!("{}:{}", self.choice.provider, self.choice.model)
    }

    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        json_mode: bool,
        max_tokens: Option<u32>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.provider
            .complete(CompletionRequest {
                model: self.choice.model.clone(),
                messages,
                temperature: self.choice.temperature,
                max_tokens,
                json_mode,
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 32,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct RouterCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct ModelRouter {
    providers: HashMap<ProviderKind, Arc<dyn ModelProviderTrait>>,
    clients: Cache<String, Arc<dyn ModelProviderTrait>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ModelRouter {
    pub fn new(config: RouterConfig) -> Self {
        let clients = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            providers: HashMap::new(),
            clients,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build the standard provider set, fetching API keys through the
    /// credential store. A missing credential disables that provider rather
    /// than falling back to some hidden source.
    pub async fn from_credentials(config: RouterConfig, store: &dyn CredentialStore) -> Self {
        let mut router = Self::new(config);
        let openai_key = store.get_credential("openai", "api_key").await;
        router.register_provider(Arc::new(OpenAIProvider::new(openai_key)));
        let anthropic_key = store.get_credential("anthropic", "api_key").await;
        router.register_provider(Arc::new(AnthropicProvider::new(anthropic_key)));
        router.register_provider(Arc::new(OllamaProvider::new(None)));
        router
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ModelProviderTrait>) {
        tracing::debug!("Registered model provider {}", provider.name());
        self.providers.insert(provider.kind(), provider);
    }

    pub fn available_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self
            .providers
            .values()
            .filter(|p| p.is_configured())
            .map(|p| p.kind())
            .collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    /// Deterministic selection: filter the candidate table by provider
    /// availability and constraint fit, rank by weighted score, break ties
    /// by model name.
    pub fn select_model(
        &self,
        role: ModelRole,
        constraints: &RouteConstraints,
    ) -> Result<ModelChoice, RouteError> {
        let tolerance = constraints
            .latency_tolerance
            .unwrap_or(LatencyTolerance::Standard);
        let dimension = dimension_for(role, &constraints.task_type);

        let mut scored: Vec<(f64, &ModelCandidate)> = CANDIDATES
            .iter()
            .filter(|candidate| {
                let Some(provider) = self.providers.get(&candidate.provider) else {
                    return false;
                };
                if !provider.is_configured() {
                    return false;
                }
                if !candidate.latency.fits(tolerance) {
                    return false;
                }
                if let Some(budget) = constraints.cost_budget {
                    if candidate.cost_per_1k > budget {
                        return false;
                    }
                }
                if let Some(bytes) = constraints.payload_size {
                    if !candidate.supports_payload(bytes) {
                        return false;
                    }
                }
                true
            })
            .map(|candidate| (candidate.weighted_score(dimension), candidate))
            .collect();

        if scored.is_empty() {
            return Err(RouteError::NoProviderAvailable {
                role: role.to_string(),
                task_type: constraints.task_type.clone(),
            });
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.model.cmp(b.1.model))
        });
        let winner = scored[0].1;

        let choice = ModelChoice {
            provider: winner.provider,
            model: winner.model.to_string(),
            temperature: role.temperature(),
        };
        tracing::debug!(
            "Routed role {} (task type {}) to {}:{}",
            role,
            constraints.task_type,
            choice.provider,
            choice.model
        );
        Ok(choice)
    }

    /// Select a model and return it bound to its (cached) provider client.
    pub async fn handle_for(
        &self,
        role: ModelRole,
        constraints: &RouteConstraints,
    ) -> Result<ModelHandle, RouteError> {
        let choice = self.select_model(role, constraints)?;
        let key = format!("{}:{}", choice.provider, choice.model);

        let provider = match self.clients.get(&key).await {
            Some(client) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                client
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let client = self
                    .providers
                    .get(&choice.provider)
                    .cloned()
                    .ok_or_else(|| RouteError::UnknownProvider(choice.provider.to_string()))?;
                self.clients.insert(key, client.clone()).await;
                client
            }
        };

        Ok(ModelHandle { choice, provider })
    }

    pub fn cache_stats(&self) -> RouterCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        RouterCacheStats {
            hits,
            misses,
            hit_rate,
        }
    }
}
