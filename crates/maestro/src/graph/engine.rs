//! The execution graph. A session advances strictly sequentially through
//! `entry → planner → {builder | ideator} → judge → {finalizer | builder}`,
//! appending one step per node. The planner owns the branch decision, the
//! judge owns the retry decision, and every run ends in the end-task manager
//! so no session vanishes without a terminal notification.

use std::{sync::Arc, time::Instant};

use db::{
    models::{
        session::{Session, SessionError},
        step::{Step, StepError},
    },
    DBService,
};
use serde_json::{json, Value};
use services::services::{
    agent_end_task::{AgentEndTaskService, EndTaskError, EndTaskReason, EndTaskRequest},
    notifications::NotificationService,
};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    broker::{ToolBroker, ToolError},
    providers::{ChatMessage, ProviderError},
    router::{ModelHandle, ModelRole, ModelRouter, RouteConstraints, RouteError},
};

use super::types::{
    GraphConfig, GraphEvent, GraphNode, JudgeVerdict, PlannedCapability, PlannerDecision,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

const PLANNER_SYSTEM: &str = "You are the planning stage of a task execution graph. \
Decide whether the task needs the builder branch (concrete code or tool work) or the \
ideator branch (open-ended ideation). Respond with a single JSON object shaped as \
{\"route\": \"builder\" or \"ideator\", \"plan_summary\": string, \
\"capabilities\": [{\"capability\": string, \"params\": object}]}. \
Only name capabilities from the available list; leave the array empty when none apply.";

const BUILDER_SYSTEM: &str = "You are the builder stage of a task execution graph. \
Produce the requested work product directly, without preamble or commentary.";

const IDEATOR_SYSTEM: &str = "You are the ideator stage of a task execution graph. \
Explore the problem broadly and produce your strongest ideas as the work product.";

const JUDGE_SYSTEM: &str = "You are the evaluation stage of a task execution graph. \
Score the work product against the task on a 0.0 to 1.0 scale. Respond with a single \
JSON object shaped as {\"score\": number, \"feedback\": string, \
\"improvements\": [string]}.";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("End-task error: {0}")]
    EndTask(#[from] EndTaskError),

    #[error("Node {node} produced malformed output: {message}")]
    MalformedOutput { node: GraphNode, message: String },
}

/// Mutable state threaded through one session run. Nothing here survives the
/// run; everything durable lives on the session and step rows.
struct RunContext {
    task_input: Value,
    decision: Option<PlannerDecision>,
    work_product: Option<String>,
    judge_feedback: Option<String>,
    improvements: Vec<String>,
    final_score: Option<f64>,
    quality_flag: Option<&'static str>,
}

impl RunContext {
    fn new(session: &Session) -> Self {
        let task_input = serde_json::from_str(&session.original_input).unwrap_or(Value::Null);
        Self {
            task_input,
            decision: None,
            work_product: None,
            judge_feedback: None,
            improvements: Vec::new(),
            final_score: None,
            quality_flag: None,
        }
    }
}

#[derive(Clone)]
pub struct GraphEngine {
    config: GraphConfig,
    db: DBService,
    router: Arc<ModelRouter>,
    broker: Arc<ToolBroker>,
    notifications: NotificationService,
    end_tasks: AgentEndTaskService,
    events: broadcast::Sender<GraphEvent>,
}

impl GraphEngine {
    pub fn new(
        config: GraphConfig,
        db: DBService,
        router: Arc<ModelRouter>,
        broker: Arc<ToolBroker>,
        notifications: NotificationService,
        end_tasks: AgentEndTaskService,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            db,
            router,
            broker,
            notifications,
            end_tasks,
            events,
        }
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn broker(&self) -> &ToolBroker {
        &self.broker
    }

    /// Subscribe to lifecycle events for this engine. Slow subscribers drop
    /// events rather than slowing execution.
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: GraphEvent) {
        let _ = self.events.send(event);
    }

    /// Drive one session from `pending` to a terminal state. The loop
    /// re-reads the session between nodes so external cancellation takes
    /// effect at the next boundary, never mid-node.
    pub async fn run(&self, session_id: Uuid) -> Result<Session, GraphError> {
        let session = Session::find_by_id(&self.db.pool, session_id).await?;
        let session = Session::mark_running(&self.db.pool, session.id).await?;
        let task_id = session.task_id.clone();

        tracing::info!(
            "Session {} started for task {} (type {})",
            session_id,
            task_id,
            session.task_type
        );
        self.publish(GraphEvent::SessionStarted {
            session_id,
            task_id: task_id.clone(),
        });
        self.notify_soft(
            self.notifications.notify_started(
                &task_id,
                json!({
                    "task_type": session.task_type,
                    "description": session.description,
                    "priority": session.priority,
                }),
            )
            .await,
            &task_id,
        );

        let mut ctx = RunContext::new(&session);
        let mut node = GraphNode::Entry;

        loop {
            let session = Session::find_by_id(&self.db.pool, session_id).await?;
            if session.cancel_requested {
                tracing::info!(
                    "Session {} cancelled before node {}",
                    session_id,
                    node.name()
                );
                return self.finish_cancelled(&session).await;
            }

            let session = Session::advance_node(&self.db.pool, session_id, node.name()).await?;
            self.publish(GraphEvent::NodeStarted { session_id, node });
            self.notify_soft(
                self.notifications.notify_progress(
                    &task_id,
                    json!({
                        "node": node.name(),
                        "percent": node.progress_percent(),
                        "retry_count": session.retry_count,
                    }),
                )
                .await,
                &task_id,
            );

            match self.execute_node(&session, node, &mut ctx).await {
                Ok(Some(next)) => {
                    self.publish(GraphEvent::NodeFinished {
                        session_id,
                        node,
                        success: true,
                    });
                    node = next;
                }
                Ok(None) => {
                    self.publish(GraphEvent::NodeFinished {
                        session_id,
                        node,
                        success: true,
                    });
                    let session = Session::find_by_id(&self.db.pool, session_id).await?;
                    self.publish(GraphEvent::SessionFinished {
                        session_id,
                        status: session.status.clone(),
                    });
                    tracing::info!(
                        "Session {} finished with status {}",
                        session_id,
                        session.status
                    );
                    return Ok(session);
                }
                Err(err) => {
                    self.publish(GraphEvent::NodeFinished {
                        session_id,
                        node,
                        success: false,
                    });
                    return self.finish_failed(&session, node, err).await;
                }
            }
        }
    }

    async fn execute_node(
        &self,
        session: &Session,
        node: GraphNode,
        ctx: &mut RunContext,
    ) -> Result<Option<GraphNode>, GraphError> {
        match node {
            GraphNode::Entry => self.run_entry(session, ctx).await,
            GraphNode::Planner => self.run_planner(session, ctx).await,
            GraphNode::Builder => self.run_builder(session, ctx).await,
            GraphNode::Ideator => self.run_ideator(session, ctx).await,
            GraphNode::Judge => self.run_judge(session, ctx).await,
            GraphNode::Finalizer => self.run_finalizer(session, ctx).await.map(|_| None),
        }
    }

    /// Entry normalizes the task input. A routing hint from the submitter is
    /// recorded for the audit trail, but the planner owns the branch choice.
    async fn run_entry(
        &self,
        session: &Session,
        ctx: &mut RunContext,
    ) -> Result<Option<GraphNode>, GraphError> {
        let step = Step::begin(&self.db.pool, session.id, GraphNode::Entry.name(), None).await?;
        let start = Instant::now();

        let routing_hint = ctx
            .task_input
            .get("task_data")
            .and_then(|data| data.get("routing_hint"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(hint) = &routing_hint {
            tracing::info!(
                "Task {} carries routing hint {:?}; planner decides the branch",
                session.task_id,
                hint
            );
        }

        let output = json!({
            "task_type": session.task_type,
            "priority": session.priority,
            "routing_hint": routing_hint,
        });
        Step::succeed(&self.db.pool, step.id, Some(&output), elapsed_ms(start)).await?;
        Ok(Some(GraphNode::Planner))
    }

    async fn run_planner(
        &self,
        session: &Session,
        ctx: &mut RunContext,
    ) -> Result<Option<GraphNode>, GraphError> {
        let handle = match self
            .router
            .handle_for(ModelRole::Planner, &self.constraints_for(session))
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                return self
                    .fail_before_model(session, GraphNode::Planner, err.into())
                    .await
            }
        };

        let step = Step::begin(
            &self.db.pool,
            session.id,
            GraphNode::Planner.name(),
            Some(&handle.label()),
        )
        .await?;
        let start = Instant::now();

        match self.plan(session, &handle).await {
            Ok((decision, next)) => {
                let output = json!({
                    "route": decision.route,
                    "plan_summary": decision.plan_summary,
                    "capabilities": decision
                        .capabilities
                        .iter()
                        .map(|c| c.capability.clone())
                        .collect::<Vec<_>>(),
                });
                ctx.decision = Some(decision);
                Step::succeed(&self.db.pool, step.id, Some(&output), elapsed_ms(start)).await?;
                Ok(Some(next))
            }
            Err(err) => {
                Step::fail(&self.db.pool, step.id, &err.to_string(), elapsed_ms(start)).await?;
                Err(err)
            }
        }
    }

    async fn plan(
        &self,
        session: &Session,
        handle: &ModelHandle,
    ) -> Result<(PlannerDecision, GraphNode), GraphError> {
        let capability_ids: Vec<String> = self
            .broker
            .registry()
            .list()
            .await
            .into_iter()
            .map(|c| c.capability_id)
            .collect();

        let messages = vec![
            ChatMessage::system(PLANNER_SYSTEM),
            ChatMessage::user(format!(
                "Task type: {}\nDescription: {}\nAvailable capabilities: {}\nInput: {}",
                session.task_type,
                session.description,
                capability_ids.join(", "),
                ctx_input_excerpt(&session.original_input),
            )),
        ];
        let response = handle
            .complete(messages, true, self.config.max_output_tokens)
            .await?;

        let decision: PlannerDecision =
            parse_json_block(&response.content).map_err(|e| GraphError::MalformedOutput {
                node: GraphNode::Planner,
                message: e.to_string(),
            })?;
        let next = match decision.route.as_str() {
            "builder" => GraphNode::Builder,
            "ideator" => GraphNode::Ideator,
            other => {
                return Err(GraphError::MalformedOutput {
                    node: GraphNode::Planner,
                    message: format!("unknown route {:?}", other),
                })
            }
        };
        Ok((decision, next))
    }

    async fn run_builder(
        &self,
        session: &Session,
        ctx: &mut RunContext,
    ) -> Result<Option<GraphNode>, GraphError> {
        let handle = match self
            .router
            .handle_for(ModelRole::Builder, &self.constraints_for(session))
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                return self
                    .fail_before_model(session, GraphNode::Builder, err.into())
                    .await
            }
        };

        let step = Step::begin(
            &self.db.pool,
            session.id,
            GraphNode::Builder.name(),
            Some(&handle.label()),
        )
        .await?;
        let start = Instant::now();

        match self.build(session, ctx, &handle).await {
            Ok(output) => {
                Step::succeed(&self.db.pool, step.id, Some(&output), elapsed_ms(start)).await?;
                Ok(Some(GraphNode::Judge))
            }
            Err(err) => {
                Step::fail(&self.db.pool, step.id, &err.to_string(), elapsed_ms(start)).await?;
                Err(err)
            }
        }
    }

    /// Builder produces the work product, then walks the planned capabilities
    /// in order. Broker-level rejections (unknown capability, bad params)
    /// fail the node; handler failures that exhausted their retries are
    /// recorded in the step output and execution continues.
    async fn build(
        &self,
        session: &Session,
        ctx: &mut RunContext,
        handle: &ModelHandle,
    ) -> Result<Value, GraphError> {
        let plan_summary = ctx
            .decision
            .as_ref()
            .map(|d| d.plan_summary.clone())
            .unwrap_or_default();

        let mut prompt = format!(
            "Task: {}\nPlan: {}\nInput: {}",
            session.description,
            plan_summary,
            ctx_input_excerpt(&session.original_input),
        );
        if let Some(feedback) = &ctx.judge_feedback {
            prompt.push_str(&format!(
                "\n\nA previous attempt was rejected. Reviewer feedback: {}",
                feedback
            ));
            if !ctx.improvements.is_empty() {
                prompt.push_str(&format!(
                    "\nApply these improvements: {}",
                    ctx.improvements.join("; ")
                ));
            }
        }

        let messages = vec![ChatMessage::system(BUILDER_SYSTEM), ChatMessage::user(prompt)];
        let response = handle
            .complete(messages, false, self.config.max_output_tokens)
            .await?;
        ctx.work_product = Some(response.content.clone());

        let planned: Vec<PlannedCapability> = ctx
            .decision
            .as_ref()
            .map(|d| d.capabilities.clone())
            .unwrap_or_default();
        let mut invocations = Vec::new();
        for capability in planned {
            let invocation = self
                .broker
                .invoke(&capability.capability, capability.params.clone())
                .await?;
            if !invocation.success {
                tracing::warn!(
                    "Capability {} failed after {} attempt(s) for task {}",
                    invocation.capability_id,
                    invocation.attempts,
                    session.task_id
                );
            }
            invocations.push(invocation);
        }

        Ok(json!({
            "content": response.content,
            "invocations": invocations,
        }))
    }

    async fn run_ideator(
        &self,
        session: &Session,
        ctx: &mut RunContext,
    ) -> Result<Option<GraphNode>, GraphError> {
        let handle = match self
            .router
            .handle_for(ModelRole::Ideator, &self.constraints_for(session))
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                return self
                    .fail_before_model(session, GraphNode::Ideator, err.into())
                    .await
            }
        };

        let step = Step::begin(
            &self.db.pool,
            session.id,
            GraphNode::Ideator.name(),
            Some(&handle.label()),
        )
        .await?;
        let start = Instant::now();

        let messages = vec![
            ChatMessage::system(IDEATOR_SYSTEM),
            ChatMessage::user(format!(
                "Task: {}\nInput: {}",
                session.description,
                ctx_input_excerpt(&session.original_input),
            )),
        ];
        match handle
            .complete(messages, false, self.config.max_output_tokens)
            .await
        {
            Ok(response) => {
                ctx.work_product = Some(response.content.clone());
                let output = json!({ "content": response.content });
                Step::succeed(&self.db.pool, step.id, Some(&output), elapsed_ms(start)).await?;
                Ok(Some(GraphNode::Judge))
            }
            Err(err) => {
                let err = GraphError::from(err);
                Step::fail(&self.db.pool, step.id, &err.to_string(), elapsed_ms(start)).await?;
                Err(err)
            }
        }
    }

    async fn run_judge(
        &self,
        session: &Session,
        ctx: &mut RunContext,
    ) -> Result<Option<GraphNode>, GraphError> {
        let handle = match self
            .router
            .handle_for(ModelRole::Judge, &self.constraints_for(session))
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                return self
                    .fail_before_model(session, GraphNode::Judge, err.into())
                    .await
            }
        };

        let step = Step::begin(
            &self.db.pool,
            session.id,
            GraphNode::Judge.name(),
            Some(&handle.label()),
        )
        .await?;
        let start = Instant::now();

        match self.judge(session, ctx, &handle).await {
            Ok((output, next)) => {
                Step::succeed(&self.db.pool, step.id, Some(&output), elapsed_ms(start)).await?;
                Ok(Some(next))
            }
            Err(err) => {
                Step::fail(&self.db.pool, step.id, &err.to_string(), elapsed_ms(start)).await?;
                Err(err)
            }
        }
    }

    async fn judge(
        &self,
        session: &Session,
        ctx: &mut RunContext,
        handle: &ModelHandle,
    ) -> Result<(Value, GraphNode), GraphError> {
        let work = ctx.work_product.clone().unwrap_or_default();
        let messages = vec![
            ChatMessage::system(JUDGE_SYSTEM),
            ChatMessage::user(format!(
                "Task: {}\n\nWork product:\n{}",
                session.description, work
            )),
        ];
        let response = handle
            .complete(messages, true, self.config.max_output_tokens)
            .await?;

        let verdict: JudgeVerdict =
            parse_json_block(&response.content).map_err(|e| GraphError::MalformedOutput {
                node: GraphNode::Judge,
                message: e.to_string(),
            })?;
        let score = verdict.score.clamp(0.0, 1.0);

        ctx.final_score = Some(score);
        ctx.judge_feedback = verdict.feedback.clone();
        ctx.improvements = verdict.improvements.clone().unwrap_or_default();

        let retry = score < self.config.acceptance_threshold
            && session.retry_count < session.max_retries;
        let next = if retry {
            let updated = Session::increment_retry(&self.db.pool, session.id).await?;
            tracing::info!(
                "Session {} scored {:.2} below threshold {:.2}; retry {} of {}",
                session.id,
                score,
                self.config.acceptance_threshold,
                updated.retry_count,
                updated.max_retries
            );
            GraphNode::Builder
        } else {
            ctx.quality_flag = Some(if score >= self.config.acceptance_threshold {
                "accepted"
            } else {
                "below_threshold"
            });
            GraphNode::Finalizer
        };

        let output = json!({
            "score": score,
            "feedback": verdict.feedback,
            "improvements": verdict.improvements,
            "decision": if retry { "retry" } else { "finalize" },
        });
        Ok((output, next))
    }

    /// Finalizer assembles the result summary, stamps the score, and hands
    /// the session to the end-task manager, which owns the terminal
    /// transition and the final notification.
    async fn run_finalizer(&self, session: &Session, ctx: &mut RunContext) -> Result<(), GraphError> {
        let step = Step::begin(
            &self.db.pool,
            session.id,
            GraphNode::Finalizer.name(),
            None,
        )
        .await?;
        let start = Instant::now();

        match self.finalize(session, ctx).await {
            Ok(output) => {
                Step::succeed(&self.db.pool, step.id, Some(&output), elapsed_ms(start)).await?;
                Ok(())
            }
            Err(err) => {
                Step::fail(&self.db.pool, step.id, &err.to_string(), elapsed_ms(start)).await?;
                Err(err)
            }
        }
    }

    async fn finalize(&self, session: &Session, ctx: &RunContext) -> Result<Value, GraphError> {
        let score = ctx.final_score.unwrap_or(0.0);
        let quality_flag = ctx.quality_flag.unwrap_or("below_threshold");
        Session::set_final_score(&self.db.pool, session.id, score, quality_flag).await?;

        let summary = json!({
            "task_id": session.task_id,
            "task_type": session.task_type,
            "final_score": score,
            "quality_flag": quality_flag,
            "plan_summary": ctx.decision.as_ref().map(|d| d.plan_summary.clone()),
            "result": ctx.work_product,
            "retry_count": session.retry_count,
        });
        Session::attach_summary(&self.db.pool, session.id, &summary).await?;

        let outcome = self
            .end_tasks
            .end_task(EndTaskRequest {
                task_id: session.task_id.clone(),
                agent_id: self.notifications.agent_id().to_string(),
                reason: EndTaskReason::Success,
                execution_summary: Some(summary),
                cleanup_actions: Vec::new(),
                next_steps: ctx.improvements.clone(),
                metadata: None,
            })
            .await?;

        Ok(json!({
            "final_score": score,
            "quality_flag": quality_flag,
            "final_status": outcome.final_status,
        }))
    }

    /// A routing failure happens before any model work; it still leaves an
    /// error step so the trace shows where the session died.
    async fn fail_before_model(
        &self,
        session: &Session,
        node: GraphNode,
        err: GraphError,
    ) -> Result<Option<GraphNode>, GraphError> {
        let step = Step::begin(&self.db.pool, session.id, node.name(), None).await?;
        Step::fail(&self.db.pool, step.id, &err.to_string(), 0).await?;
        Err(err)
    }

    async fn finish_failed(
        &self,
        session: &Session,
        node: GraphNode,
        err: GraphError,
    ) -> Result<Session, GraphError> {
        tracing::error!(
            "Session {} failed at node {}: {}",
            session.id,
            node.name(),
            err
        );

        let end = self
            .end_tasks
            .end_task(EndTaskRequest {
                task_id: session.task_id.clone(),
                agent_id: self.notifications.agent_id().to_string(),
                reason: EndTaskReason::Failure,
                execution_summary: Some(json!({
                    "failed_node": node.name(),
                    "error": err.to_string(),
                })),
                cleanup_actions: Vec::new(),
                next_steps: Vec::new(),
                metadata: None,
            })
            .await;
        if let Err(end_err) = end {
            tracing::error!(
                "End-task for failed session {} also failed: {}",
                session.id,
                end_err
            );
        }

        let session = Session::find_by_id(&self.db.pool, session.id).await?;
        self.publish(GraphEvent::SessionFinished {
            session_id: session.id,
            status: session.status.clone(),
        });
        Err(err)
    }

    async fn finish_cancelled(&self, session: &Session) -> Result<Session, GraphError> {
        let end = self
            .end_tasks
            .end_task(EndTaskRequest {
                task_id: session.task_id.clone(),
                agent_id: self.notifications.agent_id().to_string(),
                reason: EndTaskReason::Cancelled,
                execution_summary: Some(json!({
                    "completion_reason": "cancelled",
                    "last_node": session.current_node,
                })),
                cleanup_actions: Vec::new(),
                next_steps: Vec::new(),
                metadata: None,
            })
            .await;
        if let Err(err) = end {
            tracing::error!(
                "End-task for cancelled session {} failed: {}",
                session.id,
                err
            );
        }

        let session = Session::find_by_id(&self.db.pool, session.id).await?;
        self.publish(GraphEvent::SessionFinished {
            session_id: session.id,
            status: session.status.clone(),
        });
        Ok(session)
    }

    fn constraints_for(&self, session: &Session) -> RouteConstraints {
        RouteConstraints {
            task_type: session.task_type.clone(),
            payload_size: Some(session.original_input.len()),
            latency_tolerance: None,
            cost_budget: None,
        }
    }

    /// Notification persistence or delivery trouble degrades observability,
    /// never the session itself.
    fn notify_soft<T, E: std::fmt::Display>(&self, result: Result<T, E>, task_id: &str) {
        if let Err(err) = result {
            tracing::warn!("Notification for task {} failed: {}", task_id, err);
        }
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis().min(i64::MAX as u128) as i64
}

fn ctx_input_excerpt(original_input: &str) -> String {
    const MAX: usize = 2000;
    if original_input.len() <= MAX {
        return original_input.to_string();
    }
    let mut end = MAX;
    while end > 0 && !original_input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &original_input[..end])
}

/// Models wrap JSON in markdown fences often enough that stripping them here
/// is cheaper than one retry round-trip.
fn parse_json_block<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, serde_json::Error> {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    serde_json::from_str(trimmed.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_block_strips_markdown_fences() {
        let fenced = "```json\n{\"route\": \"builder\", \"plan_summary\": \"s\"}\n```";
        let decision: PlannerDecision = parse_json_block(fenced).expect("parse");
        assert_eq!(decision.route, "builder");
    }

    #[test]
    fn parse_json_block_accepts_bare_json() {
        let verdict: JudgeVerdict = parse_json_block("  {\"score\": 0.7}  ").expect("parse");
        assert!((verdict.score - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn input_excerpt_clips_on_char_boundaries() {
        let long = "я".repeat(3000);
        let clipped = ctx_input_excerpt(&long);
        assert!(clipped.len() < long.len());
        assert!(clipped.ends_with('…'));
    }
}
