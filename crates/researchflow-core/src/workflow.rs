//! Explicit state-machine engine driving one research run.
//!
//! The loop is `node = Researcher; while node != Terminal { merge(run(node));
//! node = route(node) }`. Every run owns its own [`SharedState`]; engines and
//! tool registries are shared read-only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::{FactCheckerAgent, ResearcherAgent, SummarizerAgent};
use crate::engine::ReasoningEngine;
use crate::error::ResearchError;
use crate::events::{EventCollector, NodeOutcome};
use crate::router::{self, NodeId, SaveFactsNode, SaveResearchNode};
use crate::state::{SharedState, StateUpdate};
use crate::tool_node::ToolExecutionNode;
use crate::tools::ToolRegistry;
use crate::trace::TraceCollector;

/// A unit of work: reads the state and returns fields to merge.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    async fn run(&self, state: &SharedState) -> Result<StateUpdate, ResearchError>;
}

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_iterations: u32,
    pub fact_check_max_iterations: u32,
    pub timeout: Option<Duration>,
    pub run_id: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            fact_check_max_iterations: 1,
            timeout: None,
            run_id: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_fact_check_max_iterations(mut self, max_iterations: u32) -> Self {
        self.fact_check_max_iterations = max_iterations;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Upper bound on node executions for these caps. Each loop runs at
    /// least one turn even when its cap is zero.
    pub fn step_bound(&self) -> usize {
        let research = self.max_iterations.max(1) as usize;
        let fact_check = self.fact_check_max_iterations.max(1) as usize;
        2 * research + 2 * fact_check + 3
    }
}

/// Structured result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchReport {
    pub research_data: String,
    pub verified_facts: String,
    pub final_report: String,
    pub iterations: u32,
    pub fact_check_iterations: u32,
    pub success: bool,
}

impl ResearchReport {
    fn from_state(state: &SharedState) -> Self {
        Self {
            research_data: state.research_data.clone(),
            verified_facts: state.verified_facts.clone(),
            final_report: state.final_report.clone(),
            iterations: state.iteration,
            fact_check_iterations: state.fact_check_iteration,
            success: true,
        }
    }
}

/// Everything a completed run leaves behind.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub report: ResearchReport,
    pub trace: TraceCollector,
    pub state: SharedState,
    pub node_invocations: usize,
}

/// Node table plus the execution loop.
pub struct GraphEngine {
    researcher: Arc<dyn Node>,
    tool_exec: Arc<dyn Node>,
    fact_checker: Arc<dyn Node>,
    save_research: Arc<dyn Node>,
    save_facts: Arc<dyn Node>,
    summarizer: Arc<dyn Node>,
    events: Option<EventCollector>,
}

impl GraphEngine {
    pub fn new(engine: Arc<dyn ReasoningEngine>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            researcher: Arc::new(ResearcherAgent::new(engine.clone(), tools.clone())),
            tool_exec: Arc::new(ToolExecutionNode::new(tools.clone())),
            fact_checker: Arc::new(FactCheckerAgent::new(engine.clone(), tools)),
            save_research: Arc::new(SaveResearchNode),
            save_facts: Arc::new(SaveFactsNode),
            summarizer: Arc::new(SummarizerAgent::new(engine)),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventCollector) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the node registered under its own id.
    pub fn with_node(mut self, node: Arc<dyn Node>) -> Self {
        match node.id() {
            NodeId::Researcher => self.researcher = node,
            NodeId::ToolExec => self.tool_exec = node,
            NodeId::FactChecker => self.fact_checker = node,
            NodeId::SaveResearch => self.save_research = node,
            NodeId::SaveFacts => self.save_facts = node,
            NodeId::Summarizer => self.summarizer = node,
            NodeId::Terminal => warn!("ignoring node registered as terminal"),
        }
        self
    }

    fn node(&self, id: NodeId) -> Result<&Arc<dyn Node>, ResearchError> {
        match id {
            NodeId::Researcher => Ok(&self.researcher),
            NodeId::ToolExec => Ok(&self.tool_exec),
            NodeId::FactChecker => Ok(&self.fact_checker),
            NodeId::SaveResearch => Ok(&self.save_research),
            NodeId::SaveFacts => Ok(&self.save_facts),
            NodeId::Summarizer => Ok(&self.summarizer),
            NodeId::Terminal => Err(ResearchError::invariant("terminal has no node")),
        }
    }

    /// Run to completion, enforcing `options.timeout` if set.
    pub async fn run(&self, query: &str, options: &RunOptions) -> Result<RunOutcome, ResearchError> {
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute(query, options))
                .await
                .map_err(|_| {
                    warn!(timeout_ms = limit.as_millis() as u64, "research run timed out");
                    ResearchError::Timeout {
                        elapsed_ms: limit.as_millis() as u64,
                    }
                })?,
            None => self.execute(query, options).await,
        }
    }

    #[instrument(name = "workflow.execute", skip_all, fields(run_id))]
    pub async fn execute(&self, query: &str, options: &RunOptions) -> Result<RunOutcome, ResearchError> {
        if query.trim().is_empty() {
            return Err(ResearchError::InvalidQuery("query must not be empty".into()));
        }

        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("run_id", run_id.as_str());

        let mut state = SharedState::new(
            query,
            options.max_iterations,
            options.fact_check_max_iterations,
        );
        let bound = options.step_bound();
        let mut trace = TraceCollector::new();
        let mut current = NodeId::Researcher;
        let mut steps = 0usize;

        info!(
            max_iterations = options.max_iterations,
            fact_check_max_iterations = options.fact_check_max_iterations,
            "research run started"
        );

        while current != NodeId::Terminal {
            steps += 1;
            if steps > bound {
                return Err(ResearchError::invariant(format!(
                    "run exceeded {bound} node executions at '{current}'"
                )));
            }

            let node = self.node(current)?;
            if let Some(events) = &self.events {
                events.emit_started(&run_id, current, steps);
            }

            let started = Instant::now();
            let result = node.run(&state).await.and_then(|update| state.merge(update));
            let duration_ms = started.elapsed().as_millis() as u64;

            if let Err(err) = result {
                warn!(node = %current, error = %err, "node failed; aborting run");
                if let Some(events) = &self.events {
                    events.emit_finished(
                        &run_id,
                        current,
                        NodeOutcome::Failure {
                            reason: err.to_string(),
                        },
                        duration_ms,
                    );
                }
                return Err(err);
            }
            if let Some(events) = &self.events {
                events.emit_finished(&run_id, current, NodeOutcome::Success, duration_ms);
            }

            let route = router::next(current, &state)?;
            trace.record(current, format!("{} -> {}", route.reason, route.to));
            if let Some(events) = &self.events {
                events.emit_routed(&run_id, current, route.to, route.reason);
            }
            current = route.to;
        }

        info!(
            steps,
            iterations = state.iteration,
            fact_check_iterations = state.fact_check_iteration,
            "research run finished"
        );

        Ok(RunOutcome {
            run_id,
            report: ResearchReport::from_state(&state),
            trace,
            state,
            node_invocations: steps,
        })
    }
}

/// Run the full pipeline for `query` and return the structured report.
pub async fn run(
    engine: Arc<dyn ReasoningEngine>,
    tools: Arc<ToolRegistry>,
    query: &str,
    options: RunOptions,
) -> Result<ResearchReport, ResearchError> {
    let outcome = GraphEngine::new(engine, tools).run(query, &options).await?;
    Ok(outcome.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;
    use crate::state::AiResponse;

    struct FixedResearch;

    #[async_trait]
    impl Node for FixedResearch {
        fn id(&self) -> NodeId {
            NodeId::SaveResearch
        }

        async fn run(&self, _state: &SharedState) -> Result<StateUpdate, ResearchError> {
            Ok(StateUpdate::new().with_research_data("fixed research"))
        }
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register_fn("web_search", "Search", |_| Ok("results".into()));
        Arc::new(registry)
    }

    #[test]
    fn step_bound_accounts_for_zero_caps() {
        assert_eq!(RunOptions::new().step_bound(), 2 * 2 + 2 + 3);
        let zero = RunOptions::new()
            .with_max_iterations(0)
            .with_fact_check_max_iterations(0);
        assert_eq!(zero.step_bound(), 7);
    }

    #[tokio::test]
    async fn plain_answers_walk_every_stage_once() {
        let engine = Arc::new(ScriptedEngine::new(AiResponse::text("a".repeat(80))));
        let options = RunOptions::new()
            .with_max_iterations(1)
            .with_run_id("run-fixed");

        let outcome = GraphEngine::new(engine, tools())
            .run("What is Rust?", &options)
            .await
            .unwrap();

        assert_eq!(outcome.run_id, "run-fixed");
        assert_eq!(
            outcome.trace.nodes(),
            vec![
                NodeId::Researcher,
                NodeId::SaveResearch,
                NodeId::FactChecker,
                NodeId::SaveFacts,
                NodeId::Summarizer,
            ]
        );
        assert_eq!(outcome.node_invocations, 5);
        assert!(outcome.report.success);
    }

    #[tokio::test]
    async fn replaced_node_is_used() {
        let engine = Arc::new(ScriptedEngine::new(AiResponse::text("a".repeat(80))));
        let graph = GraphEngine::new(engine, tools()).with_node(Arc::new(FixedResearch));

        let outcome = graph
            .run("query text", &RunOptions::new().with_max_iterations(1))
            .await
            .unwrap();

        assert_eq!(outcome.report.research_data, "fixed research");
        assert_eq!(outcome.trace.visits(NodeId::SaveResearch), 1);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let engine = Arc::new(ScriptedEngine::new(AiResponse::text("unused")));
        let err = GraphEngine::new(engine, tools())
            .run("   ", &RunOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::InvalidQuery(_)));
    }
}
