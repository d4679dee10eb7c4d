//! Concurrency-limited front door: validates queries, runs the workflow and
//! records every run as a session.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::engine::ReasoningEngine;
use crate::error::ResearchError;
use crate::events::EventCollector;
use crate::metrics::record_run_metrics;
use crate::session::{InMemorySessionStore, SessionRecord, SessionStore};
use crate::tools::ToolRegistry;
use crate::workflow::{GraphEngine, RunOptions, RunOutcome};

/// Queries shorter than this (after trimming) are rejected.
pub const MIN_QUERY_CHARS: usize = 5;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub max_concurrent_runs: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
        }
    }
}

/// A completed submission: the stored record plus the in-memory outcome.
#[derive(Debug, Clone)]
pub struct Submission {
    pub record: SessionRecord,
    pub outcome: RunOutcome,
}

pub struct ResearchService {
    engine: Arc<dyn ReasoningEngine>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    semaphore: Arc<Semaphore>,
    events: Option<EventCollector>,
}

impl ResearchService {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
        config: ServiceConfig,
    ) -> Self {
        let permits = config.max_concurrent_runs.max(1);
        Self {
            engine,
            tools,
            store,
            semaphore: Arc::new(Semaphore::new(permits)),
            events: None,
        }
    }

    /// Service backed by an in-memory store.
    pub fn in_memory(engine: Arc<dyn ReasoningEngine>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(
            engine,
            tools,
            Arc::new(InMemorySessionStore::new()),
            ServiceConfig::default(),
        )
    }

    pub fn with_events(mut self, events: EventCollector) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn validate_query(query: &str) -> Result<&str, ResearchError> {
        let trimmed = query.trim();
        if trimmed.chars().count() < MIN_QUERY_CHARS {
            return Err(ResearchError::InvalidQuery(format!(
                "query must be at least {MIN_QUERY_CHARS} characters"
            )));
        }
        Ok(trimmed)
    }

    /// Run one query to completion and persist its session record.
    ///
    /// Failed runs are stored with their error and the error is returned.
    #[instrument(name = "service.submit", skip_all)]
    pub async fn submit(&self, query: &str, options: RunOptions) -> Result<Submission, ResearchError> {
        let query = Self::validate_query(query)?;

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|err| ResearchError::Other(err.into()))?;

        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let options = options.with_run_id(run_id.clone());

        let mut record = SessionRecord::processing(&run_id, query);
        self.store.save(&record).await?;

        let mut graph = GraphEngine::new(self.engine.clone(), self.tools.clone());
        if let Some(events) = &self.events {
            graph = graph.with_events(events.clone());
        }

        info!(session_id = %run_id, "research session started");
        let started = Instant::now();
        let result = graph.run(query, &options).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                record.complete(&outcome.report, duration_ms);
                self.store.save(&record).await?;
                record_run_metrics("completed", duration_ms, outcome.node_invocations as u64);
                info!(session_id = %run_id, duration_ms, "research session completed");
                Ok(Submission { record, outcome })
            }
            Err(err) => {
                record.fail(err.to_string(), duration_ms);
                if let Err(store_err) = self.store.save(&record).await {
                    error!(session_id = %run_id, error = %store_err, "failed to record failed session");
                }
                record_run_metrics("failed", duration_ms, 0);
                error!(session_id = %run_id, error = %err, "research session failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;
    use crate::error::EngineError;
    use crate::session::SessionStatus;
    use crate::state::AiResponse;

    fn service(engine: Arc<ScriptedEngine>) -> ResearchService {
        ResearchService::in_memory(engine, Arc::new(ToolRegistry::new()))
    }

    #[tokio::test]
    async fn short_queries_are_rejected_before_running() {
        let engine = Arc::new(ScriptedEngine::new(AiResponse::text("unused")));
        let svc = service(engine.clone());

        let err = svc.submit("  hi  ", RunOptions::new()).await.unwrap_err();
        assert!(matches!(err, ResearchError::InvalidQuery(_)));
        assert_eq!(engine.call_count().await, 0);
        assert!(svc.store().history(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_runs_are_recorded() {
        let engine = Arc::new(ScriptedEngine::new(AiResponse::text("r".repeat(70))));
        let svc = service(engine);

        let submission = svc
            .submit("What is Rust?", RunOptions::new().with_max_iterations(1))
            .await
            .unwrap();

        let stored = svc.store().get(&submission.record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.iterations, 1);
        assert_eq!(stored.final_report, "r".repeat(70));
        assert!(stored.processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn engine_failures_are_recorded_and_returned() {
        let engine = Arc::new(ScriptedEngine::new(AiResponse::text("unused")));
        engine
            .push_error(EngineError::Provider("rate limited".into()))
            .await;
        let svc = service(engine);

        let err = svc
            .submit(
                "What is Rust?",
                RunOptions::new().with_run_id("failing-run"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Engine(EngineError::Provider(_))));

        let stored = svc.store().get("failing-run").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(stored.error.unwrap().contains("rate limited"));
        assert!(stored.final_report.is_empty());
    }
}
