//! ResearchFlow core: a researcher / fact-checker / summarizer pipeline driven
//! by an explicit state machine.
//!
//! A run starts at the researcher, loops through tool execution under
//! iteration caps, saves its research, fact-checks it, saves the verified
//! facts and ends with a summarizer report. Reasoning engines and tools are
//! injected, so tests drive the whole graph with [`engine::ScriptedEngine`].

mod agents;
mod config;
pub mod engine;
mod error;
mod events;
mod metrics;
mod redaction;
mod router;
mod security;
mod service;
mod session;
mod state;
mod telemetry;
mod tool_node;
pub mod tools;
mod trace;
mod workflow;

pub use agents::{
    FACT_CHECK_EXCERPT_CHARS, FACT_CHECK_WINDOW, FactCheckerAgent, MIN_RESEARCH_CHARS,
    ResearcherAgent, SummarizerAgent, fact_checker_prompt, researcher_prompt, summarizer_prompt,
    verification_text,
};
pub use config::{
    Config, ConfigLoader, LlmConfig, LlmProvider, LoggingConfig, MAX_RESEARCH_ITERATIONS,
    SessionsConfig, ToolsConfig, WorkflowConfig,
};
pub use error::{EngineError, ResearchError, ToolError};
pub use events::{EventCollector, NodeOutcome, WorkflowEvent};
pub use metrics::{init_metrics_from_env, record_run_metrics, record_tool_metrics};
pub use redaction::sanitize_text;
pub use router::{
    LONG_RESPONSE_CHARS, NodeId, Route, SaveFactsNode, SaveResearchNode, after_fact_checker,
    after_researcher, after_tools, extract_agent_output, next as route,
};
pub use security::{SecretValue, require_env};
pub use service::{MIN_QUERY_CHARS, ResearchService, ServiceConfig, Submission};
pub use session::{
    InMemorySessionStore, JsonlSessionStore, SessionRecord, SessionStatus, SessionStore,
    SessionSummary,
};
pub use state::{AiResponse, Message, SharedState, StateUpdate, ToolArgs, ToolCall};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use tool_node::ToolExecutionNode;
pub use tools::{Tool, ToolRegistry, ToolSpec};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
pub use workflow::{GraphEngine, Node, ResearchReport, RunOptions, RunOutcome, run};

