//! Researcher, fact-checker and summarizer nodes.
//!
//! Each agent builds a prompt from [`SharedState`], calls the reasoning engine
//! once and returns the fields to merge. Engine failures propagate and end the
//! run.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::engine::ReasoningEngine;
use crate::error::ResearchError;
use crate::router::NodeId;
use crate::state::{Message, SharedState, StateUpdate};
use crate::tools::{ToolRegistry, ToolSpec};
use crate::workflow::Node;

/// Research text shorter than this sends the fact-checker to tool results.
pub const MIN_RESEARCH_CHARS: usize = 50;
/// Maximum characters of research embedded in the fact-check prompt.
pub const FACT_CHECK_EXCERPT_CHARS: usize = 2000;
/// History window the fact-checker sees.
pub const FACT_CHECK_WINDOW: usize = 8;
/// Tool results concatenated when research text is missing.
pub const FALLBACK_TOOL_RESULTS: usize = 3;

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn describe_tools(specs: &[ToolSpec]) -> String {
    if specs.is_empty() {
        return "- (no tools available)".to_string();
    }
    specs
        .iter()
        .map(|spec| format!("- {}: {}", spec.name, spec.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn researcher_prompt(state: &SharedState, specs: &[ToolSpec]) -> String {
    let instruction = if state.has_tool_results() {
        "Review the tool results gathered so far. If important gaps remain, search more; \
         otherwise write a thorough summary of your findings and cite every source."
    } else {
        "You have no results yet. Perform a first search with the web_search tool before answering."
    };

    format!(
        "You are a RESEARCHER agent with web research tools.\n\n\
         Your job: find CURRENT, FACTUAL information about: {query}\n\n\
         Available tools:\n{tools}\n\n\
         Strategy:\n\
         1. Start with a broad search, then narrow down to specific aspects.\n\
         2. Look for recent developments.\n\
         3. Cite sources clearly.\n\n\
         {instruction}\n\n\
         Turn {turn} of {max}.",
        query = state.query(),
        tools = describe_tools(specs),
        turn = state.iteration + 1,
        max = state.max_iterations.max(1),
    )
}

/// Text the fact-checker verifies: saved research, or the latest tool output
/// when research is missing or too short.
pub fn verification_text(state: &SharedState) -> String {
    if state.research_data.chars().count() >= MIN_RESEARCH_CHARS {
        return state.research_data.clone();
    }

    let recent: Vec<&str> = state
        .messages()
        .iter()
        .filter(|message| message.is_tool_result())
        .map(Message::content)
        .collect();
    let start = recent.len().saturating_sub(FALLBACK_TOOL_RESULTS);
    let fallback = recent[start..].join("\n");

    if fallback.is_empty() {
        state.research_data.clone()
    } else {
        fallback
    }
}

pub fn fact_checker_prompt(state: &SharedState, specs: &[ToolSpec]) -> String {
    let text = verification_text(state);
    let excerpt = truncate_chars(&text, FACT_CHECK_EXCERPT_CHARS);

    format!(
        "You are a FACT-CHECKER agent with verification tools.\n\n\
         Research question: {query}\n\n\
         Research to verify:\n\"\"\"\n{excerpt}\n\"\"\"\n\n\
         Available tools:\n{tools}\n\n\
         Process:\n\
         1. Extract the 3-5 key claims from the research.\n\
         2. Assess the credibility of each claim from the evidence you already have.\n\
         3. Call a tool ONLY for claims you genuinely doubt. Prefer as few tool calls as possible.\n\
         4. Rate confidence (High/Medium/Low) and flag anything unverified.\n\n\
         Output format:\n\
         VERIFIED: [fact] - Source: [source] (Confidence: High)\n\
         NEEDS VERIFICATION: [claim] - Reason: [reason]\n\
         REFUTED: [false claim] - Reason: [why]",
        query = state.query(),
        tools = describe_tools(specs),
    )
}

pub fn summarizer_prompt(state: &SharedState) -> String {
    let or_none = |text: &str| {
        if text.trim().is_empty() {
            "(none recorded)".to_string()
        } else {
            text.to_string()
        }
    };

    format!(
        "You are a SUMMARIZER agent. Write a professional research report in markdown.\n\n\
         Research question: {query}\n\n\
         Research findings:\n{research}\n\n\
         Fact-check results:\n{facts}\n\n\
         Use exactly this structure:\n\
         # Research Report: [Topic]\n\n\
         ## Executive Summary\n[2-3 sentences]\n\n\
         ## Key Findings\n[Main points with sources]\n\n\
         ## Uncertainties\n[Claims that could not be verified or were refuted]\n\n\
         ## Sources\n[All sources used]",
        query = state.query(),
        research = or_none(&state.research_data),
        facts = or_none(&state.verified_facts),
    )
}

/// Drop leading tool results so the window never starts mid tool exchange.
fn bounded_window(messages: &[Message], size: usize) -> &[Message] {
    let start = messages.len().saturating_sub(size);
    let window = &messages[start..];
    let skip = window
        .iter()
        .take_while(|message| message.is_tool_result())
        .count();
    &window[skip..]
}

/// Gathers information, looping through the tool node.
pub struct ResearcherAgent {
    engine: Arc<dyn ReasoningEngine>,
    tools: Arc<ToolRegistry>,
}

impl ResearcherAgent {
    pub fn new(engine: Arc<dyn ReasoningEngine>, tools: Arc<ToolRegistry>) -> Self {
        Self { engine, tools }
    }
}

#[async_trait]
impl Node for ResearcherAgent {
    fn id(&self) -> NodeId {
        NodeId::Researcher
    }

    #[instrument(name = "node.researcher", skip_all, fields(iteration = state.iteration + 1))]
    async fn run(&self, state: &SharedState) -> Result<StateUpdate, ResearchError> {
        let specs = self.tools.specs();

        let mut request = Vec::with_capacity(state.messages().len() + 2);
        request.push(Message::system(researcher_prompt(state, &specs)));
        request.push(Message::human(format!("Research thoroughly: {}", state.query())));
        request.extend(state.messages().iter().cloned());

        info!(
            iteration = state.iteration + 1,
            max_iterations = state.max_iterations,
            "researcher starting turn"
        );
        let response = self.engine.invoke(&request, Some(specs.as_slice())).await?;
        debug!(
            tool_calls = response.tool_calls.len(),
            content_len = response.content.len(),
            "researcher turn complete"
        );

        Ok(StateUpdate::new()
            .with_message(response)
            .with_iteration(state.iteration + 1))
    }
}

/// Verifies the saved research, optionally through the tool node.
pub struct FactCheckerAgent {
    engine: Arc<dyn ReasoningEngine>,
    tools: Arc<ToolRegistry>,
}

impl FactCheckerAgent {
    pub fn new(engine: Arc<dyn ReasoningEngine>, tools: Arc<ToolRegistry>) -> Self {
        Self { engine, tools }
    }
}

#[async_trait]
impl Node for FactCheckerAgent {
    fn id(&self) -> NodeId {
        NodeId::FactChecker
    }

    #[instrument(name = "node.fact_checker", skip_all, fields(iteration = state.fact_check_iteration + 1))]
    async fn run(&self, state: &SharedState) -> Result<StateUpdate, ResearchError> {
        let specs = self.tools.specs();
        let window = bounded_window(state.messages(), FACT_CHECK_WINDOW);

        let mut request = Vec::with_capacity(window.len() + 2);
        request.push(Message::system(fact_checker_prompt(state, &specs)));
        request.extend(window.iter().cloned());
        if window.is_empty() {
            request.push(Message::human("Verify the research above."));
        }

        info!(
            iteration = state.fact_check_iteration + 1,
            window = window.len(),
            "fact-checker starting turn"
        );
        let response = self.engine.invoke(&request, Some(specs.as_slice())).await?;

        Ok(StateUpdate::new()
            .with_message(response)
            .with_fact_check_iteration(state.fact_check_iteration + 1))
    }
}

/// Writes the final report. Tools are disabled for this node.
pub struct SummarizerAgent {
    engine: Arc<dyn ReasoningEngine>,
}

impl SummarizerAgent {
    pub fn new(engine: Arc<dyn ReasoningEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Node for SummarizerAgent {
    fn id(&self) -> NodeId {
        NodeId::Summarizer
    }

    #[instrument(name = "node.summarizer", skip_all)]
    async fn run(&self, state: &SharedState) -> Result<StateUpdate, ResearchError> {
        let request = vec![
            Message::system(summarizer_prompt(state)),
            Message::human(format!("Write the report for: {}", state.query())),
        ];

        info!("summarizer creating final report");
        let mut response = self.engine.invoke(&request, None).await?;
        if response.has_tool_calls() {
            warn!(
                tool_calls = response.tool_calls.len(),
                "summarizer requested tools while tools are disabled; ignoring"
            );
            response.tool_calls.clear();
        }

        let report = response.content.clone();
        Ok(StateUpdate::new()
            .with_message(response)
            .with_final_report(report))
    }
}
