//! Node identifiers, routing decisions and the save steps.
//!
//! Routers are pure functions of [`SharedState`]. Cap checks are evaluated
//! before tool-call checks wherever a loop could otherwise run forever.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::ResearchError;
use crate::state::{Message, SharedState, StateUpdate};
use crate::workflow::Node;

/// AI responses must be longer than this to count as research output.
pub const LONG_RESPONSE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Researcher,
    ToolExec,
    FactChecker,
    SaveResearch,
    SaveFacts,
    Summarizer,
    Terminal,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Researcher => "researcher",
            NodeId::ToolExec => "tool_exec",
            NodeId::FactChecker => "fact_checker",
            NodeId::SaveResearch => "save_research",
            NodeId::SaveFacts => "save_facts",
            NodeId::Summarizer => "summarizer",
            NodeId::Terminal => "terminal",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routing decision and the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub to: NodeId,
    pub reason: &'static str,
}

impl Route {
    fn new(to: NodeId, reason: &'static str) -> Self {
        Self { to, reason }
    }
}

fn latest_has_tool_calls(state: &SharedState) -> bool {
    !state.pending_tool_calls().is_empty()
}

pub fn after_researcher(state: &SharedState) -> Route {
    if latest_has_tool_calls(state) {
        Route::new(NodeId::ToolExec, "tool calls requested")
    } else if state.iteration >= state.max_iterations {
        Route::new(NodeId::SaveResearch, "research iteration cap reached")
    } else {
        Route::new(NodeId::Researcher, "continue researching")
    }
}

/// The research phase is over once the save step ran, so results produced
/// after that belong to the fact-checker.
pub fn after_tools(state: &SharedState) -> Route {
    if state.research_finalized() {
        Route::new(NodeId::FactChecker, "fact-check tool results")
    } else if state.iteration < state.max_iterations {
        Route::new(NodeId::Researcher, "review tool results")
    } else {
        Route::new(NodeId::SaveResearch, "research iteration cap reached")
    }
}

pub fn after_fact_checker(state: &SharedState) -> Route {
    if state.fact_check_iteration >= state.fact_check_max_iterations {
        Route::new(NodeId::SaveFacts, "fact-check iteration cap reached")
    } else if latest_has_tool_calls(state) {
        Route::new(NodeId::ToolExec, "tool calls requested")
    } else {
        Route::new(NodeId::SaveFacts, "fact-check complete")
    }
}

/// Transition out of `from`. `Terminal` has no successor.
pub fn next(from: NodeId, state: &SharedState) -> Result<Route, ResearchError> {
    let route = match from {
        NodeId::Researcher => after_researcher(state),
        NodeId::ToolExec => after_tools(state),
        NodeId::FactChecker => after_fact_checker(state),
        NodeId::SaveResearch => Route::new(NodeId::FactChecker, "research saved"),
        NodeId::SaveFacts => Route::new(NodeId::Summarizer, "facts saved"),
        NodeId::Summarizer => Route::new(NodeId::Terminal, "report written"),
        NodeId::Terminal => {
            return Err(ResearchError::invariant("no transition out of terminal"));
        }
    };

    info!(from = %from, to = %route.to, reason = route.reason, "routing");
    Ok(route)
}

/// Content of the most recent AI response longer than
/// [`LONG_RESPONSE_CHARS`], or an empty string.
pub fn extract_agent_output(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .filter_map(Message::as_ai)
        .find(|response| response.content.chars().count() > LONG_RESPONSE_CHARS)
        .map(|response| response.content.clone())
        .unwrap_or_default()
}

/// Copies the researcher's last substantial answer into `research_data`.
pub struct SaveResearchNode;

#[async_trait]
impl Node for SaveResearchNode {
    fn id(&self) -> NodeId {
        NodeId::SaveResearch
    }

    #[instrument(name = "node.save_research", skip_all)]
    async fn run(&self, state: &SharedState) -> Result<StateUpdate, ResearchError> {
        let research = extract_agent_output(state.messages());
        debug!(chars = research.chars().count(), "research saved");
        Ok(StateUpdate::new().with_research_data(research))
    }
}

/// Copies the fact-checker's last substantial answer into `verified_facts`.
pub struct SaveFactsNode;

#[async_trait]
impl Node for SaveFactsNode {
    fn id(&self) -> NodeId {
        NodeId::SaveFacts
    }

    #[instrument(name = "node.save_facts", skip_all)]
    async fn run(&self, state: &SharedState) -> Result<StateUpdate, ResearchError> {
        let facts = extract_agent_output(state.messages());
        debug!(chars = facts.chars().count(), "facts saved");
        Ok(StateUpdate::new().with_verified_facts(facts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AiResponse, ToolCall};

    fn state_with(messages: Vec<Message>, iteration: u32, max: u32) -> SharedState {
        let mut state = SharedState::new("query", max, 1);
        let mut update = StateUpdate::new().with_iteration(iteration);
        update.messages = messages;
        state.merge(update).unwrap();
        state
    }

    fn tool_request(id: &str) -> Message {
        AiResponse::text("")
            .with_tool_call(ToolCall::new(id, "web_search"))
            .into()
    }

    #[test]
    fn researcher_tool_calls_route_to_tools() {
        let state = state_with(vec![tool_request("call_1")], 1, 2);
        assert_eq!(after_researcher(&state).to, NodeId::ToolExec);
    }

    #[test]
    fn researcher_tool_calls_win_over_cap() {
        let state = state_with(vec![tool_request("call_1")], 2, 2);
        assert_eq!(after_researcher(&state).to, NodeId::ToolExec);
    }

    #[test]
    fn researcher_loops_until_cap() {
        let state = state_with(vec![AiResponse::text("thinking").into()], 1, 2);
        assert_eq!(after_researcher(&state).to, NodeId::Researcher);

        let state = state_with(vec![AiResponse::text("done").into()], 2, 2);
        assert_eq!(after_researcher(&state).to, NodeId::SaveResearch);
    }

    #[test]
    fn tools_route_back_by_phase() {
        let mut state = state_with(Vec::new(), 1, 2);
        assert_eq!(after_tools(&state).to, NodeId::Researcher);

        state.iteration = 2;
        assert_eq!(after_tools(&state).to, NodeId::SaveResearch);

        state.merge(StateUpdate::new().with_research_data("")).unwrap();
        assert_eq!(after_tools(&state).to, NodeId::FactChecker);
    }

    #[test]
    fn fact_check_cap_wins_over_tool_calls() {
        let mut state = state_with(vec![tool_request("call_1")], 1, 1);
        state.fact_check_iteration = 1;
        assert_eq!(after_fact_checker(&state).to, NodeId::SaveFacts);

        state.fact_check_max_iterations = 2;
        assert_eq!(after_fact_checker(&state).to, NodeId::ToolExec);
    }

    #[test]
    fn zero_fact_check_cap_goes_straight_to_save() {
        let mut state = state_with(vec![tool_request("call_1")], 1, 1);
        state.fact_check_max_iterations = 0;
        state.fact_check_iteration = 1;
        assert_eq!(after_fact_checker(&state).to, NodeId::SaveFacts);
    }

    #[test]
    fn fixed_edges_and_terminal() {
        let state = SharedState::new("query", 1, 1);
        assert_eq!(
            next(NodeId::SaveResearch, &state).unwrap().to,
            NodeId::FactChecker
        );
        assert_eq!(next(NodeId::SaveFacts, &state).unwrap().to, NodeId::Summarizer);
        assert_eq!(next(NodeId::Summarizer, &state).unwrap().to, NodeId::Terminal);
        assert!(matches!(
            next(NodeId::Terminal, &state),
            Err(ResearchError::StateInvariant(_))
        ));
    }

    #[test]
    fn extraction_picks_latest_long_response() {
        let long_old = "o".repeat(60);
        let long_new = "n".repeat(51);
        let messages = vec![
            Message::from(AiResponse::text(long_old)),
            Message::human("h".repeat(80)),
            Message::from(AiResponse::text(long_new.clone())),
            Message::from(AiResponse::text("short")),
        ];

        let first = extract_agent_output(&messages);
        assert_eq!(first, long_new);
        assert_eq!(extract_agent_output(&messages), first);
    }

    #[test]
    fn extraction_requires_more_than_threshold() {
        let messages = vec![Message::from(AiResponse::text("e".repeat(LONG_RESPONSE_CHARS)))];
        assert_eq!(extract_agent_output(&messages), "");
        assert_eq!(extract_agent_output(&[]), "");
    }

    #[tokio::test]
    async fn save_research_marks_research_finalized() {
        let mut state = state_with(vec![AiResponse::text("short").into()], 1, 1);
        let update = SaveResearchNode.run(&state).await.unwrap();
        assert_eq!(update.research_data.as_deref(), Some(""));

        state.merge(update).unwrap();
        assert!(state.research_finalized());
    }
}
