//! Shared workflow state and the partial updates nodes return.
//!
//! The graph engine owns exactly one [`SharedState`] per run. Nodes only read
//! it and hand back a [`StateUpdate`]; [`SharedState::merge`] appends messages
//! and overwrites every other field that the update sets.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ResearchError;

/// Tool arguments keyed by parameter name.
pub type ToolArgs = BTreeMap<String, String>;

/// A structured request from the reasoning engine to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: ToolArgs,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: ToolArgs::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Response returned by the reasoning engine.
///
/// When `tool_calls` is non-empty the textual content is advisory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl AiResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    Human {
        content: String,
    },
    Ai(AiResponse),
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::Human { content }
            | Message::ToolResult { content, .. } => content,
            Message::Ai(response) => &response.content,
        }
    }

    pub fn as_ai(&self) -> Option<&AiResponse> {
        match self {
            Message::Ai(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }
}

impl From<AiResponse> for Message {
    fn from(response: AiResponse) -> Self {
        Message::Ai(response)
    }
}

/// Fields a node asks the engine to merge into [`SharedState`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub research_data: Option<String>,
    pub verified_facts: Option<String>,
    pub final_report: Option<String>,
    pub iteration: Option<u32>,
    pub fact_check_iteration: Option<u32>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<Message>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_research_data(mut self, value: impl Into<String>) -> Self {
        self.research_data = Some(value.into());
        self
    }

    pub fn with_verified_facts(mut self, value: impl Into<String>) -> Self {
        self.verified_facts = Some(value.into());
        self
    }

    pub fn with_final_report(mut self, value: impl Into<String>) -> Self {
        self.final_report = Some(value.into());
        self
    }

    pub fn with_iteration(mut self, value: u32) -> Self {
        self.iteration = Some(value);
        self
    }

    pub fn with_fact_check_iteration(mut self, value: u32) -> Self {
        self.fact_check_iteration = Some(value);
        self
    }
}

/// Record threaded through every node of a single run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SharedState {
    messages: Vec<Message>,
    query: String,
    pub research_data: String,
    pub verified_facts: String,
    pub final_report: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub fact_check_iteration: u32,
    pub fact_check_max_iterations: u32,
    #[serde(skip)]
    research_finalized: bool,
    #[serde(skip)]
    answered_calls: HashSet<String>,
    #[serde(skip)]
    requested_calls: HashSet<String>,
}

impl SharedState {
    pub fn new(query: impl Into<String>, max_iterations: u32, fact_check_max_iterations: u32) -> Self {
        Self {
            query: query.into(),
            max_iterations,
            fact_check_max_iterations,
            ..Self::default()
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True once the research save step has written `research_data`, even if
    /// it wrote an empty string.
    pub fn research_finalized(&self) -> bool {
        self.research_finalized || !self.research_data.is_empty()
    }

    /// Most recent AI response anywhere in the history.
    pub fn latest_ai_response(&self) -> Option<&AiResponse> {
        self.messages.iter().rev().find_map(Message::as_ai)
    }

    /// Tool calls still waiting for results: only the last message can carry
    /// them, since the tool node appends results directly after it.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        match self.messages.last() {
            Some(Message::Ai(response)) => &response.tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_results(&self) -> bool {
        self.messages.iter().any(Message::is_tool_result)
    }

    /// Merge a node's partial update.
    ///
    /// Messages are appended, scalar fields overwritten. Fails without
    /// mutating anything if the update would break tool-call correlation.
    pub fn merge(&mut self, update: StateUpdate) -> Result<(), ResearchError> {
        let mut requested = self.requested_calls.clone();
        let mut answered = self.answered_calls.clone();

        for message in &update.messages {
            match message {
                Message::Ai(response) => {
                    for call in &response.tool_calls {
                        if call.id.trim().is_empty() {
                            return Err(ResearchError::invariant(format!(
                                "tool call for '{}' has an empty id",
                                call.name
                            )));
                        }
                        if !requested.insert(call.id.clone()) {
                            return Err(ResearchError::invariant(format!(
                                "duplicate tool call id '{}'",
                                call.id
                            )));
                        }
                    }
                }
                Message::ToolResult { tool_call_id, .. } => {
                    if !requested.contains(tool_call_id) {
                        return Err(ResearchError::invariant(format!(
                            "tool result '{tool_call_id}' has no matching tool call"
                        )));
                    }
                    if !answered.insert(tool_call_id.clone()) {
                        return Err(ResearchError::invariant(format!(
                            "tool call '{tool_call_id}' answered twice"
                        )));
                    }
                }
                Message::System { .. } | Message::Human { .. } => {}
            }
        }

        self.requested_calls = requested;
        self.answered_calls = answered;
        self.messages.extend(update.messages);

        if let Some(value) = update.research_data {
            self.research_data = value;
            self.research_finalized = true;
        }
        if let Some(value) = update.verified_facts {
            self.verified_facts = value;
        }
        if let Some(value) = update.final_report {
            self.final_report = value;
        }
        if let Some(value) = update.iteration {
            self.iteration = value;
        }
        if let Some(value) = update.fact_check_iteration {
            self.fact_check_iteration = value;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_request(id: &str) -> Message {
        AiResponse::text("")
            .with_tool_call(ToolCall::new(id, "web_search").with_arg("query", "rust"))
            .into()
    }

    #[test]
    fn merge_appends_messages_and_overwrites_fields() {
        let mut state = SharedState::new("query", 2, 1);
        state
            .merge(
                StateUpdate::new()
                    .with_message(AiResponse::text("first"))
                    .with_iteration(1),
            )
            .unwrap();
        state
            .merge(
                StateUpdate::new()
                    .with_message(AiResponse::text("second"))
                    .with_iteration(2),
            )
            .unwrap();

        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].content(), "first");
        assert_eq!(state.iteration, 2);
        assert_eq!(state.query(), "query");
    }

    #[test]
    fn empty_research_save_still_finalizes_research() {
        let mut state = SharedState::new("query", 1, 1);
        assert!(!state.research_finalized());

        state
            .merge(StateUpdate::new().with_research_data(""))
            .unwrap();

        assert!(state.research_finalized());
        assert!(state.research_data.is_empty());
    }

    #[test]
    fn pending_calls_only_come_from_last_message() {
        let mut state = SharedState::new("query", 1, 1);
        state
            .merge(StateUpdate::new().with_message(tool_request("call_1")))
            .unwrap();
        assert_eq!(state.pending_tool_calls().len(), 1);

        state
            .merge(StateUpdate::new().with_message(Message::tool_result("call_1", "ok")))
            .unwrap();
        assert!(state.pending_tool_calls().is_empty());
        assert!(state.has_tool_results());
    }

    #[test]
    fn orphan_tool_result_is_rejected_without_mutation() {
        let mut state = SharedState::new("query", 1, 1);
        let err = state
            .merge(
                StateUpdate::new()
                    .with_message(Message::tool_result("call_9", "result"))
                    .with_iteration(3),
            )
            .unwrap_err();

        assert!(matches!(err, ResearchError::StateInvariant(_)));
        assert!(state.messages().is_empty());
        assert_eq!(state.iteration, 0);
    }

    #[test]
    fn duplicate_tool_call_ids_are_rejected() {
        let mut state = SharedState::new("query", 1, 1);
        state
            .merge(StateUpdate::new().with_message(tool_request("call_1")))
            .unwrap();
        let err = state
            .merge(StateUpdate::new().with_message(tool_request("call_1")))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn messages_serialize_with_role_tag() {
        let json = serde_json::to_value(Message::tool_result("call_1", "done")).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["tool_call_id"], "call_1");

        let ai = serde_json::to_value(Message::from(AiResponse::text("hi"))).unwrap();
        assert_eq!(ai["role"], "ai");
        assert_eq!(ai["content"], "hi");
    }
}
