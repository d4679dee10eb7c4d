use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::ResearchError;
use crate::router::NodeId;
use crate::state::{Message, SharedState, StateUpdate};
use crate::tools::ToolRegistry;
use crate::workflow::Node;

/// Executes every tool call of the latest AI response and appends one
/// result per call id. Tool failures become result text.
pub struct ToolExecutionNode {
    tools: Arc<ToolRegistry>,
}

impl ToolExecutionNode {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Node for ToolExecutionNode {
    fn id(&self) -> NodeId {
        NodeId::ToolExec
    }

    #[instrument(name = "node.tool_exec", skip_all, fields(calls = state.pending_tool_calls().len()))]
    async fn run(&self, state: &SharedState) -> Result<StateUpdate, ResearchError> {
        let calls = state.pending_tool_calls();
        if calls.is_empty() {
            return Err(ResearchError::invariant(
                "tool execution reached without pending tool calls",
            ));
        }

        let mut update = StateUpdate::new();
        for call in calls {
            info!(tool = %call.name, call_id = %call.id, "executing tool");
            let output = self.tools.invoke_lossy(&call.name, &call.args).await;
            update = update.with_message(Message::tool_result(call.id.clone(), output));
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::state::{AiResponse, ToolCall};

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register_fn("web_search", "Search", |args| {
            Ok(format!("results for {}", args.get("query").cloned().unwrap_or_default()))
        });
        registry.register_fn("flaky", "Always fails", |_| {
            Err(ToolError::execution("flaky", "connection reset"))
        });
        Arc::new(registry)
    }

    fn state_requesting(calls: Vec<ToolCall>) -> SharedState {
        let mut response = AiResponse::text("");
        response.tool_calls = calls;
        let mut state = SharedState::new("query", 1, 1);
        state.merge(StateUpdate::new().with_message(response)).unwrap();
        state
    }

    #[tokio::test]
    async fn every_call_gets_exactly_one_result() {
        let state = state_requesting(vec![
            ToolCall::new("call_1", "web_search").with_arg("query", "rust"),
            ToolCall::new("call_2", "flaky"),
            ToolCall::new("call_3", "unknown_tool"),
        ]);

        let update = ToolExecutionNode::new(registry()).run(&state).await.unwrap();

        let ids: Vec<&str> = update
            .messages
            .iter()
            .map(|message| match message {
                Message::ToolResult { tool_call_id, .. } => tool_call_id.as_str(),
                other => panic!("unexpected message {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3"]);
        assert_eq!(update.messages[0].content(), "results for rust");
        assert!(update.messages[1].content().contains("connection reset"));
        assert!(update.messages[2].content().contains("not found"));
    }

    #[tokio::test]
    async fn results_merge_cleanly() {
        let mut state =
            state_requesting(vec![ToolCall::new("call_1", "web_search").with_arg("query", "x")]);
        let update = ToolExecutionNode::new(registry()).run(&state).await.unwrap();
        state.merge(update).unwrap();

        assert!(state.pending_tool_calls().is_empty());
        assert_eq!(state.messages().len(), 2);
    }

    #[tokio::test]
    async fn missing_calls_are_an_invariant_violation() {
        let state = SharedState::new("query", 1, 1);
        let err = ToolExecutionNode::new(registry())
            .run(&state)
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::StateInvariant(_)));
    }
}
