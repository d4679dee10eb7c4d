//! Adapter boundary to the external reasoning provider.

mod openai;

pub use openai::{OpenAiCompatibleEngine, OpenAiEngineConfig};

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::state::{AiResponse, Message};
use crate::tools::ToolSpec;

/// External reasoning capability.
///
/// Implementations are shared across concurrent runs and must not keep
/// per-run state. Retries, if any, belong inside the implementation.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Answer the conversation. `tools` is `None` when tool use is disabled.
    async fn invoke(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<AiResponse, EngineError>;
}

pub type DynEngine = Arc<dyn ReasoningEngine>;

/// A request as seen by [`ScriptedEngine`].
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub messages: Vec<Message>,
    pub tools_enabled: bool,
}

impl EngineRequest {
    /// Content of the leading system prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        match self.messages.first() {
            Some(Message::System { content }) => Some(content.as_str()),
            _ => None,
        }
    }
}

/// Deterministic engine replaying queued responses, for tests and offline runs.
///
/// Once the queue is drained every call receives the fallback response.
pub struct ScriptedEngine {
    queue: Mutex<VecDeque<Result<AiResponse, EngineError>>>,
    fallback: AiResponse,
    requests: Mutex<Vec<EngineRequest>>,
}

impl ScriptedEngine {
    pub fn new(fallback: AiResponse) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses<I>(fallback: AiResponse, responses: I) -> Self
    where
        I: IntoIterator<Item = AiResponse>,
    {
        Self {
            queue: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, response: AiResponse) {
        self.queue.lock().await.push_back(Ok(response));
    }

    pub async fn push_error(&self, error: EngineError) {
        self.queue.lock().await.push_back(Err(error));
    }

    /// Every request received so far, in order.
    pub async fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<AiResponse, EngineError> {
        self.requests.lock().await.push(EngineRequest {
            messages: messages.to_vec(),
            tools_enabled: tools.is_some(),
        });

        match self.queue.lock().await.pop_front() {
            Some(next) => next,
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_queue_then_fallback() {
        let engine =
            ScriptedEngine::with_responses(AiResponse::text("fallback"), [AiResponse::text("one")]);
        engine.push_error(EngineError::Timeout).await;

        let first = engine.invoke(&[], None).await.unwrap();
        assert_eq!(first.content, "one");
        assert!(matches!(
            engine.invoke(&[], None).await,
            Err(EngineError::Timeout)
        ));
        let no_tools: &[ToolSpec] = &[];
        let last = engine.invoke(&[], Some(no_tools)).await.unwrap();
        assert_eq!(last.content, "fallback");

        let requests = engine.requests().await;
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].tools_enabled);
        assert!(requests[2].tools_enabled);
    }
}
