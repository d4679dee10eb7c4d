//! OpenAI-compatible chat-completions provider (Groq, OpenAI, local gateways).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::ReasoningEngine;
use crate::error::EngineError;
use crate::security::SecretValue;
use crate::state::{AiResponse, Message, ToolArgs, ToolCall};
use crate::tools::ToolSpec;

#[derive(Debug, Clone)]
pub struct OpenAiEngineConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OpenAiEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "openai/gpt-oss-120b".to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct OpenAiCompatibleEngine {
    config: OpenAiEngineConfig,
    api_key: SecretValue,
    http: reqwest::Client,
}

impl OpenAiCompatibleEngine {
    pub fn new(config: OpenAiEngineConfig, api_key: SecretValue) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EngineError::Provider(err.to_string()))?;
        Ok(Self {
            config,
            api_key,
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

fn to_wire(message: &Message) -> WireMessage {
    let (role, content, tool_calls, tool_call_id) = match message {
        Message::System { content } => ("system", Some(content.clone()), None, None),
        Message::Human { content } => ("user", Some(content.clone()), None, None),
        Message::Ai(response) => {
            let calls = response
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_kind(),
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: serde_json::to_string(&call.args)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                })
                .collect::<Vec<_>>();
            let calls = (!calls.is_empty()).then_some(calls);
            ("assistant", Some(response.content.clone()), calls, None)
        }
        Message::ToolResult {
            tool_call_id,
            content,
        } => (
            "tool",
            Some(content.clone()),
            None,
            Some(tool_call_id.clone()),
        ),
    };

    WireMessage {
        role: role.to_string(),
        content,
        tool_calls,
        tool_call_id,
    }
}

fn tool_definition(spec: &ToolSpec) -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

/// Decode function arguments into string values keyed by parameter name.
fn parse_arguments(raw: &str) -> Result<ToolArgs, EngineError> {
    if raw.trim().is_empty() {
        return Ok(ToolArgs::new());
    }
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|err| EngineError::MalformedResponse(format!("tool arguments: {err}")))?;
    let object = value.as_object().ok_or_else(|| {
        EngineError::MalformedResponse("tool arguments must be a JSON object".to_string())
    })?;

    Ok(object
        .iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect())
}

fn from_wire(message: WireMessage) -> Result<AiResponse, EngineError> {
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            Ok(ToolCall {
                id: call.id,
                name: call.function.name,
                args: parse_arguments(&call.function.arguments)?,
            })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    Ok(AiResponse {
        content: message.content.unwrap_or_default(),
        tool_calls,
    })
}

#[async_trait]
impl ReasoningEngine for OpenAiCompatibleEngine {
    #[instrument(name = "engine.openai", skip_all, fields(model = %self.config.model, messages = messages.len()))]
    async fn invoke(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<AiResponse, EngineError> {
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: messages.iter().map(to_wire).collect(),
            tools: tools
                .filter(|specs| !specs.is_empty())
                .map(|specs| specs.iter().map(tool_definition).collect()),
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::Provider(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Provider(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| EngineError::MalformedResponse(err.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::MalformedResponse("no choices returned".to_string()))?;

        let answer = from_wire(choice.message)?;
        debug!(
            content_len = answer.content.len(),
            tool_calls = answer.tool_calls.len(),
            "engine responded"
        );
        Ok(answer)
    }
}
