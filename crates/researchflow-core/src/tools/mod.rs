//! Named tool capabilities invocable by the reasoning engine.

mod calculator;
mod web;

pub use calculator::{CalcError, CalculatorTool, evaluate};
pub use web::{WebScrapeTool, WebSearchTool, WebToolsConfig};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::metrics::record_tool_metrics;
use crate::state::ToolArgs;

/// Extensible tool execution.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the reasoning engine uses to request this tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the string arguments the tool accepts.
    fn input_schema(&self) -> serde_json::Value;

    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError>;

    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Tool description handed to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Build a schema for a tool taking a single required string argument.
pub fn single_string_schema(param: &str, description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            param: { "type": "string", "description": description }
        },
        "required": [param]
    })
}

/// Fetch a required argument or report which one is missing.
pub fn required_arg<'a>(tool: &str, args: &'a ToolArgs, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ToolError::invalid_arguments(tool, format!("missing '{key}'")))
}

type ToolFn = dyn Fn(&ToolArgs) -> Result<String, ToolError> + Send + Sync;

/// Adapter that turns a plain closure into a [`Tool`].
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ToolArgs) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: json!({ "type": "object", "additionalProperties": { "type": "string" } }),
            func: Box::new(func),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        (self.func)(args)
    }
}

/// Registry of available tools, shared read-only across runs.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `web_search`, `web_scrape` and `calculate`.
    pub fn with_builtins(config: WebToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(WebSearchTool::new(config.clone()));
        registry.register(WebScrapeTool::new(config));
        registry.register(CalculatorTool);
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Register a closure under `name`.
    pub fn register_fn<F>(&mut self, name: &str, description: &str, func: F)
    where
        F: Fn(&ToolArgs) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        self.register(FnTool::new(name, description, func));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.input_schema(),
            })
            .collect()
    }

    /// Invoke a tool by name.
    pub async fn invoke(&self, name: &str, args: &ToolArgs) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let timeout = Duration::from_secs(tool.timeout_secs());
        match tokio::time::timeout(timeout, tool.call(args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::execution(
                name,
                format!("timed out after {}s", tool.timeout_secs()),
            )),
        }
    }

    /// Invoke a tool and fold any failure into the result text.
    pub async fn invoke_lossy(&self, name: &str, args: &ToolArgs) -> String {
        match self.invoke(name, args).await {
            Ok(output) => {
                debug!(tool = name, bytes = output.len(), "tool call succeeded");
                record_tool_metrics(name, true);
                output
            }
            Err(err) => {
                warn!(tool = name, error = %err, "tool call failed");
                record_tool_metrics(name, false);
                err.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_fn("echo", "Echo the text argument", |args| {
            Ok(required_arg("echo", args, "text")?.to_string())
        });
        registry.register(CalculatorTool);
        registry
    }

    #[tokio::test]
    async fn unknown_tool_reports_not_found() {
        let registry = registry();
        let err = registry
            .invoke("unknown_tool", &ToolArgs::new())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NotFound("unknown_tool".to_string()));

        let text = registry.invoke_lossy("unknown_tool", &ToolArgs::new()).await;
        assert!(text.contains("not found"), "unexpected text: {text}");
    }

    #[tokio::test]
    async fn closures_are_invocable_by_name() {
        let registry = registry();
        let mut args = ToolArgs::new();
        args.insert("text".into(), "hello".into());
        assert_eq!(registry.invoke("echo", &args).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn missing_arguments_become_result_text() {
        let registry = registry();
        let text = registry.invoke_lossy("echo", &ToolArgs::new()).await;
        assert!(text.contains("missing 'text'"), "unexpected text: {text}");
    }

    #[test]
    fn specs_are_sorted_by_name() {
        let names: Vec<String> = registry().specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["calculate".to_string(), "echo".to_string()]);
    }
}
