//! Tool system for agentic capabilities.
//!
//! This module provides a registry of tool definitions and handlers. The
//! tool implementations themselves live with the embedding application;
//! the registry owns dispatch, timeout enforcement, and the unknown-tool
//! failure path.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of executing a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// Creates a successful result.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: Map::new(),
        }
    }

    /// Creates a failed result.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Async tool handler function.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
pub type ToolHandler = Arc<dyn Fn(&Map<String, Value>) -> ToolFuture + Send + Sync>;

/// Tool registry (definitions + executors).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("definitions", &self.definitions)
            .field("handlers_len", &self.handlers.len())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_tool(mut self, definition: ToolDefinition, handler: ToolHandler) -> Self {
        self.register(definition, handler);
        self
    }

    /// Registers a tool, replacing any existing one with the same name.
    pub fn register(&mut self, definition: ToolDefinition, handler: ToolHandler) {
        let name_lower = definition.name.to_ascii_lowercase();
        if let Some(pos) = self
            .definitions
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(&definition.name))
        {
            self.definitions.remove(pos);
        }
        self.definitions.push(definition);
        self.handlers.insert(name_lower, handler);
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Lowercase tool names, used both for dispatch and for the
    /// embedded-call extractor's known-name list.
    pub fn tool_names(&self) -> Vec<String> {
        self.definitions
            .iter()
            .map(|t| t.name.to_lowercase())
            .collect()
    }

    /// Executes a tool by name, enforcing the optional timeout.
    ///
    /// Unknown tools and timeouts both come back as failed results, never
    /// as errors; the loop surfaces them to the model as tool messages.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        timeout: Option<Duration>,
    ) -> ToolResult {
        let Some(handler) = self.handlers.get(&name.to_ascii_lowercase()) else {
            return self.unknown_tool_result(name);
        };

        let future = handler(arguments);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => ToolResult::fail(format!(
                    "Tool execution timed out after {} seconds",
                    limit.as_secs()
                ))
                .with_metadata("timed_out", Value::Bool(true)),
            },
            None => future.await,
        }
    }

    fn unknown_tool_result(&self, name: &str) -> ToolResult {
        let mut available = self.tool_names();
        available.sort();
        ToolResult::fail(format!(
            "Unknown tool: {name}. Available tools: {}",
            available.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn echo_definition() -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes the text argument".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
            }),
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        ToolRegistry::new().with_tool(
            echo_definition(),
            Arc::new(|args| {
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Box::pin(async move { ToolResult::ok(text) })
            }),
        )
    }

    #[tokio::test]
    async fn test_execute_known_tool() {
        let registry = registry_with_echo();
        let mut args = Map::new();
        args.insert("text".to_string(), json!("hi"));

        let result = registry.execute("echo", &args, None).await;
        assert!(result.success);
        assert_eq!(result.output, "hi");
    }

    #[tokio::test]
    async fn test_execute_is_case_insensitive() {
        let registry = registry_with_echo();
        let mut args = Map::new();
        args.insert("text".to_string(), json!("hi"));

        let result = registry.execute("Echo", &args, None).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_panicking() {
        let registry = registry_with_echo();
        let result = registry.execute("lizard", &Map::new(), None).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("Unknown tool: lizard"));
        assert!(error.contains("echo"));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let registry = ToolRegistry::new().with_tool(
            ToolDefinition {
                name: "sleepy".to_string(),
                description: "never returns in time".to_string(),
                input_schema: json!({"type": "object"}),
            },
            Arc::new(|_args| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    ToolResult::ok("done")
                })
            }),
        );

        let result = registry
            .execute("sleepy", &Map::new(), Some(Duration::from_millis(20)))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(result.metadata.get("timed_out"), Some(&json!(true)));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = registry_with_echo();
        registry.register(
            echo_definition(),
            Arc::new(|_args| Box::pin(async { ToolResult::ok("replaced") })),
        );
        assert_eq!(registry.definitions().len(), 1);
    }
}
