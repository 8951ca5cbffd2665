//! Tool system: the `Tool` trait every capability implements, the uniform
//! result envelope, and the registry/invoker that applies per-tool timeouts
//! and turns every failure into an envelope instead of an exception.

pub mod clock;
pub mod reminder;
pub mod shell;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::provider::ToolDefinition;

/// Default per-tool timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Uniform result envelope. Tool failures flow back into the LLM loop as
/// envelopes; exceptions never cross the tool boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Multimodal blocks for tools with visual output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<Vec<Value>>,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            metadata: None,
            content_blocks: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            metadata: None,
            content_blocks: None,
        }
    }

    /// Text form fed back to the LLM as a tool_result block.
    pub fn llm_payload(&self) -> String {
        if self.success {
            self.output.clone().unwrap_or_else(|| "ok".to_string())
        } else {
            format!(
                "ERROR: {}",
                self.error.as_deref().unwrap_or("unknown failure")
            )
        }
    }
}

/// Trait every tool implements. Parameters are declared as a JSON schema;
/// dispatch is by string name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    /// Per-tool timeout override.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    async fn execute(&self, input: Value) -> ToolOutcome;
}

/// Named tool lookup plus the invoker.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// API-level definitions, optionally restricted to an allow-list
    /// (least-privilege subtask execution).
    pub fn definitions(&self, allowed: Option<&[String]>) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| match allowed {
                Some(list) => list.iter().any(|n| n == t.name()),
                None => true,
            })
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool with its timeout. Unknown tools and timeouts come back
    /// as failure envelopes; the word "timeout" is guaranteed present so
    /// callers can classify.
    pub async fn invoke(&self, name: &str, input: Value) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            return ToolOutcome::failure(format!("unknown tool: {name}"));
        };

        tracing::info!(tool = name, "invoking tool");
        let timeout = tool.timeout();
        match tokio::time::timeout(timeout, tool.execute(input)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(tool = name, seconds = timeout.as_secs(), "tool timeout");
                ToolOutcome::failure(format!(
                    "timeout: {name} did not finish within {}s",
                    timeout.as_secs()
                ))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counting stub tool for pipeline and registry tests.
    pub struct CountingTool {
        pub tool_name: String,
        pub calls: AtomicUsize,
        pub output: String,
        pub delay: Option<Duration>,
    }

    impl CountingTool {
        pub fn new(name: &str, output: &str) -> Self {
            Self {
                tool_name: name.to_string(),
                calls: AtomicUsize::new(0),
                output: output.to_string(),
                delay: None,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            &self.tool_name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(200)
        }
        async fn execute(&self, _input: Value) -> ToolOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            ToolOutcome::success(self.output.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CountingTool;
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_an_envelope() {
        let registry = ToolRegistry::new();
        let outcome = registry.invoke("nope", serde_json::json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn timeout_produces_failure_with_the_word_timeout() {
        let mut registry = ToolRegistry::new();
        let mut slow = CountingTool::new("slow", "never");
        slow.delay = Some(Duration::from_secs(5));
        registry.register(Arc::new(slow));

        let outcome = registry.invoke("slow", serde_json::json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn allowed_list_restricts_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool::new("alpha", "a")));
        registry.register(Arc::new(CountingTool::new("beta", "b")));

        assert_eq!(registry.definitions(None).len(), 2);
        let restricted = registry.definitions(Some(&["beta".to_string()]));
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted[0].name, "beta");
    }

    #[test]
    fn llm_payload_formats() {
        assert_eq!(ToolOutcome::success("42").llm_payload(), "42");
        assert_eq!(
            ToolOutcome::failure("nope").llm_payload(),
            "ERROR: nope"
        );
    }
}
