//! `web_fetch` tool — plain HTTP GET with a 30-second ceiling. Read-only.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolOutcome};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Bodies are truncated so one page cannot blow the context budget.
const MAX_BODY_CHARS: usize = 8000;

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch the contents of a URL (HTTP GET). Returns the response body as \
         text, truncated to a few thousand characters."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute http(s) URL to fetch."
                }
            },
            "required": ["url"]
        })
    }

    fn timeout(&self) -> Duration {
        FETCH_TIMEOUT + Duration::from_secs(5)
    }

    async fn execute(&self, input: Value) -> ToolOutcome {
        let Some(url) = input.get("url").and_then(Value::as_str) else {
            return ToolOutcome::failure("'url' is required");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutcome::failure("only http(s) URLs are supported");
        }

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure(format!("fetch failed: {e}")),
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();

        if status.is_success() {
            ToolOutcome::success(truncated)
        } else {
            ToolOutcome::failure(format!("HTTP {status}: {truncated}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let tool = WebFetchTool::new();
        let outcome = tool.execute(json!({"url": "file:///etc/passwd"})).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn missing_url_is_an_error() {
        let tool = WebFetchTool::new();
        let outcome = tool.execute(json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("url"));
    }
}
