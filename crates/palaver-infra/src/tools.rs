//! HTTP remote tool source.
//!
//! Each `[[tool_servers]]` entry names a base URL and the tools it serves.
//! A tool call is one `POST {base_url}/invoke` carrying the tool name, the
//! model's arguments, the caller id and the agent's preset parameters for
//! that server. The response body is handed back to the model verbatim.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use palaver_core::chat::turn::TurnContext;
use palaver_core::tool::{ToolBinding, ToolError, ToolExecutor, ToolFuture, ToolSource};
use palaver_types::config::ToolServerConfig;
use palaver_types::llm::ToolCall;

/// Request body of `POST {base_url}/invoke`.
#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    tool: &'a str,
    arguments: &'a serde_json::Value,
    caller_id: &'a str,
    preset: &'a BTreeMap<String, String>,
}

/// Resolves configured tool servers into HTTP-backed tool bindings.
pub struct HttpToolSource {
    client: reqwest::Client,
    servers: HashMap<String, ToolServerConfig>,
}

impl HttpToolSource {
    pub fn new(servers: &[ToolServerConfig]) -> Self {
        Self {
            client: reqwest::Client::new(),
            servers: servers.iter().map(|s| (s.id.clone(), s.clone())).collect(),
        }
    }
}

impl ToolSource for HttpToolSource {
    async fn resolve(
        &self,
        server_id: &str,
        caller_id: &str,
        preset: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<ToolBinding>, ToolError> {
        let server = self
            .servers
            .get(server_id)
            .ok_or_else(|| ToolError::UnknownServer(server_id.to_string()))?;
        if server.tools.is_empty() {
            return Err(ToolError::Unavailable(format!("{server_id} exposes no tools")));
        }

        tracing::debug!(tool_server = %server_id, caller = %caller_id, tools = server.tools.len(), "Resolved tool server");

        let preset = Arc::new(preset.cloned().unwrap_or_default());
        let endpoint = format!("{}/invoke", server.base_url.trim_end_matches('/'));
        Ok(server
            .tools
            .iter()
            .map(|spec| ToolBinding {
                spec: spec.clone(),
                executor: Arc::new(HttpTool {
                    client: self.client.clone(),
                    endpoint: endpoint.clone(),
                    preset: Arc::clone(&preset),
                }),
            })
            .collect())
    }
}

/// One remote tool.
pub struct HttpTool {
    client: reqwest::Client,
    endpoint: String,
    preset: Arc<BTreeMap<String, String>>,
}

impl HttpTool {
    /// Invoke the tool for `caller_id`. Failures come back as `Tool error: ...` text.
    pub async fn invoke(&self, caller_id: &str, call: &ToolCall) -> String {
        match self.try_invoke(caller_id, call).await {
            Ok(text) => text,
            Err(message) => {
                tracing::warn!(tool = %call.name, endpoint = %self.endpoint, error = %message, "Tool call failed");
                format!("Tool error: {message}")
            }
        }
    }

    async fn try_invoke(&self, caller_id: &str, call: &ToolCall) -> Result<String, String> {
        let body = InvokeRequest {
            tool: &call.name,
            arguments: &call.arguments,
            caller_id,
            preset: &self.preset,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {e}", self.endpoint))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        if !status.is_success() {
            return Err(format!("HTTP {status}: {text}"));
        }
        Ok(text)
    }
}

impl ToolExecutor for HttpTool {
    fn execute<'a>(&'a self, turn: &'a TurnContext, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(self.invoke(&turn.caller_id, call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request_json, serve_once};
    use palaver_types::llm::ToolSpec;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn server(base_url: &str) -> ToolServerConfig {
        ToolServerConfig {
            id: "search".to_string(),
            base_url: base_url.to_string(),
            tools: vec![ToolSpec {
                name: "web_search".to_string(),
                description: "Search the web".to_string(),
                parameters: json!({"type": "object"}),
            }],
        }
    }

    fn call() -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: "web_search".to_string(),
            arguments: json!({"query": "rust"}),
        }
    }

    fn only_tool(source: &HttpToolSource, preset: Option<&BTreeMap<String, String>>) -> HttpTool {
        let server = source.servers.get("search").unwrap();
        HttpTool {
            client: source.client.clone(),
            endpoint: format!("{}/invoke", server.base_url),
            preset: Arc::new(preset.cloned().unwrap_or_default()),
        }
    }

    #[tokio::test]
    async fn test_unknown_server_is_an_error() {
        let source = HttpToolSource::new(&[server("http://localhost:1")]);
        let err = source.resolve("missing", "alice", None).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownServer(ref id) if id == "missing"));

        let bindings = source.resolve("search", "alice", None).await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].spec.name, "web_search");
    }

    #[tokio::test]
    async fn test_invoke_posts_call_and_preset() {
        let (base_url, handle) = serve_once("200 OK", "text/plain", "3 results").await;
        let source = HttpToolSource::new(&[server(&base_url)]);
        let preset = BTreeMap::from([("region".to_string(), "eu".to_string())]);
        let tool = only_tool(&source, Some(&preset));

        let text = tool.invoke("alice", &call()).await;
        assert_eq!(text, "3 results");

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /invoke"));
        let body = request_json(&request);
        assert_eq!(body["tool"], "web_search");
        assert_eq!(body["arguments"]["query"], "rust");
        assert_eq!(body["caller_id"], "alice");
        assert_eq!(body["preset"]["region"], "eu");
    }

    #[tokio::test]
    async fn test_http_failure_becomes_tool_error_text() {
        let (base_url, handle) = serve_once("500 Internal Server Error", "text/plain", "boom").await;
        let source = HttpToolSource::new(&[server(&base_url)]);
        let tool = only_tool(&source, None);

        let text = tool.invoke("alice", &call()).await;
        assert!(text.starts_with("Tool error: HTTP 500"));
        assert!(text.ends_with("boom"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_becomes_tool_error_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let source = HttpToolSource::new(&[server(&base_url)]);
        let tool = only_tool(&source, None);
        let text = tool.invoke("alice", &call()).await;
        assert!(text.starts_with("Tool error: request to"));
    }
}
