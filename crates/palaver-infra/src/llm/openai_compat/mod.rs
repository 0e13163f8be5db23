//! OpenAI-compatible LLM provider implementation.
//!
//! One [`OpenAiCompatibleProvider`] serves any endpoint speaking the
//! `/chat/completions` protocol (OpenAI, Mistral, Gemini's compatibility
//! layer, local gateways) via its configured base URL.
//!
//! Requests go out through `reqwest`; streaming responses are consumed
//! with `reqwest-eventsource` (see [`streaming`]).

pub mod streaming;
pub mod types;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use palaver_core::llm::provider::{LlmProvider, LlmStream};
use palaver_types::llm::{
    ChatEntry, CompletionRequest, CompletionResponse, LlmError, MessageRole,
    ProviderCapabilities, StopReason, Usage,
};
use palaver_types::model::Provider;

use self::streaming::{create_openai_stream, map_status, stop_reason as map_finish_reason};
use self::types::{
    ChatCompletionRequest, ChatCompletionResponse, OaiFunction, OaiFunctionCall, OaiMessage,
    OaiTool, OaiToolCall, StreamOptions,
};

/// Request timeout for non-streaming completions.
const COMPLETE_TIMEOUT: Duration = Duration::from_secs(300);

/// Provider for any OpenAI-compatible API.
///
/// # API Key Security
///
/// Does NOT derive Debug: the key is held as a [`SecretString`] and only
/// exposed when building the `Authorization` header.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    provider_name: String,
    base_url: String,
    api_key: Option<SecretString>,
    capabilities: ProviderCapabilities,
}

impl OpenAiCompatibleProvider {
    /// Create a client for `provider`, authenticating with `api_key` if given.
    pub fn new(provider: &Provider, api_key: Option<SecretString>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            provider_name: provider.name.clone(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            api_key,
            capabilities: provider.capabilities.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the wire request from a generic [`CompletionRequest`].
    fn build_request(&self, request: &CompletionRequest, stream: bool) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(ref system) = request.system {
            messages.push(OaiMessage {
                role: "system",
                content: Some(system.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }

        messages.extend(request.messages.iter().map(to_wire_message));

        let tools = if self.capabilities.tool_calling {
            request
                .tools
                .iter()
                .map(|spec| OaiTool {
                    kind: "function",
                    function: OaiFunction {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        parameters: spec.parameters.clone(),
                    },
                })
                .collect()
        } else {
            Vec::new()
        };

        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

fn to_wire_message(entry: &ChatEntry) -> OaiMessage {
    match entry.role {
        MessageRole::System => OaiMessage {
            role: "system",
            content: Some(entry.content.clone()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        },
        MessageRole::User => {
            // Attachments travel as plain text references after the message body.
            let content = if entry.files.is_empty() {
                entry.content.clone()
            } else {
                let mut content = entry.content.clone();
                for file in &entry.files {
                    content.push_str("\n\n[attached file] ");
                    content.push_str(file);
                }
                content
            };
            OaiMessage {
                role: "user",
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }
        }
        MessageRole::Assistant => {
            let tool_calls: Vec<OaiToolCall> = entry
                .tool_calls
                .iter()
                .map(|call| OaiToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: OaiFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect();
            let content = if entry.content.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(entry.content.clone())
            };
            OaiMessage {
                role: "assistant",
                content,
                tool_calls,
                tool_call_id: None,
            }
        }
        MessageRole::Tool => OaiMessage {
            role: "tool",
            content: Some(entry.content.clone()),
            tool_calls: Vec::new(),
            tool_call_id: entry.tool_call_id.clone(),
        },
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(request, false);

        let mut http = self
            .client
            .post(self.completions_url())
            .timeout(COMPLETE_TIMEOUT)
            .json(&body);
        if let Some(ref key) = self.api_key {
            http = http.bearer_auth(key.expose_secret());
        }

        let response = http.send().await.map_err(|e| LlmError::Provider {
            message: format!("HTTP request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &headers, text));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let choice = response.choices.into_iter().next();
        let stop_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(map_finish_reason)
            .unwrap_or(StopReason::EndTurn);
        let content = choice.and_then(|c| c.message.content).unwrap_or_default();
        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: response.id,
            content,
            model: response.model,
            stop_reason,
            usage,
        })
    }

    fn stream(&self, request: CompletionRequest) -> LlmStream {
        let body = self.build_request(&request, true);
        create_openai_stream(
            &self.client,
            &self.completions_url(),
            body,
            self.api_key.as_ref(),
        )
    }
}
