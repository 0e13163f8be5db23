//! OpenAI SSE stream to [`StreamEvent`] adapter.
//!
//! The HTTP side uses `reqwest-eventsource`; each `data:` payload is a
//! [`ChatCompletionChunk`] fed through [`ChunkAccumulator`], which turns
//! chunks into provider-agnostic events.
//!
//! Tool call arguments arrive as partial JSON fragments across multiple
//! chunks (keyed by tool call index). These are accumulated and emitted as
//! [`StreamEvent::ToolUseComplete`] when a finish reason arrives or the
//! stream ends.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest_eventsource::{Event, EventSource};
use secrecy::{ExposeSecret, SecretString};

use palaver_core::llm::provider::LlmStream;
use palaver_types::llm::{LlmError, StopReason, StreamEvent, Usage};

use super::types::{ChatCompletionChunk, ChatCompletionRequest};

/// Payload that terminates an OpenAI stream.
const DONE_MARKER: &str = "[DONE]";

/// Accumulates partial JSON fragments for a tool call during streaming.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

impl ToolCallAccumulator {
    fn into_event(self) -> Result<StreamEvent, LlmError> {
        let input = if self.json_buffer.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.json_buffer).map_err(|e| {
                LlmError::Deserialization(format!("tool call JSON for '{}': {e}", self.name))
            })?
        };
        Ok(StreamEvent::ToolUseComplete {
            id: self.id,
            name: self.name,
            input,
        })
    }
}

/// Turns a sequence of chunks into stream events.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    tools: BTreeMap<u32, ToolCallAccumulator>,
}

impl ChunkAccumulator {
    /// Events produced by one chunk, in emission order.
    pub fn apply(&mut self, chunk: ChatCompletionChunk) -> Result<Vec<StreamEvent>, LlmError> {
        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta { text });
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let acc = self.tools.entry(delta.index).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    acc.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        acc.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        acc.json_buffer.push_str(&arguments);
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                events.extend(self.drain_tools()?);
                events.push(StreamEvent::MessageDelta {
                    stop_reason: stop_reason(&reason),
                });
            }
        }

        // Usage arrives on the final chunk, with an empty choices array.
        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }));
        }

        Ok(events)
    }

    /// Tool calls still pending when the stream ends without a finish reason.
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        self.drain_tools()
    }

    fn drain_tools(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        std::mem::take(&mut self.tools)
            .into_values()
            .map(ToolCallAccumulator::into_event)
            .collect()
    }
}

pub(crate) fn stop_reason(finish_reason: &str) -> StopReason {
    match finish_reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Map a non-success HTTP status to an [`LlmError`].
pub(crate) fn map_status(status: StatusCode, headers: &HeaderMap, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited {
            retry_after_ms: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1_000),
        },
        400 | 404 | 422 => LlmError::InvalidRequest(body),
        503 | 529 => LlmError::Overloaded(body),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {body}"),
        },
    }
}

async fn map_eventsource_error(error: reqwest_eventsource::Error) -> LlmError {
    use reqwest_eventsource::Error;

    match error {
        Error::InvalidStatusCode(status, response) => {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            map_status(status, &headers, body)
        }
        Error::Transport(e) => LlmError::Provider {
            message: format!("HTTP request failed: {e}"),
        },
        other => LlmError::Stream(other.to_string()),
    }
}

/// Open a streaming chat completion and adapt it to [`StreamEvent`]s.
///
/// Emits text deltas as they arrive, tool calls once complete, the stop
/// reason, usage (requested via `stream_options.include_usage`), then `Done`.
pub fn create_openai_stream(
    client: &reqwest::Client,
    url: &str,
    body: ChatCompletionRequest,
    api_key: Option<&SecretString>,
) -> LlmStream {
    let mut request = client.post(url).json(&body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key.expose_secret());
    }

    Box::pin(async_stream::try_stream! {
        let mut source = EventSource::new(request)
            .map_err(|e| LlmError::Stream(format!("failed to open event stream: {e}")))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let mut accumulator = ChunkAccumulator::default();

        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data.trim() == DONE_MARKER {
                        break;
                    }
                    let chunk: ChatCompletionChunk = serde_json::from_str(&message.data)
                        .map_err(|e| LlmError::Deserialization(format!("stream chunk: {e}")))?;
                    for event in accumulator.apply(chunk)? {
                        yield event;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(error) => {
                    source.close();
                    Err(map_eventsource_error(error).await)?;
                }
            }
        }
        source.close();

        for event in accumulator.finish()? {
            yield event;
        }
        yield StreamEvent::Done;
    })
}
