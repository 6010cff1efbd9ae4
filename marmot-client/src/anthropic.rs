//! Anthropic Messages API provider.
//!
//! Implements the `Provider` trait over the streaming SSE protocol.
//! Prompt-cache markers are attached here; retry with backoff is layered on
//! by [`RetryingProvider`](crate::RetryingProvider).

use crate::assembler::BlockAssembler;
use async_trait::async_trait;
use futures::StreamExt;
use marmot_core::config::ProviderConfig;
use marmot_core::error::ProviderError;
use marmot_core::provider::{
    approximate_tokens, Provider, ProviderEvent, ProviderRequest, ProviderStream, StreamFinal,
};
use marmot_core::types::{ContentBlock, StopReason, UsageInfo};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default pool idle timeout.
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// SSE buffer capacity to reduce reallocations.
const SSE_BUFFER_CAPACITY: usize = 4096;

const API_VERSION: &str = "2023-06-01";

/// Provider for the Anthropic Messages API.
pub struct AnthropicProvider {
    config: ProviderConfig,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Other {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            base_url: "https://api.anthropic.com".to_string(),
            http,
        })
    }

    /// Point the provider at a different endpoint (proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        self.config.api_key().ok_or_else(|| ProviderError::Auth {
            message: "no API key configured".to_string(),
        })
    }

    /// Build the request body. Prompt-cache markers go on the system
    /// prompt's last block and the last tool definition.
    fn build_request_body(&self, request: &ProviderRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
        });
        if stream {
            body["stream"] = Value::Bool(true);
        }

        if self.config.enable_prompt_caching {
            body["system"] = json!([{
                "type": "text",
                "text": request.system,
                "cache_control": {"type": "ephemeral"},
            }]);
        } else {
            body["system"] = Value::String(request.system.clone());
        }

        if !request.tools.is_empty() {
            let mut tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            if self.config.enable_prompt_caching {
                if let Some(last) = tools.last_mut() {
                    last["cache_control"] = json!({"type": "ephemeral"});
                }
            }
            body["tools"] = Value::Array(tools);
        }

        body
    }

    fn map_request_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                duration_ms: self.config.timeout.as_millis() as u64,
            }
        } else {
            ProviderError::Connection {
                message: err.to_string(),
            }
        }
    }

    async fn send(&self, path: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            Ok(response)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::from_http_status(status, text))
        }
    }

    fn map_stop_reason(reason: &str) -> StopReason {
        match reason {
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        }
    }

    fn map_stream_error(error: SseErrorBody) -> ProviderError {
        match error.error_type.as_str() {
            "overloaded_error" => ProviderError::Server {
                status: 529,
                message: error.message,
            },
            "rate_limit_error" => ProviderError::RateLimited {
                retry_after_ms: None,
            },
            "authentication_error" => ProviderError::Auth {
                message: error.message,
            },
            _ => ProviderError::Other {
                message: error.message,
            },
        }
    }

    fn strip_data_prefix(line: &str) -> Option<&str> {
        line.strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))
            .map(str::trim_start)
    }

    fn parse_sse_line(line: &str) -> Option<AnthropicEvent> {
        Self::strip_data_prefix(line).and_then(|data| serde_json::from_str(data).ok())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn stream<'a>(&'a self, request: &'a ProviderRequest) -> ProviderStream<'a> {
        Box::pin(async_stream::stream! {
            let body = self.build_request_body(request, true);
            let response = match self.send("/v1/messages", &body).await {
                Ok(response) => response,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::with_capacity(SSE_BUFFER_CAPACITY);
            let mut assembler = BlockAssembler::new();
            let mut usage = UsageInfo::default();
            let mut stop_reason = StopReason::EndTurn;

            macro_rules! handle_line {
                ($line:expr) => {
                    if let Some(event) = Self::parse_sse_line($line) {
                        match event.event_type.as_str() {
                            "message_start" => {
                                if let Some(u) = event.message.and_then(|m| m.usage) {
                                    usage.input_tokens = u.input_tokens.unwrap_or(0);
                                    usage.cache_creation_input_tokens =
                                        u.cache_creation_input_tokens.unwrap_or(0);
                                    usage.cache_read_input_tokens =
                                        u.cache_read_input_tokens.unwrap_or(0);
                                }
                            }
                            "content_block_start" => {
                                if let Some(block) = event.content_block {
                                    if block.block_type == "tool_use" {
                                        assembler.on_tool_start(
                                            block.id.unwrap_or_default(),
                                            block.name.unwrap_or_default(),
                                        );
                                    }
                                }
                            }
                            "content_block_delta" => {
                                if let Some(delta) = event.delta {
                                    match delta.delta_type.as_deref() {
                                        Some("text_delta") => {
                                            if let Some(text) = delta.text {
                                                assembler.on_text_delta(&text);
                                                yield Ok(ProviderEvent::TextDelta { delta: text });
                                            }
                                        }
                                        Some("input_json_delta") => {
                                            if let Some(partial) = delta.partial_json {
                                                assembler.on_tool_args_delta(&partial);
                                            }
                                        }
                                        _ => {}
                                    }
                                }
                            }
                            "content_block_stop" => {
                                assembler.on_block_stop();
                            }
                            "message_delta" => {
                                if let Some(u) = event.usage {
                                    usage.output_tokens = u.output_tokens.unwrap_or(0);
                                }
                                if let Some(reason) = event.delta.and_then(|d| d.stop_reason) {
                                    stop_reason = Self::map_stop_reason(&reason);
                                }
                            }
                            "error" => {
                                if let Some(error) = event.error {
                                    yield Err(Self::map_stream_error(error));
                                    return;
                                }
                            }
                            _ => {}
                        }
                    }
                };
            }

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(ProviderError::Connection {
                            message: err.to_string(),
                        });
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer.drain(..=newline_pos);
                    handle_line!(&line);
                }
            }
            for line in buffer.lines() {
                handle_line!(line.trim());
            }

            match assembler.finalize() {
                Ok(content) => {
                    yield Ok(ProviderEvent::Final(StreamFinal {
                        content,
                        stop_reason,
                        usage,
                    }));
                }
                Err(err) => {
                    yield Err(err);
                }
            }
        })
    }

    async fn create(&self, request: &ProviderRequest) -> Result<StreamFinal, ProviderError> {
        let body = self.build_request_body(request, false);
        let response = self.send("/v1/messages", &body).await?;
        let message: MessagesResponse = response.json().await.map_err(|e| ProviderError::Other {
            message: format!("invalid response body: {e}"),
        })?;

        Ok(StreamFinal {
            content: message.content,
            stop_reason: message
                .stop_reason
                .as_deref()
                .map(Self::map_stop_reason)
                .unwrap_or_default(),
            usage: UsageInfo {
                input_tokens: message.usage.input_tokens.unwrap_or(0),
                output_tokens: message.usage.output_tokens.unwrap_or(0),
                cache_creation_input_tokens: message.usage.cache_creation_input_tokens.unwrap_or(0),
                cache_read_input_tokens: message.usage.cache_read_input_tokens.unwrap_or(0),
            },
        })
    }

    async fn count_tokens(&self, request: &ProviderRequest) -> Result<u64, ProviderError> {
        let mut body = json!({
            "model": self.config.model,
            "messages": request.messages,
            "system": request.system,
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::to_value(&request.tools).unwrap_or(Value::Null);
        }

        match self.send("/v1/messages/count_tokens", &body).await {
            Ok(response) => {
                let counted: CountTokensResponse =
                    response.json().await.map_err(|e| ProviderError::Other {
                        message: format!("invalid count_tokens response: {e}"),
                    })?;
                Ok(counted.input_tokens)
            }
            Err(err) => {
                tracing::warn!(error = %err, "count_tokens endpoint failed, using local estimate");
                Ok(approximate_tokens(request))
            }
        }
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<AnthropicDelta>,
    content_block: Option<AnthropicContentBlock>,
    message: Option<AnthropicMessage>,
    usage: Option<AnthropicUsage>,
    error: Option<SseErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessage {
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SseErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct CountTokensResponse {
    input_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use marmot_core::types::Message;

    fn provider() -> AnthropicProvider {
        let config = ProviderConfig {
            api_key: Some("test-key".to_string()),
            ..ProviderConfig::new("claude-sonnet-4-20250514")
        };
        AnthropicProvider::new(config).unwrap()
    }

    fn request_with_tools() -> ProviderRequest {
        ProviderRequest::new(vec![Message::user("hi")], "be helpful").with_tools(vec![
            marmot_core::types::ToolDef {
                name: "read_file".to_string(),
                description: "read a file".to_string(),
                input_schema: json!({"type": "object"}),
            },
            marmot_core::types::ToolDef {
                name: "list_files".to_string(),
                description: "list files".to_string(),
                input_schema: json!({"type": "object"}),
            },
        ])
    }

    #[test]
    fn test_cache_markers_on_system_and_last_tool() {
        let body = provider().build_request_body(&request_with_tools(), true);

        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");

        let tools = body["tools"].as_array().unwrap();
        assert!(tools[0].get("cache_control").is_none());
        assert_eq!(tools[1]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_caching_disabled_uses_plain_system() {
        let config = ProviderConfig {
            api_key: Some("test-key".to_string()),
            enable_prompt_caching: false,
            ..ProviderConfig::new("claude-sonnet-4-20250514")
        };
        let provider = AnthropicProvider::new(config).unwrap();
        let body = provider.build_request_body(&request_with_tools(), false);

        assert_eq!(body["system"], "be helpful");
        let tools = body["tools"].as_array().unwrap();
        assert!(tools[1].get("cache_control").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_messages_serialize_to_wire_format() {
        let request = ProviderRequest::new(
            vec![
                Message::user("hi"),
                Message::assistant_blocks(vec![ContentBlock::ToolUse {
                    id: "tu_1".to_string(),
                    name: "read_file".to_string(),
                    input: json!({"path": "a.py"}),
                }]),
                Message::user_blocks(vec![ContentBlock::tool_result("tu_1", "data")]),
            ],
            "sys",
        );
        let body = provider().build_request_body(&request, false);
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "hi");
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["input"]["path"], "a.py");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "tu_1");
    }

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        let event = AnthropicProvider::parse_sse_line(line).unwrap();
        assert_eq!(event.event_type, "content_block_delta");
        assert_eq!(event.delta.unwrap().text.as_deref(), Some("Hello"));

        assert!(AnthropicProvider::parse_sse_line("event: message_start").is_none());
        assert!(AnthropicProvider::parse_sse_line(": keepalive").is_none());
    }

    #[test]
    fn test_map_stop_reason() {
        assert_eq!(
            AnthropicProvider::map_stop_reason("tool_use"),
            StopReason::ToolUse
        );
        assert_eq!(
            AnthropicProvider::map_stop_reason("max_tokens"),
            StopReason::MaxTokens
        );
        assert_eq!(
            AnthropicProvider::map_stop_reason("weird"),
            StopReason::EndTurn
        );
    }

    #[test]
    fn test_stream_error_mapping() {
        let overloaded = AnthropicProvider::map_stream_error(SseErrorBody {
            error_type: "overloaded_error".to_string(),
            message: "busy".to_string(),
        });
        assert!(matches!(
            overloaded,
            ProviderError::Server { status: 529, .. }
        ));
        assert!(overloaded.is_retryable());

        let auth = AnthropicProvider::map_stream_error(SseErrorBody {
            error_type: "authentication_error".to_string(),
            message: "nope".to_string(),
        });
        assert!(!auth.is_retryable());
    }
}
