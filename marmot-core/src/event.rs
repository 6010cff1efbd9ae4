//! Agent events for streaming output.
//!
//! Events have two representations: the in-process enum consumed from the
//! event stream, and the wire form `(kind, data)` persisted by the event
//! store. `kind()` and `data_json()` produce the wire form; the `token`
//! payload is a JSON-encoded string so newlines round-trip through text
//! transports.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Lifecycle of one tool invocation as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Started,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Events emitted during a `stream_message` call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Incremental assistant text.
    Token { delta: String },

    /// Tool invocation status change.
    ToolCall {
        name: String,
        status: ToolCallStatus,
        summary: String,
        error: Option<String>,
    },

    /// Boundary between assistant preamble text and the first tool call.
    PreambleEnd,

    /// The provider is retrying after a transient error.
    Retry {
        attempt: u32,
        max_retries: u32,
        error_kind: &'static str,
    },

    /// Context compaction ran.
    Compact {
        phase: u8,
        before_tokens: u64,
        after_tokens: u64,
    },

    /// The turn finished; the final assistant message is persisted.
    Done,

    /// The loop terminated on an unrecoverable error.
    Error { kind: String, message: String },

    /// A tool mutated a file; passed through from the tool side-channel.
    FileChange { path: String, diff: String },
}

impl AgentEvent {
    /// Wire-level event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolCall { .. } => "tool_call",
            Self::PreambleEnd => "preamble_end",
            Self::Retry { .. } => "retry",
            Self::Compact { .. } => "compact",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::FileChange { .. } => "file_change",
        }
    }

    /// Wire-level data payload, serialized to JSON.
    pub fn data_json(&self) -> String {
        let value = match self {
            Self::Token { delta } => Value::String(delta.clone()),
            Self::ToolCall {
                name,
                status,
                summary,
                error,
            } => {
                let mut obj = json!({
                    "name": name,
                    "status": status.as_str(),
                    "summary": summary,
                });
                if let Some(error) = error {
                    obj["error"] = Value::String(error.clone());
                }
                obj
            }
            Self::PreambleEnd | Self::Done => json!({}),
            Self::Retry {
                attempt,
                max_retries,
                error_kind,
            } => json!({
                "attempt": attempt,
                "max_retries": max_retries,
                "error_kind": error_kind,
            }),
            Self::Compact {
                phase,
                before_tokens,
                after_tokens,
            } => json!({
                "phase": phase,
                "before_tokens": before_tokens,
                "after_tokens": after_tokens,
            }),
            Self::Error { kind, message } => json!({
                "type": kind,
                "message": message,
            }),
            Self::FileChange { path, diff } => json!({
                "path": path,
                "diff": diff,
            }),
        };
        value.to_string()
    }
}

/// Maximum length of a rendered tool-call summary.
const SUMMARY_MAX_LEN: usize = 120;

/// Human-readable one-liner for a tool call: the tool name followed by its
/// scalar arguments as `key=value` pairs.
pub fn tool_summary(name: &str, input: &Value) -> String {
    let mut summary = name.to_string();
    if let Value::Object(map) = input {
        for (key, value) in map {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            summary.push(' ');
            summary.push_str(key);
            summary.push('=');
            summary.push_str(&rendered);
            if summary.len() >= SUMMARY_MAX_LEN {
                break;
            }
        }
    }
    if summary.chars().count() > SUMMARY_MAX_LEN {
        let truncated: String = summary.chars().take(SUMMARY_MAX_LEN).collect();
        summary = format!("{truncated}...");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_kinds() {
        let cases: Vec<(AgentEvent, &str)> = vec![
            (
                AgentEvent::Token {
                    delta: "hi".to_string(),
                },
                "token",
            ),
            (
                AgentEvent::ToolCall {
                    name: "read_file".to_string(),
                    status: ToolCallStatus::Started,
                    summary: "read_file path=a.py".to_string(),
                    error: None,
                },
                "tool_call",
            ),
            (AgentEvent::PreambleEnd, "preamble_end"),
            (
                AgentEvent::Retry {
                    attempt: 1,
                    max_retries: 3,
                    error_kind: "rate_limit",
                },
                "retry",
            ),
            (
                AgentEvent::Compact {
                    phase: 1,
                    before_tokens: 800,
                    after_tokens: 300,
                },
                "compact",
            ),
            (AgentEvent::Done, "done"),
            (
                AgentEvent::Error {
                    kind: "auth".to_string(),
                    message: "bad key".to_string(),
                },
                "error",
            ),
            (
                AgentEvent::FileChange {
                    path: "src/x.py".to_string(),
                    diff: "-a\n+b".to_string(),
                },
                "file_change",
            ),
        ];

        for (event, expected) in cases {
            assert_eq!(event.kind(), expected);
            // Every payload must be valid JSON.
            let _: Value = serde_json::from_str(&event.data_json()).unwrap();
        }
    }

    #[test]
    fn test_token_data_roundtrips_newlines() {
        let event = AgentEvent::Token {
            delta: "line one\nline two".to_string(),
        };
        let data = event.data_json();
        let decoded: String = serde_json::from_str(&data).unwrap();
        assert_eq!(decoded, "line one\nline two");
    }

    #[test]
    fn test_error_payload_uses_type_field() {
        let event = AgentEvent::Error {
            kind: "auth".to_string(),
            message: "invalid api key".to_string(),
        };
        let value: Value = serde_json::from_str(&event.data_json()).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["message"], "invalid api key");
    }

    #[test]
    fn test_tool_call_payload_omits_absent_error() {
        let ok = AgentEvent::ToolCall {
            name: "read_file".to_string(),
            status: ToolCallStatus::Completed,
            summary: "read_file path=a.py".to_string(),
            error: None,
        };
        let value: Value = serde_json::from_str(&ok.data_json()).unwrap();
        assert!(value.get("error").is_none());

        let failed = AgentEvent::ToolCall {
            name: "read_file".to_string(),
            status: ToolCallStatus::Failed,
            summary: "read_file path=a.py".to_string(),
            error: Some("no such file".to_string()),
        };
        let value: Value = serde_json::from_str(&failed.data_json()).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "no such file");
    }

    #[test]
    fn test_tool_summary_rendering() {
        let summary = tool_summary("read_file", &json!({"path": "src/x.py"}));
        assert_eq!(summary, "read_file path=src/x.py");

        // Non-scalar arguments are skipped.
        let summary = tool_summary("search", &json!({"query": "foo", "filters": {"lang": "rs"}}));
        assert_eq!(summary, "search query=foo");

        // Non-object input renders the bare name.
        assert_eq!(tool_summary("noop", &Value::Null), "noop");
    }

    #[test]
    fn test_tool_summary_truncation() {
        let long = "x".repeat(500);
        let summary = tool_summary("bash", &json!({ "command": long }));
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= SUMMARY_MAX_LEN + 3);
    }
}
