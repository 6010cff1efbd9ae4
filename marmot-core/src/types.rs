//! Core types for marmot
//!
//! These types form the representation boundary for session persistence and
//! the provider wire format.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a plain-text user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a plain-text assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a user turn from content blocks.
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Create an assistant turn from content blocks.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Blocks view of the content (empty for plain text).
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Iterate over tool_use blocks in this turn.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    /// Concatenated text content of this turn.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => {
                let mut buf = String::new();
                for block in blocks {
                    if let ContentBlock::Text { text } = block {
                        buf.push_str(text);
                    }
                }
                buf
            }
        }
    }
}

/// Content of a turn: a bare string or an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A content block inside a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },

    /// Image attachment.
    Image { source: MediaSource },

    /// PDF document attachment.
    Document { source: MediaSource },

    /// Tool invocation requested by the model.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// Result of a tool invocation, paired by `tool_use_id`.
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(content.into()),
            is_error: false,
        }
    }

    pub fn tool_error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(message.into()),
            is_error: true,
        }
    }
}

/// Source of an image or document block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Content of a tool_result block: text or nested blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Flattened text view, used for event summaries and error messages.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => {
                let mut buf = String::new();
                for block in blocks {
                    if let ContentBlock::Text { text } = block {
                        buf.push_str(text);
                    }
                }
                buf
            }
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Model finished naturally.
    #[default]
    EndTurn,
    /// Model wants to call tools.
    ToolUse,
    /// Hit max output tokens.
    MaxTokens,
    /// Hit a stop sequence.
    StopSequence,
}

/// Token usage reported by one provider response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl UsageInfo {
    /// Estimated context occupancy after this response: all input tokens
    /// (cached or not) plus the generated output.
    pub fn current_context_tokens(&self) -> u64 {
        self.input_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
            + self.output_tokens
    }

    /// Accumulate usage from another response.
    pub fn add(&mut self, other: &UsageInfo) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// Tool definition as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ===========================================================================
// Attachments
// ===========================================================================

/// Maximum decoded size for image attachments (20 MB).
pub const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;
/// Maximum decoded size for PDF attachments (32 MB).
pub const MAX_DOCUMENT_BYTES: u64 = 32 * 1024 * 1024;

const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const PDF_TYPE: &str = "application/pdf";

/// A caller-supplied attachment: a media type plus base64 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: String,
    pub data: String,
}

impl Attachment {
    /// Decoded size estimate of the base64 payload.
    fn decoded_size(&self) -> u64 {
        (self.data.len() as u64 / 4) * 3
    }

    /// Validate media type and size, returning the matching block.
    pub fn into_block(self) -> Result<ContentBlock, AgentError> {
        if SUPPORTED_IMAGE_TYPES.contains(&self.media_type.as_str()) {
            if self.decoded_size() > MAX_IMAGE_BYTES {
                return Err(AgentError::InvalidInput(format!(
                    "image attachment exceeds {} bytes",
                    MAX_IMAGE_BYTES
                )));
            }
            Ok(ContentBlock::Image {
                source: MediaSource::Base64 {
                    media_type: self.media_type,
                    data: self.data,
                },
            })
        } else if self.media_type == PDF_TYPE {
            if self.decoded_size() > MAX_DOCUMENT_BYTES {
                return Err(AgentError::InvalidInput(format!(
                    "document attachment exceeds {} bytes",
                    MAX_DOCUMENT_BYTES
                )));
            }
            Ok(ContentBlock::Document {
                source: MediaSource::Base64 {
                    media_type: self.media_type,
                    data: self.data,
                },
            })
        } else {
            Err(AgentError::InvalidInput(format!(
                "unsupported attachment media type: {}",
                self.media_type
            )))
        }
    }
}

/// Combine user text and attachments into message content.
///
/// Without attachments the content stays a plain string.
pub fn build_content_blocks(
    text: &str,
    attachments: Vec<Attachment>,
) -> Result<MessageContent, AgentError> {
    if attachments.is_empty() {
        return Ok(MessageContent::Text(text.to_string()));
    }

    let mut blocks = Vec::with_capacity(attachments.len() + 1);
    for attachment in attachments {
        blocks.push(attachment.into_block()?);
    }
    blocks.push(ContentBlock::text(text));
    Ok(MessageContent::Blocks(blocks))
}
