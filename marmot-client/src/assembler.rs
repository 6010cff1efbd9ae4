//! Block assembly for streaming responses.
//!
//! Collects text deltas and tool-call argument fragments into ordered
//! content blocks. Blocks are ordered by when they started, matching the
//! order the backend declared them on the wire.

use marmot_core::error::ProviderError;
use marmot_core::types::ContentBlock;
use serde_json::Value;

enum Slot {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        args_json: String,
    },
}

/// Assembler for building ordered blocks from streaming events.
#[derive(Default)]
pub struct BlockAssembler {
    slots: Vec<Slot>,
    /// Index of the tool_use slot currently receiving argument deltas.
    current_tool: Option<usize>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text delta, coalescing into the trailing text block.
    pub fn on_text_delta(&mut self, delta: &str) {
        if let Some(Slot::Text(text)) = self.slots.last_mut() {
            text.push_str(delta);
            return;
        }
        self.slots.push(Slot::Text(delta.to_string()));
    }

    /// Start a new tool_use block.
    pub fn on_tool_start(&mut self, id: String, name: String) {
        self.current_tool = Some(self.slots.len());
        self.slots.push(Slot::ToolUse {
            id,
            name,
            args_json: String::new(),
        });
    }

    /// Append an argument JSON fragment to the open tool_use block.
    ///
    /// Fragments arriving with no open block are dropped; the backend
    /// protocol guarantees a start event first.
    pub fn on_tool_args_delta(&mut self, delta: &str) {
        if let Some(index) = self.current_tool {
            if let Some(Slot::ToolUse { args_json, .. }) = self.slots.get_mut(index) {
                args_json.push_str(delta);
            }
        }
    }

    /// Close the current block.
    pub fn on_block_stop(&mut self) {
        self.current_tool = None;
    }

    /// Whether any text has been assembled so far.
    pub fn has_text(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, Slot::Text(_)))
    }

    /// Finish assembly and return the ordered blocks.
    pub fn finalize(self) -> Result<Vec<ContentBlock>, ProviderError> {
        let mut blocks = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            match slot {
                Slot::Text(text) => blocks.push(ContentBlock::Text { text }),
                Slot::ToolUse {
                    id,
                    name,
                    args_json,
                } => {
                    // Tools with no parameters stream empty args.
                    let input: Value = if args_json.is_empty() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(&args_json).map_err(|e| ProviderError::Other {
                            message: format!("invalid tool arguments for '{name}': {e}"),
                        })?
                    };
                    blocks.push(ContentBlock::ToolUse { id, name, input });
                }
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_deltas_coalesce() {
        let mut assembler = BlockAssembler::new();
        assembler.on_text_delta("Hello");
        assembler.on_text_delta(" ");
        assembler.on_text_delta("world");

        let blocks = assembler.finalize().unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Hello world"));
    }

    #[test]
    fn test_tool_args_accumulate() {
        let mut assembler = BlockAssembler::new();
        assembler.on_tool_start("tu_1".to_string(), "read_file".to_string());
        assembler.on_tool_args_delta(r#"{"pa"#);
        assembler.on_tool_args_delta(r#"th":"a.py"}"#);
        assembler.on_block_stop();

        let blocks = assembler.finalize().unwrap();
        match &blocks[0] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "tu_1");
                assert_eq!(name, "read_file");
                assert_eq!(input["path"], "a.py");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_empty_args_become_empty_object() {
        let mut assembler = BlockAssembler::new();
        assembler.on_tool_start("tu_1".to_string(), "list".to_string());
        assembler.on_block_stop();

        let blocks = assembler.finalize().unwrap();
        match &blocks[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(input, &serde_json::json!({}));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_text_around_tool_use_keeps_order() {
        let mut assembler = BlockAssembler::new();
        assembler.on_text_delta("let me look. ");
        assembler.on_tool_start("tu_1".to_string(), "read_file".to_string());
        assembler.on_tool_args_delta("{}");
        assembler.on_block_stop();
        assembler.on_text_delta("done");

        let blocks = assembler.finalize().unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[0], ContentBlock::Text { .. }));
        assert!(matches!(&blocks[1], ContentBlock::ToolUse { .. }));
        assert!(matches!(&blocks[2], ContentBlock::Text { text } if text == "done"));
    }

    #[test]
    fn test_invalid_args_error() {
        let mut assembler = BlockAssembler::new();
        assembler.on_tool_start("tu_1".to_string(), "bad".to_string());
        assembler.on_tool_args_delta(r#"{"unclosed"#);
        assert!(assembler.finalize().is_err());
    }

    #[test]
    fn test_orphan_args_delta_dropped() {
        let mut assembler = BlockAssembler::new();
        assembler.on_tool_args_delta(r#"{"x":1}"#);
        assert!(assembler.finalize().unwrap().is_empty());
    }
}
