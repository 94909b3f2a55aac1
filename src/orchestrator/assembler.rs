//! Tool-call reassembly from streamed fragments

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::completion::ToolCallRequest;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// A completed call with its parsed arguments
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledCall {
    pub request: ToolCallRequest,
    /// Parsed arguments, or why they could not be parsed
    pub arguments: Result<Value, String>,
}

/// Accumulates tool-call fragments keyed by call index
///
/// Id, name and argument text are concatenated in arrival order, so the
/// result does not depend on how the stream was split.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            call.id.push_str(id);
        }
        if let Some(name) = name {
            call.name.push_str(name);
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in index order with arguments parsed
    pub fn finish(self) -> Vec<AssembledCall> {
        self.calls
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{}_{}", index, uuid::Uuid::new_v4().simple())
                } else {
                    call.id
                };
                let arguments = parse_arguments(&call.arguments);

                AssembledCall {
                    request: ToolCallRequest {
                        id,
                        name: call.name,
                        arguments: call.arguments,
                    },
                    arguments,
                }
            })
            .collect()
    }
}

/// Empty text means no arguments; anything else must be a JSON object
fn parse_arguments(text: &str) -> Result<Value, String> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("Arguments must be a JSON object, got {}", other)),
        Err(e) => Err(format!("Malformed arguments: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ARGS: &str = r#"{"file_path": "src/main.rs", "content": "fn main() {}\n", "n": [1, 2.5]}"#;

    fn assemble(chunk: usize) -> Vec<AssembledCall> {
        let mut assembler = ToolCallAssembler::new();
        assembler.push(0, Some("call_a"), Some("write_file"), None);
        let chars: Vec<char> = ARGS.chars().collect();
        for piece in chars.chunks(chunk) {
            let piece: String = piece.iter().collect();
            assembler.push(0, None, None, Some(&piece));
        }
        assembler.finish()
    }

    #[test]
    fn test_fragmentation_invariance() {
        let whole = assemble(ARGS.len());
        for chunk in [1, 2, 3, 7, 16] {
            assert_eq!(assemble(chunk), whole, "chunk size {}", chunk);
        }
        assert_eq!(
            whole[0].arguments,
            Ok(json!({"file_path": "src/main.rs", "content": "fn main() {}\n", "n": [1, 2.5]}))
        );
    }

    #[test]
    fn test_split_name_and_interleaved_calls() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push(1, Some("call_b"), Some("get_git"), Some("{}"));
        assembler.push(0, Some("call_a"), Some("read_"), Some("{\"file_path\":"));
        assembler.push(1, None, Some("_status"), None);
        assembler.push(0, None, Some("file"), Some("\"a.txt\"}"));

        let calls = assembler.finish();
        assert_eq!(calls[0].request.name, "read_file");
        assert_eq!(calls[0].arguments, Ok(json!({"file_path": "a.txt"})));
        assert_eq!(calls[1].request.id, "call_b");
        assert_eq!(calls[1].request.name, "get_git_status");
    }

    #[test]
    fn test_malformed_and_empty_arguments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push(0, None, Some("a"), Some("{\"x\": "));
        assembler.push(1, None, Some("b"), None);
        assembler.push(2, None, Some("c"), Some("[1]"));

        let calls = assembler.finish();
        assert!(calls[0].arguments.is_err());
        assert_eq!(calls[1].arguments, Ok(json!({})));
        assert!(calls[2].arguments.is_err());
        assert!(calls[0].request.id.starts_with("call_0_"));
        assert_ne!(calls[0].request.id, calls[1].request.id);
    }
}
