//! Folding of agent events into a single renderable response.
//!
//! [`process`] is the buffered entry point; [`ResponseAccumulator`] applies
//! events one at a time for streaming callers. Both produce a
//! [`ProcessedResponse`], rebuilt from scratch for every reduction.

pub mod artifact;
pub mod mime;
pub mod reducer;

pub use artifact::{decode_inline_image, ArtifactError, ArtifactSource, ImageArtifact};
pub use reducer::{process, ResponseAccumulator};

use crate::agent::types::UsageMetadata;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedResponse {
    /// User-visible text; thoughts are excluded.
    pub text_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Artifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_activity: Option<ToolActivity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_activity: Option<Vec<CodeBlock>>,
    pub metadata: ResponseMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Artifacts {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageArtifact>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub uri: String,
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolActivity {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<ToolResponse>,
}

impl ToolActivity {
    /// Pair each call with its response: by `id` when the call has one and a
    /// response carries the same id, otherwise by position.
    pub fn pairs(&self) -> Vec<(&ToolCall, Option<&ToolResponse>)> {
        self.calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let by_id = call.id.as_deref().and_then(|id| {
                    self.responses
                        .iter()
                        .find(|r| r.id.as_deref() == Some(id))
                });
                (call, by_id.or_else(|| self.responses.get(index)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub name: String,
    pub result: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    pub code: String,
    pub language: String,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub has_thoughts: bool,
    pub turn_complete: bool,
    pub interrupted: bool,
    pub has_errors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub state_delta: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub artifact_delta: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, id: Option<&str>) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args: Map::new(),
            id: id.map(str::to_string),
        }
    }

    fn response(name: &str, id: Option<&str>) -> ToolResponse {
        ToolResponse {
            name: name.to_string(),
            result: Map::new(),
            id: id.map(str::to_string),
        }
    }

    #[test]
    fn test_pairs_by_id_then_position() {
        let activity = ToolActivity {
            calls: vec![call("a", Some("1")), call("b", Some("2")), call("c", None)],
            responses: vec![
                response("b", Some("2")),
                response("a", Some("1")),
                response("c", None),
            ],
        };

        let pairs = activity.pairs();
        assert_eq!(pairs[0].1.unwrap().name, "a");
        assert_eq!(pairs[1].1.unwrap().name, "b");
        assert_eq!(pairs[2].1.unwrap().name, "c");
    }

    #[test]
    fn test_pairs_without_response() {
        let activity = ToolActivity {
            calls: vec![call("a", None)],
            responses: vec![],
        };
        assert!(activity.pairs()[0].1.is_none());
    }

    #[test]
    fn test_empty_response_serialization() {
        let json = serde_json::to_value(ProcessedResponse::default()).unwrap();
        assert_eq!(
            json,
            json!({
                "textContent": "",
                "metadata": {
                    "hasThoughts": false,
                    "turnComplete": false,
                    "interrupted": false,
                    "hasErrors": false
                }
            })
        );
    }
}
