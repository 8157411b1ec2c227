//! Agent backend event payloads shared by the buffered and streaming modes.
//!
//! `Part` is a struct of optional fields rather than an enum: the wire format
//! allows several payload kinds on one part and each present field is handled
//! independently.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Content container used in both requests and events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Marks `text` as internal reasoning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_code: Option<ExecutableCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_execution_result: Option<CodeExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_metadata: Option<VideoMetadata>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_thought(&self) -> bool {
        self.thought.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub will_continue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
}

/// How a non-blocking function response should be surfaced to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheduling {
    #[serde(rename = "SCHEDULING_UNSPECIFIED", alias = "UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "SILENT")]
    Silent,
    #[serde(rename = "WHEN_IDLE")]
    WhenIdle,
    #[serde(rename = "INTERRUPT")]
    Interrupt,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutableCode {
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Base64 inline payload (images, audio) embedded in a part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_uri: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<String>,
}

/// Side effects an agent attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_delta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_delta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
}

/// One decoded event from the agent backend.
///
/// `turnComplete` and `turn_complete` are both accepted on the wire and folded
/// into [`Event::turn_complete`] during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireEvent")]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<EventActions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub partial: bool,
    pub turn_complete: bool,
    pub interrupted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Event {
    pub fn parts(&self) -> &[Part] {
        self.content
            .as_ref()
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_error(&self) -> bool {
        self.error_code.is_some() || self.error_message.is_some()
    }

    /// Convenience constructor for a single text part.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            content: Some(Content {
                parts: vec![Part::text(text)],
                role: Some("model".to_string()),
            }),
            ..Self::default()
        }
    }
}

/// Raw wire shape; keeps both turn-complete spellings apart so an event that
/// carries both does not trip serde's duplicate-field check.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    actions: Option<EventActions>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    invocation_id: Option<String>,
    #[serde(default)]
    partial: Option<bool>,
    #[serde(default, rename = "turnComplete")]
    turn_complete_camel: Option<bool>,
    #[serde(default, rename = "turn_complete")]
    turn_complete_snake: Option<bool>,
    #[serde(default)]
    interrupted: Option<bool>,
    #[serde(default, deserialize_with = "string_or_number")]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        Self {
            content: wire.content,
            author: wire.author,
            actions: wire.actions,
            usage_metadata: wire.usage_metadata,
            invocation_id: wire.invocation_id,
            partial: wire.partial.unwrap_or(false),
            turn_complete: wire.turn_complete_camel.unwrap_or(false)
                || wire.turn_complete_snake.unwrap_or(false),
            interrupted: wire.interrupted.unwrap_or(false),
            error_code: wire.error_code,
            error_message: wire.error_message,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_complete_aliases() {
        let camel: Event = serde_json::from_value(json!({ "turnComplete": true })).unwrap();
        let snake: Event = serde_json::from_value(json!({ "turn_complete": true })).unwrap();
        let both: Event =
            serde_json::from_value(json!({ "turnComplete": false, "turn_complete": true }))
                .unwrap();

        assert!(camel.turn_complete);
        assert!(snake.turn_complete);
        assert!(both.turn_complete);
    }

    #[test]
    fn test_empty_object_is_a_valid_event() {
        let event: Event = serde_json::from_str("{}").unwrap();
        assert_eq!(event, Event::default());
        assert!(event.parts().is_empty());
    }

    #[test]
    fn test_numeric_error_code_is_stringified() {
        let event: Event =
            serde_json::from_value(json!({ "errorCode": 429, "errorMessage": "quota" })).unwrap();
        assert_eq!(event.error_code.as_deref(), Some("429"));
        assert!(event.has_error());
    }

    #[test]
    fn test_part_with_multiple_payloads() {
        let part: Part = serde_json::from_value(json!({
            "text": "see chart",
            "inlineData": { "data": "AAAA", "mimeType": "image/png" },
            "functionCall": { "name": "plot", "args": { "kind": "bar" }, "id": "c1" }
        }))
        .unwrap();

        assert_eq!(part.text.as_deref(), Some("see chart"));
        assert_eq!(part.inline_data.unwrap().mime_type, "image/png");
        assert_eq!(part.function_call.unwrap().id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_scheduling_values() {
        let resp: FunctionResponse = serde_json::from_value(json!({
            "name": "lookup",
            "willContinue": true,
            "scheduling": "WHEN_IDLE"
        }))
        .unwrap();
        assert_eq!(resp.scheduling, Some(Scheduling::WhenIdle));

        let short: Scheduling = serde_json::from_value(json!("UNSPECIFIED")).unwrap();
        assert_eq!(short, Scheduling::Unspecified);

        let unknown: Scheduling = serde_json::from_value(json!("SOMETHING_NEW")).unwrap();
        assert_eq!(unknown, Scheduling::Unknown);
    }

    #[test]
    fn test_text_part_serializes_without_empty_fields() {
        let json = serde_json::to_value(Part::text("hi")).unwrap();
        assert_eq!(json, json!({ "text": "hi" }));
    }
}
