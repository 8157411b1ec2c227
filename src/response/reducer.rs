use super::artifact::decode_inline_image;
use super::{
    Artifacts, CodeBlock, FileReference, ImageArtifact, ProcessedResponse, ResponseMetadata,
    ToolActivity, ToolCall, ToolResponse,
};
use crate::agent::types::{Event, Part, UsageMetadata};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Map;

static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("static newline pattern"));

const UNKNOWN_LANGUAGE: &str = "unknown";
const UNKNOWN_FILE: &str = "Unknown File";

/// Reduce an ordered event sequence into a [`ProcessedResponse`].
///
/// Partial events are skipped unless `include_partial` is set.
pub fn process<'a, I>(events: I, include_partial: bool) -> ProcessedResponse
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .fold(ResponseAccumulator::new(include_partial), |mut acc, event| {
            acc.apply(event);
            acc
        })
        .finish()
}

/// Accumulator state for one reduction.
#[derive(Debug, Clone, Default)]
pub struct ResponseAccumulator {
    include_partial: bool,
    texts: Vec<String>,
    images: Vec<ImageArtifact>,
    files: Vec<FileReference>,
    calls: Vec<ToolCall>,
    responses: Vec<ToolResponse>,
    code: Vec<CodeBlock>,
    metadata: ResponseMetadata,
    usage: Option<UsageMetadata>,
    applied: usize,
}

impl ResponseAccumulator {
    pub fn new(include_partial: bool) -> Self {
        Self {
            include_partial,
            ..Self::default()
        }
    }

    /// Number of events folded in so far (skipped partials excluded).
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Fold one event in. Returns `false` when the event was skipped.
    pub fn apply(&mut self, event: &Event) -> bool {
        if event.partial && !self.include_partial {
            return false;
        }
        self.applied += 1;

        if event.turn_complete {
            self.metadata.turn_complete = true;
        }
        if event.interrupted {
            self.metadata.interrupted = true;
        }
        if event.has_error() {
            self.metadata.has_errors = true;
            self.metadata.error_message = event
                .error_message
                .clone()
                .or_else(|| event.error_code.clone());
        }

        if let Some(author) = &event.author {
            self.metadata.author = Some(author.clone());
        }
        if let Some(invocation_id) = &event.invocation_id {
            self.metadata.invocation_id = Some(invocation_id.clone());
        }
        if let Some(usage) = &event.usage_metadata {
            self.usage = Some(usage.clone());
        }
        if let Some(actions) = &event.actions {
            if let Some(delta) = &actions.state_delta {
                self.metadata
                    .state_delta
                    .extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            if let Some(delta) = &actions.artifact_delta {
                self.metadata
                    .artifact_delta
                    .extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        for part in event.parts() {
            self.apply_part(part);
        }
        true
    }

    fn apply_part(&mut self, part: &Part) {
        if let Some(text) = &part.text {
            if part.is_thought() {
                self.metadata.has_thoughts = true;
            } else {
                self.texts.push(text.clone());
            }
        }

        if let Some(call) = &part.function_call {
            self.calls.push(ToolCall {
                name: call.name.clone(),
                args: call.args.clone().unwrap_or_default(),
                id: call.id.clone(),
            });
        }

        if let Some(response) = &part.function_response {
            self.responses.push(ToolResponse {
                name: response.name.clone(),
                result: response.response.clone().unwrap_or_else(Map::new),
                id: response.id.clone(),
            });
        }

        if let Some(code) = &part.executable_code {
            self.code.push(CodeBlock {
                code: code.code.clone(),
                language: code
                    .language
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
                result: None,
            });
        }

        if let Some(result) = &part.code_execution_result {
            let value = result.output.clone().or_else(|| result.outcome.clone());
            match self.code.last_mut() {
                Some(last) => last.result = value,
                None => self.code.push(CodeBlock {
                    code: String::new(),
                    language: UNKNOWN_LANGUAGE.to_string(),
                    result: value,
                }),
            }
        }

        if let Some(inline) = &part.inline_data {
            if inline.mime_type.starts_with("image/") {
                match decode_inline_image(inline) {
                    Ok(artifact) => self.images.push(artifact),
                    Err(e) => tracing::warn!(
                        "Dropping inline {} artifact: {}",
                        inline.mime_type,
                        e
                    ),
                }
            } else {
                tracing::debug!("Ignoring non-image inline data ({})", inline.mime_type);
            }
        }

        if let Some(file) = &part.file_data {
            self.files.push(FileReference {
                uri: file.file_uri.clone(),
                name: file
                    .display_name
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_FILE.to_string()),
                mime_type: file.mime_type.clone(),
            });
        }
    }

    /// The response as it stands, leaving the accumulator usable.
    pub fn snapshot(&self) -> ProcessedResponse {
        self.clone().finish()
    }

    pub fn finish(self) -> ProcessedResponse {
        let artifacts = (!self.images.is_empty() || !self.files.is_empty()).then(|| Artifacts {
            images: self.images,
            files: self.files,
        });
        let tool_activity =
            (!self.calls.is_empty() || !self.responses.is_empty()).then(|| ToolActivity {
                calls: self.calls,
                responses: self.responses,
            });
        let code_activity = (!self.code.is_empty()).then_some(self.code);

        ProcessedResponse {
            text_content: normalize_text(&self.texts),
            artifacts,
            tool_activity,
            code_activity,
            metadata: self.metadata,
            usage: self.usage,
        }
    }
}

/// Join text segments with a blank line, trim every line, collapse runs of
/// three or more newlines to two and trim the result.
fn normalize_text(segments: &[String]) -> String {
    let joined = segments.join("\n\n");
    let trimmed = joined.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    EXCESS_NEWLINES
        .replace_all(&trimmed, "\n\n")
        .trim()
        .to_string()
}
