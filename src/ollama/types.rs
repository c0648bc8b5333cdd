//! Wire types for the Ollama chat API.

use serde::{Deserialize, Serialize};

/// A single turn in the upstream conversation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    pub content: String,
}

/// Sampling options forwarded to the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
}

/// One chunk of a streamed chat response, or the whole body when not
/// streaming. Unknown fields are ignored so the relay stays compatible with
/// newer upstream versions.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaResponse {
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub done: bool,
}

/// Extract the assistant text carried by one streamed response line.
///
/// Lines that are not valid JSON, carry no message, or carry an empty
/// fragment all yield `None`. Upstream error payloads carry no message, so a
/// failed generation accumulates nothing.
pub fn content_fragment(line: &str) -> Option<String> {
    let chunk: OllamaResponse = serde_json::from_str(line).ok()?;
    let content = chunk.message?.content;
    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}
