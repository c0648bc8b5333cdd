//! API request handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::chat::{ChatMessage, ChatStore, CreateOutcome, Role, parse_chat_id};
use crate::ollama::{OllamaMessage, OllamaOptions, OllamaRequest};
use crate::relay::spawn_relay;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Title given to conversations created implicitly by the chat endpoint.
const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// One conversation in the listing. Ids go over the wire as strings.
#[derive(Debug, Serialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: Option<String>,
}

/// List all conversations.
pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<Vec<ChatSummary>>> {
    let chats = state.store.list_chats().await?;
    let summaries = chats
        .into_iter()
        .map(|chat| ChatSummary {
            id: chat.id.to_string(),
            title: chat.title,
        })
        .collect();
    Ok(Json(summaries))
}

/// Get a conversation's messages.
///
/// Malformed and unknown ids both yield an empty list so clients can render
/// a fresh conversation without a create-first round trip.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let messages = state.store.get_messages(&chat_id).await?;
    Ok(Json(messages))
}

/// Request body for creating a conversation.
#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub id: String,
    pub title: String,
}

/// Mutation acknowledgement in the shape clients expect.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Create a conversation with a client-assigned id.
///
/// Creating an id that already exists is not an error; the response says
/// "exists" and the stored conversation is untouched.
pub async fn create_chat(
    State(state): State<AppState>,
    Json(request): Json<CreateChatRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let outcome = state.store.create_chat(&request.id, &request.title).await?;
    let status = match outcome {
        CreateOutcome::Created => "ok",
        CreateOutcome::Exists => "exists",
    };

    Ok(Json(StatusResponse {
        status,
        id: Some(request.id),
    }))
}

/// Request body for renaming a conversation.
#[derive(Debug, Deserialize)]
pub struct UpdateChatRequest {
    pub title: String,
}

/// Rename a conversation. Acknowledges even when the id matched nothing.
pub async fn update_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(request): Json<UpdateChatRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state.store.update_title(&chat_id, &request.title).await?;
    Ok(Json(StatusResponse {
        status: "updated",
        id: None,
    }))
}

/// Delete a conversation and its messages. Acknowledges even when the id
/// matched nothing.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    state.store.delete_chat(&chat_id).await?;
    Ok(Json(StatusResponse {
        status: "deleted",
        id: None,
    }))
}

/// Streamed chat request from the client.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<OllamaMessage>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Relay a chat turn to the model and stream the reply as SSE.
///
/// The conversation is prepared (created if needed, user turn recorded)
/// before the upstream request goes out. The streamed frames carry the
/// upstream lines verbatim; persistence of the assistant reply is handled by
/// the relay task and survives a client disconnect.
pub async fn relay_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Response> {
    let raw_id = match request.chat_id.as_deref() {
        None | Some("") => return Err(ApiError::bad_request("Chat ID required")),
        Some(raw) => raw,
    };
    let chat_id = parse_chat_id(raw_id)
        .ok_or_else(|| ApiError::bad_request("Invalid Chat ID"))?;

    prepare_turn(&state.store, chat_id, &request.messages).await;

    let model = request
        .model
        .unwrap_or_else(|| state.default_model.clone());
    info!("Relaying chat {} to model {}", chat_id, model);

    let upstream = OllamaRequest {
        model,
        messages: request.messages,
        stream: true,
        options: None,
    };

    let frames = spawn_relay(state.store.clone(), state.ollama.clone(), chat_id, upstream);
    let body = Body::from_stream(frames.map(Ok::<_, Infallible>));

    // Build SSE response with proper headers
    let response = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no") // Disable nginx buffering if present
        .body(body)
        .map_err(|e| ApiError::internal(format!("Failed to build SSE response: {e}")))?;

    Ok(response)
}

/// Make sure the conversation row exists and record the user's turn.
///
/// Runs before the relay starts. Failures here are logged and swallowed; a
/// broken bookkeeping write must not cost the user their generation.
async fn prepare_turn(store: &ChatStore, chat_id: i64, messages: &[OllamaMessage]) {
    if let Err(e) = store.ensure_chat(chat_id, DEFAULT_CHAT_TITLE).await {
        warn!("Could not ensure chat {} exists: {}", chat_id, e);
    }

    // Only the latest turn is new; earlier ones were recorded when they were
    // sent.
    if let Some(last) = messages.last() {
        if last.role == "user" {
            if let Err(e) = store.append_message(chat_id, Role::User, &last.content).await {
                warn!("Could not record user message for chat {}: {}", chat_id, e);
            }
        }
    }
}

/// System prompt for title generation. Small local models follow short
/// numbered rules far better than prose.
const TITLE_PROMPT: &str = "\
You write titles for chat conversations.
Read the user's message and reply with a short, specific title of 2-6 words.
Rules:
1. Capture what the message is actually about.
2. Plain text only. No quotes, no markup.
3. No greetings, dates, or emojis.
4. Reply with the title and nothing else.
";

const TITLE_TIMEOUT: Duration = Duration::from_secs(10);
const TITLE_TEMPERATURE: f32 = 0.3;

/// Request body for title generation.
#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub message: String,
}

/// Generated conversation title.
#[derive(Debug, Serialize)]
pub struct TitleResponse {
    pub title: String,
}

/// Generate a short conversation title from the user's first message.
///
/// This endpoint never fails: if the model is unreachable, times out, or
/// returns an error, the response falls back to an excerpt of the message.
pub async fn generate_title(
    State(state): State<AppState>,
    Json(request): Json<TitleRequest>,
) -> Json<TitleResponse> {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.default_model.clone());

    let upstream = OllamaRequest {
        model,
        messages: vec![
            OllamaMessage {
                role: "system".to_string(),
                content: TITLE_PROMPT.to_string(),
            },
            OllamaMessage {
                role: "user".to_string(),
                content: request.message.clone(),
            },
        ],
        stream: false,
        options: Some(OllamaOptions {
            temperature: Some(TITLE_TEMPERATURE),
        }),
    };

    let title = match state.ollama.chat_once(&upstream, TITLE_TIMEOUT).await {
        Ok(response) => {
            let raw = response.message.map(|m| m.content).unwrap_or_default();
            let cleaned = strip_quotes(&raw);
            if cleaned.is_empty() {
                "New Conversation".to_string()
            } else {
                cleaned
            }
        }
        Err(e) => {
            warn!("Title generation failed: {}", e);
            fallback_title(&request.message)
        }
    };

    Json(TitleResponse { title })
}

/// Models often wrap titles in quotes despite being told not to.
fn strip_quotes(raw: &str) -> String {
    raw.replace(['"', '\''], "").trim().to_string()
}

/// Excerpt of the user message, used when the model can't produce a title.
fn fallback_title(message: &str) -> String {
    let excerpt: String = message.chars().take(30).collect();
    format!("{excerpt}...")
}
