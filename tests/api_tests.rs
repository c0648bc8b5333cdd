//! API integration tests.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{done_line, fragment_line, test_app};

/// Fetch a chat's messages through the API.
async fn fetch_messages(app: &Router, chat_id: &str) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/chats/{}", chat_id))
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Poll until the chat contains an assistant message, then return it.
async fn wait_for_assistant(app: &Router, chat_id: &str) -> Value {
    for _ in 0..200 {
        let messages = fetch_messages(app, chat_id).await;
        if let Some(found) = messages
            .as_array()
            .and_then(|list| list.iter().find(|m| m["role"] == "assistant"))
        {
            return found.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("assistant message never persisted for chat {}", chat_id);
}

/// Test that health endpoint reports ok.
#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// ============================================================================
// Conversation Management Tests
// ============================================================================

/// Test creating a chat, listing it, and re-creating the same id.
#[tokio::test]
async fn test_create_and_list_chats() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "id": "42",
                        "title": "First"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["id"], "42");

    // Same id again: acknowledged as existing, stored title untouched
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "id": "42",
                        "title": "Second"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "exists");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!([{"id": "42", "title": "First"}]));
}

/// Test that creating a chat with a malformed id fails without side effects.
#[tokio::test]
async fn test_create_chat_malformed_id() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "id": "not-a-number",
                        "title": "Nope"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!([]));
}

/// Test that message reads tolerate unknown and malformed ids.
#[tokio::test]
async fn test_get_messages_tolerates_bad_ids() {
    let app = test_app().await;

    assert_eq!(fetch_messages(&app, "999").await, json!([]));
    assert_eq!(fetch_messages(&app, "not-a-number").await, json!([]));
}

/// Test renaming and deleting, including the tolerant no-op paths.
#[tokio::test]
async fn test_update_and_delete_chat() {
    let app = test_app().await;

    app.clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({"id": "7", "title": "Old"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats/7")
                .method(Method::PUT)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({"title": "Renamed"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "updated");

    // Renaming a malformed id is acknowledged and changes nothing
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats/not-a-number")
                .method(Method::PUT)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({"title": "Ignored"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!([{"id": "7", "title": "Renamed"}]));

    // Delete, then delete again: both acknowledged
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/chats/7")
                    .method(Method::DELETE)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "deleted");
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!([]));
}

// ============================================================================
// Chat Relay Tests
// ============================================================================

/// Test that the chat endpoint rejects missing and malformed chat ids
/// without touching storage.
#[tokio::test]
async fn test_chat_requires_valid_chat_id() {
    let app = test_app().await;

    for payload in [
        json!({"messages": [{"role": "user", "content": "hi"}]}),
        json!({"messages": [{"role": "user", "content": "hi"}], "chat_id": ""}),
        json!({"messages": [{"role": "user", "content": "hi"}], "chat_id": "abc"}),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/chat")
                    .method(Method::POST)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // No chat rows were created along the way
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!([]));
}

/// Test that the user's turn is recorded even when the upstream model is
/// unreachable, and that the conversation is created on first use.
#[tokio::test]
async fn test_chat_records_user_turn_when_upstream_is_down() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chat")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "messages": [{"role": "user", "content": "anyone there?"}],
                        "chat_id": "9"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    // The relay endpoint answers 200 and the stream simply ends
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    assert!(body.is_empty());

    let messages = fetch_messages(&app, "9").await;
    assert_eq!(
        messages,
        json!([{"role": "user", "content": "anyone there?"}])
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!([{"id": "9", "title": "New Chat"}]));
}

/// Test that a trailing assistant message is not recorded as a user turn.
#[tokio::test]
async fn test_chat_ignores_non_user_trailing_message() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chat")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "messages": [
                            {"role": "user", "content": "old turn"},
                            {"role": "assistant", "content": "old reply"}
                        ],
                        "chat_id": "11"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();

    assert_eq!(fetch_messages(&app, "11").await, json!([]));
}

/// Test that a connected client receives every upstream line verbatim as an
/// SSE frame and the full reply is persisted after the user turn.
#[tokio::test]
async fn test_chat_streams_raw_lines_and_persists_reply() {
    let lines = vec![fragment_line("Hel"), fragment_line("lo"), done_line()];
    let base_url = common::spawn_streaming_upstream(lines.clone()).await;
    let app = common::test_app_with_upstream(&base_url).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chat")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "messages": [{"role": "user", "content": "say hello"}],
                        "chat_id": "1"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let expected: String = lines.iter().map(|l| format!("data: {l}\n\n")).collect();
    assert_eq!(String::from_utf8(body.to_vec()).unwrap(), expected);

    let assistant = wait_for_assistant(&app, "1").await;
    assert_eq!(assistant["content"], "Hello");

    let messages = fetch_messages(&app, "1").await;
    assert_eq!(
        messages,
        json!([
            {"role": "user", "content": "say hello"},
            {"role": "assistant", "content": "Hello"}
        ])
    );
}

/// Test that a client disconnecting mid-stream does not truncate the stored
/// reply: the relay drains upstream and persists the whole response once.
#[tokio::test]
async fn test_disconnect_mid_stream_persists_full_response() {
    let mut lines: Vec<String> = (0..55).map(|i| fragment_line(&format!("tok{i} "))).collect();
    lines.push(done_line());
    let expected: String = (0..55).map(|i| format!("tok{i} ")).collect();

    let base_url = common::spawn_streaming_upstream(lines).await;
    let app = common::test_app_with_upstream(&base_url).await;

    app.clone()
        .oneshot(
            Request::builder()
                .uri("/api/chats")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({"id": "123456", "title": "Long answer"}))
                        .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chat")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "messages": [{"role": "user", "content": "write at length"}],
                        "chat_id": "123456"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // Read a handful of frames, then hang up
    let mut body = response.into_body();
    for _ in 0..5 {
        let frame = body.frame().await.expect("stream ended early").unwrap();
        assert!(frame.is_data());
    }
    drop(body);

    let assistant = wait_for_assistant(&app, "123456").await;
    assert_eq!(assistant["content"], Value::String(expected));

    // Exactly one assistant row: the user turn plus the full reply
    let messages = fetch_messages(&app, "123456").await;
    let roles: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "assistant"]);
}

/// Test that a stream carrying no content fragments leaves no assistant row.
#[tokio::test]
async fn test_chat_with_empty_stream_persists_nothing() {
    let lines = vec![
        r#"{"error": "model failed to load"}"#.to_string(),
        done_line(),
    ];
    let base_url = common::spawn_streaming_upstream(lines).await;
    let app = common::test_app_with_upstream(&base_url).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chat")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "messages": [{"role": "user", "content": "hi"}],
                        "chat_id": "3"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    // The client still sees the raw lines, error payload included
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    assert!(String::from_utf8(body.to_vec())
        .unwrap()
        .contains("model failed to load"));

    // Give the relay a moment to finish, then confirm only the user turn
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        fetch_messages(&app, "3").await,
        json!([{"role": "user", "content": "hi"}])
    );
}

// ============================================================================
// Title Generation Tests
// ============================================================================

/// Test title generation from a working model.
#[tokio::test]
async fn test_generate_title() {
    let base_url = common::spawn_title_upstream("\"Rust Borrow Checker\"".to_string()).await;
    let app = common::test_app_with_upstream(&base_url).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/generate_title")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "message": "why does the borrow checker reject this?"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["title"], "Rust Borrow Checker");
}

/// Test that an empty model answer falls back to the default title.
#[tokio::test]
async fn test_generate_title_empty_answer() {
    let base_url = common::spawn_title_upstream("  \"\"  ".to_string()).await;
    let app = common::test_app_with_upstream(&base_url).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/generate_title")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({"message": "hello"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["title"], "New Conversation");
}

/// Test that an unreachable model yields the excerpt fallback, not an error.
#[tokio::test]
async fn test_generate_title_falls_back_when_upstream_is_down() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/generate_title")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "message": "summarize the quarterly report for me please"
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["title"], "summarize the quarterly report...");
}
