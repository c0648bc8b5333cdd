//! Test utilities and common setup.

use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::response::Response;
use axum::routing::post;
use futures::StreamExt;

use rply::api::{self, AppState};
use rply::chat::ChatStore;
use rply::db::Database;
use rply::ollama::OllamaClient;

/// Model name used by tests; the fake upstream ignores it.
pub const TEST_MODEL: &str = "test-model";

/// Create a test application wired to the given upstream base URL.
pub async fn test_app_with_upstream(base_url: &str) -> Router {
    // Use in-memory database for tests
    let db = Database::in_memory().await.unwrap();
    let store = ChatStore::new(db.pool().clone());
    let ollama = OllamaClient::new(base_url).unwrap();

    let state = AppState::new(store, ollama, TEST_MODEL);
    api::create_router(state)
}

/// Create a test application with no upstream listening.
///
/// Port 1 on localhost is never bound, so relay attempts fail immediately
/// and tests exercise the degraded paths.
pub async fn test_app() -> Router {
    test_app_with_upstream("http://127.0.0.1:1").await
}

/// Serve the given NDJSON lines as a streaming chat response, with a short
/// delay per line so reads interleave with client behavior. Returns the base
/// URL of the listener.
pub async fn spawn_streaming_upstream(lines: Vec<String>) -> String {
    let app = Router::new().route(
        "/api/chat",
        post(move || {
            let lines = lines.clone();
            async move {
                let chunks = futures::stream::iter(
                    lines
                        .into_iter()
                        .map(|line| Ok::<_, std::io::Error>(Bytes::from(format!("{line}\n")))),
                )
                .then(|chunk| async {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    chunk
                });

                Response::builder()
                    .header("content-type", "application/x-ndjson")
                    .body(Body::from_stream(chunks))
                    .unwrap()
            }
        }),
    );

    serve_on_ephemeral_port(app).await
}

/// Serve a single non-streaming chat response carrying the given assistant
/// content. Returns the base URL of the listener.
pub async fn spawn_title_upstream(content: String) -> String {
    let app = Router::new().route(
        "/api/chat",
        post(move || {
            let content = content.clone();
            async move {
                axum::Json(serde_json::json!({
                    "message": {"role": "assistant", "content": content},
                    "done": true
                }))
            }
        }),
    );

    serve_on_ephemeral_port(app).await
}

async fn serve_on_ephemeral_port(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A streamed generation line carrying one content fragment.
pub fn fragment_line(text: &str) -> String {
    format!(r#"{{"message":{{"role":"assistant","content":"{text}"}},"done":false}}"#)
}

/// The final line of a streamed generation.
pub fn done_line() -> String {
    r#"{"message":{"role":"assistant","content":""},"done":true}"#.to_string()
}
