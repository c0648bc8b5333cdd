//! Streaming relay between the upstream model and an SSE client.
//!
//! The relay's job is to make persistence independent of the client: the
//! upstream read loop runs in a spawned task that owns the response
//! accumulator, and the HTTP response only drains a bounded channel fed by
//! that task. If the client goes away mid-generation the task keeps reading
//! until upstream finishes, then writes the complete assistant message. The
//! happy path and the disconnect path run exactly the same code.

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::chat::{ChatStore, Role};
use crate::ollama::{OllamaClient, OllamaRequest, content_fragment};

/// Frames buffered between the upstream reader and the client. Bounded so a
/// slow client applies backpressure instead of growing memory; the size just
/// needs to absorb short bursts.
const CHANNEL_CAPACITY: usize = 32;

/// Start relaying a chat generation for `chat_id`.
///
/// Returns the stream of SSE frames to hand to the HTTP response. Dropping
/// the stream does not cancel the relay; the spawned task drains upstream to
/// completion and persists the accumulated assistant text either way.
pub fn spawn_relay(
    store: ChatStore,
    client: OllamaClient,
    chat_id: i64,
    request: OllamaRequest,
) -> ReceiverStream<Bytes> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(run_relay(store, client, chat_id, request, tx));
    ReceiverStream::new(rx)
}

async fn run_relay(
    store: ChatStore,
    client: OllamaClient,
    chat_id: i64,
    request: OllamaRequest,
    tx: mpsc::Sender<Bytes>,
) {
    let mut accumulated = String::new();
    let mut client_gone = false;

    match client.stream_chat(&request).await {
        Ok(mut lines) => {
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Upstream stream for chat {} failed: {}", chat_id, e);
                        break;
                    }
                };
                if line.is_empty() {
                    continue;
                }

                // Accumulate before sending so a fragment is never lost to a
                // failed send.
                if let Some(fragment) = content_fragment(&line) {
                    accumulated.push_str(&fragment);
                }

                if !client_gone && tx.send(sse_frame(&line)).await.is_err() {
                    debug!("Client for chat {} disconnected, draining upstream", chat_id);
                    client_gone = true;
                }
            }
        }
        Err(e) => {
            warn!("Could not open upstream stream for chat {}: {}", chat_id, e);
        }
    }

    finalize(&store, chat_id, &accumulated).await;
}

/// Encode one upstream line as an SSE data frame.
fn sse_frame(line: &str) -> Bytes {
    Bytes::from(format!("data: {line}\n\n"))
}

/// Persist the accumulated assistant text, if any.
///
/// Runs after every relay regardless of how it ended. Storage failures are
/// logged rather than surfaced; there is no client left to tell by the time
/// this runs.
async fn finalize(store: &ChatStore, chat_id: i64, accumulated: &str) {
    if accumulated.is_empty() {
        debug!("No assistant text for chat {}, nothing to persist", chat_id);
        return;
    }

    match store
        .append_message(chat_id, Role::Assistant, accumulated)
        .await
    {
        Ok(_) => debug!(
            "Persisted {} chars of assistant text for chat {}",
            accumulated.len(),
            chat_id
        ),
        Err(e) => error!(
            "Failed to persist assistant response for chat {}: {}",
            chat_id, e
        ),
    }
}
