//! HTTP client for a local Ollama-compatible inference server.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use super::types::{OllamaRequest, OllamaResponse};

/// Upper bound on a single streamed line. Generation chunks are tiny; this
/// only guards against a misbehaving upstream.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Client for the upstream `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Build a client for the given base URL, e.g. `http://localhost:11434`.
    ///
    /// No overall request timeout is set: generation runs as long as the
    /// model needs. Callers that want a deadline pass one per request.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("building http client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Open a streaming chat request and return its body as a stream of
    /// newline-delimited JSON lines.
    ///
    /// The response status is deliberately not checked: upstream reports
    /// errors in the body, and the relay forwards whatever arrives.
    pub async fn stream_chat(
        &self,
        request: &OllamaRequest,
    ) -> Result<impl Stream<Item = Result<String, LinesCodecError>> + Send + Unpin> {
        let response = self
            .client
            .post(self.chat_url())
            .json(request)
            .send()
            .await
            .context("opening chat stream")?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let reader = StreamReader::new(bytes);

        Ok(FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        ))
    }

    /// Run a non-streaming chat request and decode the single response
    /// object. Used for short auxiliary generations such as titles.
    pub async fn chat_once(
        &self,
        request: &OllamaRequest,
        timeout: Duration,
    ) -> Result<OllamaResponse> {
        let response = self
            .client
            .post(self.chat_url())
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .context("sending chat request")?
            .error_for_status()
            .context("chat request rejected")?;

        response.json().await.context("decoding chat response")
    }
}
