//! Upstream inference server: wire types and HTTP client.

pub mod client;
pub mod types;

pub use client::OllamaClient;
pub use types::{OllamaMessage, OllamaOptions, OllamaRequest, OllamaResponse, content_fragment};
