//! Application state shared across handlers.

use crate::chat::ChatStore;
use crate::ollama::OllamaClient;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Conversation store backing the chat endpoints.
    pub store: ChatStore,
    /// Client for the upstream inference server.
    pub ollama: OllamaClient,
    /// Model used when a request does not name one.
    pub default_model: String,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: ChatStore, ollama: OllamaClient, default_model: impl Into<String>) -> Self {
        Self {
            store,
            ollama,
            default_model: default_model.into(),
        }
    }
}
