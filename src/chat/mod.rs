//! Conversation storage: models and the SQLite-backed store.

pub mod models;
pub mod repository;

pub use models::{Chat, ChatMessage, CreateOutcome, Role};
pub use repository::{ChatStore, parse_chat_id};
