//! Conversation data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A turn written by the human side of the conversation.
    User,
    /// A turn produced by the model and committed by the relay.
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown message role: {}", s)),
        }
    }
}

// Implement conversion from String for SQLx
impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A conversation row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chat {
    /// Caller-assigned identifier.
    pub id: i64,
    /// Display title. Set lazily, so nullable.
    pub title: Option<String>,
}

/// One turn of a conversation, as stored and as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub content: String,
}

/// Outcome of creating a conversation with a caller-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The conversation was inserted.
    Created,
    /// A conversation with this id already existed; nothing changed.
    Exists,
}
