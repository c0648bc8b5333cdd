//! Chat Relay Backend Library
//!
//! This library provides the core components for the chat relay backend:
//! conversation storage, the upstream inference client, and the streaming
//! relay that keeps transcripts complete even when clients disconnect.

pub mod api;
pub mod chat;
pub mod db;
pub mod ollama;
pub mod relay;
