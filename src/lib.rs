//! Streaming chat client for OpenAI-compatible chat-completion APIs.
//!
//! [`chat::ChatSession`] runs one turn at a time: it sends the whole
//! conversation through a [`model::ChatTransport`], decodes the
//! server-sent-event reply with [`model::stream`], publishes partial text as
//! it arrives, and commits the final reply to the history.

pub mod chat;
pub mod config;
pub mod error;
pub mod model;
pub mod web;

pub use error::{ChatError, Result};
