//! Chat LLM access for the generation stage.

pub mod chat_stream;

pub use chat_stream::HttpChatClient;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Stream of incremental content deltas from the model.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capability to stream a chat completion.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream>;
}
