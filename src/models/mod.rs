pub mod http;

use serde::Serialize;

use crate::error::GateResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
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

/// One chat completion call. `json_mode` asks the service for a single JSON object reply.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn json(model: &str, messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            messages,
            temperature,
            json_mode: true,
        }
    }
}

/// Text-generation service boundary. Returns the raw assistant message content.
pub trait ChatBackend {
    fn chat(&self, request: &ChatRequest) -> GateResult<String>;
}

impl<T: ChatBackend + ?Sized> ChatBackend for &T {
    fn chat(&self, request: &ChatRequest) -> GateResult<String> {
        (**self).chat(request)
    }
}

impl<T: ChatBackend + ?Sized> ChatBackend for Box<T> {
    fn chat(&self, request: &ChatRequest) -> GateResult<String> {
        (**self).chat(request)
    }
}
