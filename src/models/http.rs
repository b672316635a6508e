//! OpenAI-compatible `/chat/completions` client over blocking reqwest.

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GateError, GateResult};
use crate::models::{ChatBackend, ChatMessage, ChatRequest};
use crate::textutil::excerpt;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub base_url: String,
    pub api_key_env: String,
    pub timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpChatBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpChatBackend {
    pub fn new(settings: &ServiceSettings) -> GateResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.timeout)
            .build()?;
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if api_key.is_none() {
            warn!(env = %settings.api_key_env, "api key not set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

impl ChatBackend for HttpChatBackend {
    fn chat(&self, request: &ChatRequest) -> GateResult<String> {
        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let t0 = Instant::now();
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }
        let resp = req.send()?;
        let status = resp.status();
        let text = resp.text()?;
        debug!(
            model = %request.model,
            status = %status,
            bytes = text.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "chat completion"
        );
        if !status.is_success() {
            return Err(GateError::ServiceCall(format!(
                "HTTP {status}: {}",
                excerpt(&text, 800)
            )));
        }
        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| GateError::parse("chat completion envelope", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GateError::ServiceCall("no choices in response".to_string()))
    }
}
