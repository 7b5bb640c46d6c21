use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, Level};

use super::{LLMApi, LlmError};
use crate::prompt::ChatMessage;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "mixtral-8x7b-32768";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Clone)]
pub struct GroqConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// OpenAI-compatible root, `/chat/completions` is appended.
    pub base_url: String,
    /// `None` waits for the provider indefinitely.
    pub timeout: Option<Duration>,
}

impl GroqConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            base_url: GROQ_BASE_URL.to_string(),
            timeout: None,
        }
    }
}

impl std::fmt::Debug for GroqConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
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

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Groq chat-completions client (OpenAI wire format).
#[derive(Debug, Clone)]
pub struct GroqApi {
    config: GroqConfig,
    client: Client,
    endpoint: String,
}

impl GroqApi {
    pub fn new(config: GroqConfig) -> Result<Self, LlmError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            config,
            client,
            endpoint,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_body(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            stream: false,
        }
    }
}

/// Turn a raw provider reply into the completion text.
pub fn parse_completion(status: StatusCode, body: &str) -> Result<String, LlmError> {
    if !status.is_success() {
        let message = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(error) => error.error.message,
            Err(_) => body.trim().to_string(),
        };
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let response: ChatResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or(LlmError::EmptyResponse)
}

impl LLMApi for GroqApi {
    #[instrument(skip_all, level = Level::DEBUG, target = "groq_api::chat_completion")]
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let request = self.request_body(messages);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("completion status: {}, {} bytes", status, body.len());
        parse_completion(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> GroqApi {
        GroqApi::new(GroqConfig::new("gsk_test")).unwrap()
    }

    #[test]
    fn test_request_body() {
        let body = api().request_body(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
        ]);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "mixtral-8x7b-32768");
        assert_eq!(json["stream"], false);
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let mut config = GroqConfig::new("k");
        config.base_url = "http://127.0.0.1:9000/openai/v1/".to_string();
        let api = GroqApi::new(config).unwrap();
        assert_eq!(
            api.endpoint(),
            "http://127.0.0.1:9000/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_success() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"42"}}]}"#;
        assert_eq!(parse_completion(StatusCode::OK, body).unwrap(), "42");
    }

    #[test]
    fn test_parse_empty_choices() {
        let err = parse_completion(StatusCode::OK, r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[test]
    fn test_parse_provider_error() {
        let body = r#"{"error":{"message":"Invalid API Key","type":"invalid_request_error"}}"#;
        let err = parse_completion(StatusCode::UNAUTHORIZED, body).unwrap_err();
        assert_eq!(err.to_string(), "API error (401): Invalid API Key");
    }

    #[test]
    fn test_parse_raw_error_body() {
        let err = parse_completion(StatusCode::BAD_GATEWAY, "upstream down\n").unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 502, ref message } if message == "upstream down"));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_completion(StatusCode::OK, "<html>").unwrap_err();
        assert!(matches!(err, LlmError::Decode(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let line = format!("{:?}", GroqConfig::new("gsk_secret"));
        assert!(!line.contains("gsk_secret"));
    }
}
