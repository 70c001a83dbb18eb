//! Local LLM replies through Ollama.
//!
//! The model is loaded once at startup ([`OllamaClient::connect`]); after
//! that every unmatched submission becomes one single-message chat request
//! against `/api/chat`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::InferenceConfig;
use crate::error::{InferenceError, InitError};

/// Text-generation backend.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Generate a reply to `prompt` using at most `max_tokens` output tokens.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError>;
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct OllamaClient {
    config: InferenceConfig,
    client: Client,
}

impl OllamaClient {
    /// Build the client and make sure the model is present and loaded.
    pub async fn connect(config: InferenceConfig) -> Result<Self, InitError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(InitError::Client)?;

        let this = Self { config, client };
        this.load().await.map_err(|source| InitError::Model {
            model: this.config.model.clone(),
            source,
        })?;
        Ok(this)
    }

    async fn load(&self) -> Result<(), InferenceError> {
        let t0 = Instant::now();
        info!("Loading model '{}' from {}", self.config.model, self.config.host);

        self.post("/api/show", &json!({ "model": self.config.model }))
            .await?;

        // An empty prompt loads the model into memory without generating
        self.post(
            "/api/generate",
            &json!({
                "model": self.config.model,
                "prompt": "",
                "stream": false,
                "keep_alive": "30m",
                "options": { "num_ctx": self.config.context_window }
            }),
        )
        .await?;

        info!(
            "Model loaded in {}ms (context window: {})",
            t0.elapsed().as_millis(),
            self.config.context_window
        );
        Ok(())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, InferenceError> {
        let url = format!("{}{path}", self.config.host);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, &self.config.host))?;

        if !resp.status().is_success() {
            return Err(InferenceError::Status(resp.status()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError> {
        debug!("Sending to model '{}': {prompt}", self.config.model);
        let t0 = Instant::now();

        let body = chat_body(&self.config, prompt, max_tokens);
        let resp = self.post("/api/chat", &body).await?;
        let raw = resp
            .text()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, &self.config.host))?;
        let reply = parse_reply(&raw)?;

        info!("Model replied in {}ms ({} chars)", t0.elapsed().as_millis(), reply.len());
        Ok(reply)
    }
}

fn chat_body(config: &InferenceConfig, prompt: &str, max_tokens: u32) -> Value {
    json!({
        "model": config.model,
        "messages": [{ "role": "user", "content": prompt }],
        "stream": false,
        "options": {
            "num_predict": max_tokens,
            "num_ctx": config.context_window
        }
    })
}

fn parse_reply(raw: &str) -> Result<String, InferenceError> {
    let data: ChatResponse =
        serde_json::from_str(raw).map_err(|e| InferenceError::Malformed(e.to_string()))?;
    let reply = data.message.content.trim();
    if reply.is_empty() {
        return Err(InferenceError::Empty);
    }
    Ok(reply.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_carries_prompt_and_budget() {
        let config = InferenceConfig::default();
        let body = chat_body(&config, "tell me a joke", 256);

        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "tell me a joke");
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["options"]["num_ctx"], 32768);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn reply_is_trimmed() {
        let raw = r#"{"model":"m","message":{"role":"assistant","content":"  Why not?\n"},"done":true}"#;
        assert_eq!(parse_reply(raw).unwrap(), "Why not?");
    }

    #[test]
    fn missing_message_is_malformed() {
        let err = parse_reply(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[test]
    fn blank_completion_is_an_error() {
        let raw = r#"{"message":{"role":"assistant","content":"   "}}"#;
        assert!(matches!(parse_reply(raw), Err(InferenceError::Empty)));
    }

    #[tokio::test]
    async fn unreachable_engine_is_fatal_at_startup() {
        let config = InferenceConfig {
            host: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
            ..InferenceConfig::default()
        };
        let err = OllamaClient::connect(config).await.err().unwrap();
        assert!(matches!(err, InitError::Model { .. }));
    }
}
