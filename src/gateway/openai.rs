//! OpenAI-Compatible Gateway
//!
//! Wraps a `/v1/chat/completions` endpoint. When the caller requests a
//! schema, the request opts into `response_format: json_object` and the
//! reply is decoded through the shared structured pipeline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::types::{
    ChatMessage, GenerateRequest, GenerateResponse, LlmGateway, TokenUsage,
};

use super::structured;
use super::GatewayError;

pub struct OpenAiGateway {
    api_url: String,
    api_key: String,
    model: String,
    http: Client,
}

impl OpenAiGateway {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            api_url,
            api_key,
            model,
            http: Client::new(),
        }
    }

    /// Build from `OPENAI_API_KEY`, defaulting to the public endpoint.
    pub fn from_env(model: String) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| GatewayError::Unauthorized(
                "OPENAI_API_KEY is not set. Export it or configure a different provider."
                    .to_string(),
            ))?;
        Ok(Self::new(
            "https://api.openai.com".to_string(),
            api_key,
            model,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn format_message(msg: &ChatMessage) -> Value {
    serde_json::json!({
        "role": msg.role,
        "content": msg.content,
    })
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let messages: Vec<Value> = request.messages.iter().map(format_message).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        // Provider-native structured mode; output is still validated below.
        if request.output_schema.is_some() {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let url = format!("{}/v1/chat/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(None, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::transport(Some(status.as_u16()), text).into());
        }

        let data: Value = resp
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let text = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let usage = TokenUsage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: data["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };

        let parsed = request
            .output_schema
            .as_ref()
            .and_then(|schema| structured::decode(&text, schema));

        Ok(GenerateResponse { text, parsed, usage })
    }
}
