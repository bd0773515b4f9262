//! Anthropic Gateway
//!
//! Wraps the Anthropic messages API. System messages are carried in the
//! separate `system` field; the reply's content blocks are joined and
//! decoded fence-tolerantly when a schema is requested.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::types::{
    ChatMessage, ChatRole, GenerateRequest, GenerateResponse, LlmGateway, TokenUsage,
};

use super::streaming::{self, StreamFormat};
use super::structured;
use super::GatewayError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicGateway {
    api_url: String,
    api_key: String,
    model: String,
    http: Client,
}

impl AnthropicGateway {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            api_url,
            api_key,
            model,
            http: Client::new(),
        }
    }

    pub fn from_env(model: String) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| GatewayError::Unauthorized(
                "ANTHROPIC_API_KEY is not set. Export it or configure a different provider."
                    .to_string(),
            ))?;
        Ok(Self::new(
            "https://api.anthropic.com".to_string(),
            api_key,
            model,
        ))
    }
}

/// Anthropic keeps the system prompt out of the message list.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system = None;
    let mut rest = Vec::new();

    for msg in messages {
        match msg.role {
            ChatRole::System => system = Some(msg.content.clone()),
            ChatRole::User => rest.push(serde_json::json!({
                "role": "user",
                "content": msg.content,
            })),
            ChatRole::Assistant => rest.push(serde_json::json!({
                "role": "assistant",
                "content": msg.content,
            })),
        }
    }

    (system, rest)
}

#[async_trait]
impl LlmGateway for AnthropicGateway {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let (system, messages) = split_system(&request.messages);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let url = format!("{}/v1/messages", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(None, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::transport(Some(status.as_u16()), text).into());
        }

        let raw = resp
            .text()
            .await
            .context("Failed to read Anthropic response body")?;

        let text = streaming::decode(StreamFormat::ContentArray, &raw);

        let usage = serde_json::from_str::<Value>(&raw)
            .ok()
            .map(|data| {
                let input = data["usage"]["input_tokens"].as_u64().unwrap_or(0);
                let output = data["usage"]["output_tokens"].as_u64().unwrap_or(0);
                TokenUsage {
                    prompt_tokens: input,
                    completion_tokens: output,
                    total_tokens: input + output,
                }
            })
            .unwrap_or_default();

        let parsed = request
            .output_schema
            .as_ref()
            .and_then(|schema| structured::decode(&text, schema));

        Ok(GenerateResponse { text, parsed, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system() {
        let messages = vec![
            ChatMessage::system("You judge answers."),
            ChatMessage::user("Is this polite?"),
            ChatMessage::assistant("Yes."),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("You judge answers."));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0]["role"], "user");
        assert_eq!(rest[1]["role"], "assistant");
    }
}
