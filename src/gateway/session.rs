//! ChatGPT Session Gateway
//!
//! Rides an existing ChatGPT login instead of an API key: the bearer
//! token is read from `~/.codex/auth.json` and checked for expiry
//! before every call. Replies arrive as SSE; text is assembled from
//! `response.output_text.delta` and `response.content_part.delta`
//! events, with the final `response.completed` envelope as fallback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{GenerateRequest, GenerateResponse, LlmGateway, TokenUsage};

use super::structured;
use super::GatewayError;

const BACKEND_URL: &str = "https://chatgpt.com/backend-api/codex/responses";

#[derive(Debug, Deserialize)]
struct AuthFile {
    #[serde(default)]
    tokens: Option<AuthTokens>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthTokens {
    access_token: String,
    #[serde(default)]
    expires_at: Option<String>,
}

pub struct SessionGateway {
    auth_path: PathBuf,
    model: String,
    http: Client,
}

impl SessionGateway {
    pub fn new(model: String) -> Self {
        let auth_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/root"))
            .join(".codex/auth.json");
        Self {
            auth_path,
            model,
            http: Client::new(),
        }
    }

    #[cfg(test)]
    fn with_auth_path(auth_path: PathBuf, model: String) -> Self {
        Self {
            auth_path,
            model,
            http: Client::new(),
        }
    }

    /// Load the bearer token, rejecting missing or expired sessions
    /// with the actionable reauth error.
    fn load_token(&self) -> Result<String> {
        let raw = std::fs::read_to_string(&self.auth_path)
            .map_err(|_| GatewayError::reauth())?;
        let auth: AuthFile =
            serde_json::from_str(&raw).map_err(|_| GatewayError::reauth())?;

        let (token, expires_at) = match auth.tokens {
            Some(tokens) => (tokens.access_token, tokens.expires_at),
            None => match auth.access_token {
                Some(token) => (token, auth.expires_at),
                None => return Err(GatewayError::reauth().into()),
            },
        };

        if let Some(expiry) = expires_at {
            if let Ok(when) = DateTime::parse_from_rfc3339(&expiry) {
                if when <= Utc::now() {
                    return Err(GatewayError::reauth().into());
                }
            }
        }

        Ok(token)
    }
}

/// Fold the session SSE body into a single text. Delta events win;
/// when none were seen, fall back to the `response.completed` envelope.
fn decode_session_sse(body: &str) -> String {
    let mut out = String::new();
    let mut completed_fallback = None;

    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let Ok(payload) = serde_json::from_str::<Value>(data) else {
            continue;
        };

        match payload.get("type").and_then(Value::as_str) {
            Some("response.output_text.delta") | Some("response.content_part.delta") => {
                if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                    out.push_str(delta);
                }
            }
            Some("response.completed") => {
                completed_fallback = extract_completed_text(&payload);
            }
            _ => {}
        }
    }

    if out.is_empty() {
        completed_fallback.unwrap_or_default()
    } else {
        out
    }
}

fn extract_completed_text(payload: &Value) -> Option<String> {
    let outputs = payload.pointer("/response/output")?.as_array()?;
    let text: String = outputs
        .iter()
        .filter_map(|o| o.get("content").and_then(Value::as_array))
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl LlmGateway for SessionGateway {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let token = self.load_token()?;

        let input: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role,
                    "content": [{"type": "input_text", "text": m.content}],
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "input": input,
            "stream": true,
        });

        let resp = self
            .http
            .post(BACKEND_URL)
            .bearer_auth(&token)
            .header("Accept", "text/event-stream")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(None, e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 {
            return Err(GatewayError::reauth().into());
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::transport(Some(status.as_u16()), text).into());
        }

        let raw = resp
            .text()
            .await
            .context("Failed to read session response stream")?;

        let text = decode_session_sse(&raw);

        let parsed = request
            .output_schema
            .as_ref()
            .and_then(|schema| structured::decode(&text, schema));

        // The session transport does not report usage.
        Ok(GenerateResponse { text, parsed, usage: TokenUsage::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_session_deltas() {
        let body = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hel\"}\n\
                    data: {\"type\":\"response.content_part.delta\",\"delta\":\"lo\"}\n\
                    data: {\"type\":\"response.completed\",\"response\":{\"output\":[]}}\n";
        assert_eq!(decode_session_sse(body), "Hello");
    }

    #[test]
    fn test_decode_session_completed_fallback() {
        let body = "data: {\"type\":\"response.completed\",\"response\":{\"output\":[{\"content\":[{\"type\":\"output_text\",\"text\":\"full answer\"}]}]}}\n";
        assert_eq!(decode_session_sse(body), "full answer");
    }

    #[test]
    fn test_decode_session_unknown_events_ignored() {
        let body = "data: {\"type\":\"response.created\"}\ndata: not-json\n";
        assert_eq!(decode_session_sse(body), "");
    }

    #[test]
    fn test_load_token_missing_file() {
        let gateway = SessionGateway::with_auth_path(
            PathBuf::from("/nonexistent/auth.json"),
            "gpt-5".to_string(),
        );
        let err = gateway.load_token().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GatewayError>(),
            Some(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_load_token_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            "{\"tokens\":{\"access_token\":\"tok\",\"expires_at\":\"2000-01-01T00:00:00Z\"}}",
        )
        .unwrap();

        let gateway = SessionGateway::with_auth_path(path, "gpt-5".to_string());
        assert!(gateway.load_token().is_err());
    }

    #[test]
    fn test_load_token_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            "{\"tokens\":{\"access_token\":\"tok\",\"expires_at\":\"2099-01-01T00:00:00Z\"}}",
        )
        .unwrap();

        let gateway = SessionGateway::with_auth_path(path, "gpt-5".to_string());
        assert_eq!(gateway.load_token().unwrap(), "tok");
    }
}
