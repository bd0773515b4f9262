//! HTTP Agent Adapter
//!
//! Drives an agent exposed over HTTP. Two request framings are
//! supported: `messages` (role/content array, the default) and
//! `legacy` (`{message, conversation_id}`). The adapter holds no
//! server-side session; prior turns are re-sent from the provided
//! conversation context.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use uuid::Uuid;

use crate::types::{
    AgentAdapter, AgentResponse, ConversationContext, HttpAdapterConfig, RequestFormat,
};

use super::response;

const SEND_TIMEOUT_SECS: u64 = 120;

pub struct HttpAdapter {
    config: HttpAdapterConfig,
    conversation_id: Mutex<String>,
    http: Client,
}

impl HttpAdapter {
    pub fn new(config: HttpAdapterConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            config,
            conversation_id: Mutex::new(Uuid::new_v4().to_string()),
            http,
        }
    }

    fn build_body(&self, message: &str, context: Option<&ConversationContext>) -> Value {
        let mut body = match self.config.request_format {
            RequestFormat::Messages => {
                let mut messages: Vec<Value> = context
                    .map(|ctx| {
                        ctx.turns
                            .iter()
                            .map(|t| {
                                serde_json::json!({"role": t.role, "content": t.content})
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                messages.push(serde_json::json!({"role": "user", "content": message}));
                serde_json::json!({"messages": messages})
            }
            RequestFormat::Legacy => serde_json::json!({
                "message": message,
                "conversation_id": self.conversation_id.lock().unwrap().clone(),
            }),
        };

        // A body template supplies extra static fields (model, flags);
        // the framing fields above take precedence.
        if let Some(Value::Object(template)) = self.config.body_template.as_ref() {
            if let Value::Object(ref mut map) = body {
                for (key, value) in template {
                    map.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        body
    }
}

#[async_trait]
impl AgentAdapter for HttpAdapter {
    async fn send(
        &self,
        message: &str,
        context: Option<&ConversationContext>,
    ) -> Result<AgentResponse> {
        let body = self.build_body(message, context);

        let mut request = self
            .http
            .post(&self.config.url)
            .header("Content-Type", "application/json");

        if let Some(headers) = &self.config.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        let started = Instant::now();
        let resp = request
            .json(&body)
            .send()
            .await
            .with_context(|| format!("agent request to {} failed", self.config.url))?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let raw = resp.text().await.context("failed to read agent response")?;
        let latency_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            anyhow::bail!("agent returned {}: {}", status.as_u16(), raw);
        }

        if content_type.contains("text/event-stream") {
            return response::from_sse_body(&raw, latency_ms);
        }
        if response::looks_like_data_stream(&raw) {
            return Ok(response::from_data_stream_body(&raw, latency_ms));
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(json) => Ok(response::from_json_body(json, latency_ms)),
            Err(_) => Ok(AgentResponse {
                text: raw,
                tool_calls: Vec::new(),
                latency_ms,
                token_usage: None,
                raw: None,
            }),
        }
    }

    async fn reset(&self) {
        *self.conversation_id.lock().unwrap() = Uuid::new_v4().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn config(format: RequestFormat) -> HttpAdapterConfig {
        HttpAdapterConfig {
            url: "http://localhost:9/chat".to_string(),
            headers: None,
            request_format: format,
            body_template: None,
            response_parser: None,
            streaming: None,
        }
    }

    #[test]
    fn test_messages_framing_includes_prior_turns() {
        let adapter = HttpAdapter::new(config(RequestFormat::Messages));
        let context = ConversationContext {
            turns: vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant("first answer"),
            ],
        };
        let body = adapter.build_body("second question", Some(&context));

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["content"], "second question");
    }

    #[test]
    fn test_legacy_framing() {
        let adapter = HttpAdapter::new(config(RequestFormat::Legacy));
        let body = adapter.build_body("hello", None);
        assert_eq!(body["message"], "hello");
        assert!(body["conversation_id"].as_str().unwrap().len() > 10);
    }

    #[tokio::test]
    async fn test_reset_rotates_conversation_id() {
        let adapter = HttpAdapter::new(config(RequestFormat::Legacy));
        let before = adapter.conversation_id.lock().unwrap().clone();
        adapter.reset().await;
        let after = adapter.conversation_id.lock().unwrap().clone();
        assert_ne!(before, after);
    }

    #[test]
    fn test_body_template_merged_without_overriding() {
        let mut cfg = config(RequestFormat::Legacy);
        cfg.body_template = Some(serde_json::json!({"model": "aut-v2", "message": "clobber"}));
        let adapter = HttpAdapter::new(cfg);
        let body = adapter.build_body("hi", None);
        assert_eq!(body["model"], "aut-v2");
        // The framing's own field wins over the template.
        assert_eq!(body["message"], "hi");
    }
}
