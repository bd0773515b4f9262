//! Response Normalization
//!
//! Agents under test answer in whatever shape their framework emits.
//! This module folds the three supported shapes -- JSON body, SSE, and
//! the AI-SDK data-stream protocol -- into one `AgentResponse`.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::gateway::streaming;
use crate::types::{AgentResponse, TokenUsage, ToolCall};

/// Keys tried in order when pulling text out of a JSON body.
const TEXT_KEYS: [&str; 4] = ["message", "text", "content", "response"];

/// Extract response text from a JSON body: first-hit among the common
/// keys, then the chat-completions path, then stringify the whole body.
pub fn extract_text(body: &Value) -> String {
    for key in TEXT_KEYS {
        if let Some(text) = body.get(key).and_then(Value::as_str) {
            return text.to_string();
        }
    }

    if let Some(text) = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return text.to_string();
    }

    body.to_string()
}

/// Extract tool calls from a top-level `tool_calls` array. Both the
/// OpenAI nested-function shape and flat `{name, arguments}` records
/// are accepted.
pub fn extract_tool_calls(body: &Value) -> Vec<ToolCall> {
    let Some(calls) = body.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };

    calls
        .iter()
        .filter_map(|call| {
            let name = call
                .pointer("/function/name")
                .or_else(|| call.get("name"))
                .and_then(Value::as_str)?
                .to_string();

            let arguments = call
                .pointer("/function/arguments")
                .or_else(|| call.get("arguments"))
                .cloned()
                .map(|v| match v {
                    // OpenAI serializes arguments as a JSON string.
                    Value::String(s) => {
                        serde_json::from_str(&s).unwrap_or(Value::String(s))
                    }
                    other => other,
                })
                .unwrap_or(Value::Null);

            Some(ToolCall { name, arguments })
        })
        .collect()
}

fn extract_usage(body: &Value) -> Option<TokenUsage> {
    let usage = body.get("usage")?;
    Some(TokenUsage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
    })
}

/// Normalize a parsed JSON body into an `AgentResponse`.
pub fn from_json_body(body: Value, latency_ms: u64) -> AgentResponse {
    AgentResponse {
        text: extract_text(&body),
        tool_calls: extract_tool_calls(&body),
        latency_ms,
        token_usage: extract_usage(&body),
        raw: Some(body),
    }
}

/// Returns the error message when an SSE payload is error-shaped:
/// `type: "error"`, or a top-level `error` / `errorText` field.
fn payload_error(payload: &Value) -> Option<String> {
    if payload.get("type").and_then(Value::as_str) == Some("error") {
        let msg = payload
            .pointer("/error/message")
            .or_else(|| payload.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("agent stream reported an error");
        return Some(msg.to_string());
    }
    if let Some(err) = payload.get("error") {
        return Some(match err.as_str() {
            Some(s) => s.to_string(),
            None => err.to_string(),
        });
    }
    if let Some(err) = payload.get("errorText").and_then(Value::as_str) {
        return Some(err.to_string());
    }
    None
}

/// Normalize an SSE body. An error-shaped payload fails the send.
pub fn from_sse_body(body: &str, latency_ms: u64) -> Result<AgentResponse> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(payload) => {
                if let Some(message) = payload_error(&payload) {
                    bail!("agent stream error: {}", message);
                }
                if let Some(delta) = streaming::sse_payload_text(&payload) {
                    text.push_str(&delta);
                }
                tool_calls.extend(extract_tool_calls(&payload));
            }
            Err(_) => text.push_str(data),
        }
    }

    Ok(AgentResponse {
        text,
        tool_calls,
        latency_ms,
        token_usage: None,
        raw: None,
    })
}

/// Normalize an AI-SDK data-stream body (`<digit>:<payload>` lines).
/// Prefix `0` carries text; every other prefix is ignored.
pub fn from_data_stream_body(body: &str, latency_ms: u64) -> AgentResponse {
    let text = streaming::decode(streaming::StreamFormat::DataStream, body);
    AgentResponse {
        text,
        tool_calls: Vec::new(),
        latency_ms,
        token_usage: None,
        raw: None,
    }
}

/// True when the body looks like the data-stream protocol rather than
/// JSON or SSE.
pub fn looks_like_data_stream(body: &str) -> bool {
    body.lines()
        .next()
        .map(|line| {
            let mut chars = line.chars();
            matches!(
                (chars.next(), chars.next()),
                (Some(d), Some(':')) if d.is_ascii_digit()
            )
        })
        .unwrap_or(false)
}
