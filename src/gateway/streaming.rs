//! Stream Decoders
//!
//! The three streaming shapes providers hand back are modeled as a
//! tagged format with one decoder per variant. Each decoder folds a
//! complete response body into a single text by concatenating the text
//! deltas of the recognized event family; unknown events are ignored.

use serde_json::Value;

/// Recognized streaming wire formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamFormat {
    /// `text/event-stream` with `data:` lines (OpenAI deltas, Anthropic
    /// stream events, AI-SDK text-delta objects).
    Sse,
    /// AI-SDK data-stream protocol: `<digit>:<payload>` lines.
    DataStream,
    /// A single JSON document whose `content` is an array of typed
    /// parts (Anthropic messages response).
    ContentArray,
}

/// Decode a complete streamed body into one text.
pub fn decode(format: StreamFormat, body: &str) -> String {
    match format {
        StreamFormat::Sse => decode_sse(body),
        StreamFormat::DataStream => decode_data_stream(body),
        StreamFormat::ContentArray => decode_content_array(body),
    }
}

/// Pull the text delta out of one parsed SSE payload, if the payload
/// belongs to a recognized event family.
pub fn sse_payload_text(payload: &Value) -> Option<String> {
    // OpenAI chat-completions delta
    if let Some(delta) = payload
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        return Some(delta.to_string());
    }

    // Anthropic content_block_delta
    if payload.get("type").and_then(Value::as_str) == Some("content_block_delta") {
        if let Some(text) = payload.pointer("/delta/text").and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }

    // AI-SDK text-delta part
    if payload.get("type").and_then(Value::as_str) == Some("text-delta") {
        if let Some(text) = payload
            .get("textDelta")
            .or_else(|| payload.get("delta"))
            .and_then(Value::as_str)
        {
            return Some(text.to_string());
        }
    }

    None
}

fn decode_sse(body: &str) -> String {
    let mut out = String::new();

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
                if let Some(text) = sse_payload_text(&payload) {
                    out.push_str(&text);
                }
            }
            // Some servers stream plain text in data: lines.
            Err(_) => out.push_str(data),
        }
    }

    out
}

/// AI-SDK data-stream lines look like `0:"chunk"` or `8:{...}`. Only
/// prefix `0` carries text; every other prefix is ignored.
fn decode_data_stream(body: &str) -> String {
    let mut out = String::new();

    for line in body.lines() {
        let Some((prefix, payload)) = line.split_once(':') else {
            continue;
        };
        if prefix != "0" {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(Value::String(chunk)) => out.push_str(&chunk),
            Ok(_) => {}
            Err(_) => out.push_str(payload),
        }
    }

    out
}

fn decode_content_array(body: &str) -> String {
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        return String::new();
    };

    payload
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
