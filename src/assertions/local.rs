//! Local Assertions
//!
//! Synchronous checks over a single `AgentResponse`. Each function
//! produces exactly one `AssertionResult` and never fails: bad input
//! (an invalid regex, unparseable JSON) becomes a failed result with
//! the diagnostic in `error`.

use regex::Regex;
use serde_json::Value;

use crate::types::{AgentResponse, AssertionKind, AssertionResult, TokenUsage};

fn result(kind: AssertionKind, passed: bool) -> AssertionResult {
    AssertionResult {
        kind,
        passed,
        expected: None,
        actual: None,
        reasoning: None,
        latency_ms: None,
        error: None,
    }
}

fn preview(text: &str) -> String {
    if text.len() <= 200 {
        return text.to_string();
    }
    let mut cut = 200;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Case-insensitive substring check.
pub fn contains(response: &AgentResponse, needle: &str) -> AssertionResult {
    let passed = response.text.to_lowercase().contains(&needle.to_lowercase());
    AssertionResult {
        expected: Some(format!("response contains \"{}\"", needle)),
        actual: Some(preview(&response.text)),
        ..result(AssertionKind::Contains, passed)
    }
}

pub fn not_contains(response: &AgentResponse, needle: &str) -> AssertionResult {
    let passed = !response.text.to_lowercase().contains(&needle.to_lowercase());
    AssertionResult {
        expected: Some(format!("response does not contain \"{}\"", needle)),
        actual: Some(preview(&response.text)),
        ..result(AssertionKind::NotContains, passed)
    }
}

pub fn matches(response: &AgentResponse, pattern: &str) -> AssertionResult {
    match Regex::new(pattern) {
        Ok(re) => AssertionResult {
            expected: Some(format!("response matches /{}/", pattern)),
            actual: Some(preview(&response.text)),
            ..result(AssertionKind::Matches, re.is_match(&response.text))
        },
        Err(err) => AssertionResult {
            expected: Some(format!("response matches /{}/", pattern)),
            error: Some(format!("invalid pattern: {}", err)),
            ..result(AssertionKind::Matches, false)
        },
    }
}

/// Parse the response text as JSON and validate against `schema`.
pub fn json_schema(response: &AgentResponse, schema: &Value) -> AssertionResult {
    let candidate = crate::gateway::structured::strip_fence(&response.text);
    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(err) => {
            return AssertionResult {
                expected: Some("response is schema-valid JSON".to_string()),
                actual: Some(preview(&response.text)),
                error: Some(format!("not valid JSON: {}", err)),
                ..result(AssertionKind::JsonSchema, false)
            }
        }
    };

    match jsonschema::validator_for(schema) {
        Ok(validator) => {
            let passed = validator.is_valid(&value);
            AssertionResult {
                expected: Some("response is schema-valid JSON".to_string()),
                actual: Some(preview(&response.text)),
                ..result(AssertionKind::JsonSchema, passed)
            }
        }
        Err(err) => AssertionResult {
            expected: Some("response is schema-valid JSON".to_string()),
            error: Some(format!("unusable schema: {}", err)),
            ..result(AssertionKind::JsonSchema, false)
        },
    }
}

pub fn latency(response: &AgentResponse, max_ms: u64) -> AssertionResult {
    AssertionResult {
        expected: Some(format!("latency <= {}ms", max_ms)),
        actual: Some(format!("{}ms", response.latency_ms)),
        latency_ms: Some(response.latency_ms),
        ..result(AssertionKind::Latency, response.latency_ms <= max_ms)
    }
}

pub fn token_usage(response: &AgentResponse, max_tokens: u64) -> AssertionResult {
    let used = response
        .token_usage
        .as_ref()
        .map(TokenUsage::clone)
        .unwrap_or_default()
        .total_tokens;
    let known = response.token_usage.is_some();
    AssertionResult {
        expected: Some(format!("token usage <= {}", max_tokens)),
        actual: Some(if known {
            format!("{} tokens", used)
        } else {
            "(usage not reported)".to_string()
        }),
        ..result(AssertionKind::TokenUsage, known && used <= max_tokens)
    }
}

pub fn tool_called(response: &AgentResponse, name: &str) -> AssertionResult {
    let passed = response.tool_calls.iter().any(|c| c.name == name);
    let actual = if response.tool_calls.is_empty() {
        "(no tools called)".to_string()
    } else {
        response
            .tool_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    AssertionResult {
        expected: Some(format!("tool \"{}\" called", name)),
        actual: Some(actual),
        ..result(AssertionKind::ToolCalled, passed)
    }
}

pub fn tool_not_called(response: &AgentResponse, name: &str) -> AssertionResult {
    let passed = !response.tool_calls.iter().any(|c| c.name == name);
    let actual = if response.tool_calls.is_empty() {
        "(no tools called)".to_string()
    } else {
        response
            .tool_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    AssertionResult {
        expected: Some(format!("tool \"{}\" not called", name)),
        actual: Some(actual),
        ..result(AssertionKind::ToolNotCalled, passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    fn response(text: &str) -> AgentResponse {
        AgentResponse {
            text: text.to_string(),
            tool_calls: Vec::new(),
            latency_ms: 120,
            token_usage: None,
            raw: None,
        }
    }

    #[test]
    fn test_contains_case_insensitive() {
        let r = response("Hello! How can I help?");
        assert!(contains(&r, "hello").passed);
        assert!(contains(&r, "HELP").passed);
        assert!(!contains(&r, "goodbye").passed);
    }

    #[test]
    fn test_contains_multibyte_response_does_not_panic() {
        // 200 bytes lands mid-character in a CJK response.
        let r = response(&"こんにちは、ご注文についてお手伝いします。".repeat(20));
        let result = contains(&r, "注文");
        assert!(result.passed);
        assert!(result.actual.as_deref().unwrap().ends_with("..."));
    }

    #[test]
    fn test_not_contains() {
        let r = response("We cannot share that.");
        assert!(not_contains(&r, "password").passed);
        assert!(!not_contains(&r, "cannot").passed);
    }

    #[test]
    fn test_matches_and_invalid_pattern() {
        let r = response("Order #12345 confirmed");
        assert!(matches(&r, r"#\d{5}").passed);

        let bad = matches(&r, "(unclosed");
        assert!(!bad.passed);
        assert!(bad.error.as_deref().unwrap().contains("invalid pattern"));
    }

    #[test]
    fn test_json_schema() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"status": {"type": "string"}},
            "required": ["status"]
        });
        assert!(json_schema(&response("{\"status\": \"ok\"}"), &schema).passed);
        assert!(!json_schema(&response("{\"status\": 1}"), &schema).passed);

        let not_json = json_schema(&response("plain words"), &schema);
        assert!(!not_json.passed);
        assert!(not_json.error.is_some());
    }

    #[test]
    fn test_latency() {
        let r = response("hi");
        assert!(latency(&r, 5000).passed);
        assert!(!latency(&r, 100).passed);
        assert_eq!(latency(&r, 100).latency_ms, Some(120));
    }

    #[test]
    fn test_token_usage_unreported_fails() {
        let mut r = response("hi");
        assert!(!token_usage(&r, 100).passed);

        r.token_usage = Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
        });
        assert!(token_usage(&r, 100).passed);
        assert!(!token_usage(&r, 10).passed);
    }

    #[test]
    fn test_tool_called_reports_no_tools() {
        let r = response("done");
        let result = tool_called(&r, "lookup_order");
        assert!(!result.passed);
        assert_eq!(result.actual.as_deref(), Some("(no tools called)"));
    }

    #[test]
    fn test_tool_called_and_not_called() {
        let mut r = response("done");
        r.tool_calls.push(ToolCall {
            name: "lookup_order".to_string(),
            arguments: serde_json::json!({"id": 1}),
        });

        assert!(tool_called(&r, "lookup_order").passed);
        assert!(!tool_called(&r, "initiate_refund").passed);
        assert!(tool_not_called(&r, "initiate_refund").passed);
        assert!(!tool_not_called(&r, "lookup_order").passed);
    }
}
