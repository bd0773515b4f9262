//! Structured Output Decoding
//!
//! Best-effort decoding of model output against a caller-supplied JSON
//! schema: strip an optional markdown fence, parse, validate. Failure
//! at any step yields `None` -- callers decide whether to retry.

use serde_json::Value;
use tracing::debug;

/// Strip a single leading/trailing triple-backtick fence, with an
/// optional language tag (` ```json `), from the model output.
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the language tag on the opening line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse `text` as JSON (fence-tolerant) and validate it against
/// `schema`. Returns the parsed value only when validation succeeds.
pub fn decode(text: &str, schema: &Value) -> Option<Value> {
    let candidate = strip_fence(text);

    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(err) => {
            debug!("structured decode: not valid JSON: {}", err);
            return None;
        }
    };

    match jsonschema::validator_for(schema) {
        Ok(validator) => {
            if validator.is_valid(&value) {
                Some(value)
            } else {
                debug!("structured decode: output failed schema validation");
                None
            }
        }
        Err(err) => {
            debug!("structured decode: unusable schema: {}", err);
            None
        }
    }
}

/// Fence-tolerant JSON parse without schema validation. Used by judge
/// assertions, which validate fields themselves.
pub fn parse_lenient(text: &str) -> Option<Value> {
    serde_json::from_str(strip_fence(text)).ok()
}
