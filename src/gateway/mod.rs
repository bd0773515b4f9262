//! LLM Gateway
//!
//! Structured generation against a provider, with schema-honoring
//! output as a best-effort capability: provider-native structured mode
//! when available, then fenced-JSON strip + parse + validate. Callers
//! see only `parsed: Option<Value>` and decide whether to retry.
//!
//! Transport and auth failures are typed so the CLI boundary can
//! recover them; parse failures never raise.

pub mod anthropic;
pub mod openai;
pub mod session;
pub mod streaming;
pub mod structured;

use thiserror::Error;

pub use anthropic::AnthropicGateway;
pub use openai::OpenAiGateway;
pub use session::SessionGateway;

/// Failures the gateway distinguishes beyond plain `anyhow` context.
/// Recovered with `downcast_ref` at the CLI boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error ({}): {message}", .status.map_or_else(|| "network".to_string(), |s| s.to_string()))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Session auth is expired or missing. The message is actionable.
    #[error("{0}")]
    Unauthorized(String),
}

impl GatewayError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        GatewayError::Transport { status, message: message.into() }
    }

    pub fn reauth() -> Self {
        GatewayError::Unauthorized(
            "ChatGPT session expired or unauthorized. Run `codex login` to refresh \
             ~/.codex/auth.json, then retry."
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_message() {
        let err = GatewayError::transport(Some(500), "upstream unavailable");
        assert!(err.to_string().contains("500"));

        let err = GatewayError::transport(None, "connection refused");
        assert!(err.to_string().contains("network"));
    }

    #[test]
    fn test_reauth_error_is_actionable() {
        let err = GatewayError::reauth();
        assert!(err.to_string().contains("codex login"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = GatewayError::reauth().into();
        assert!(matches!(
            err.downcast_ref::<GatewayError>(),
            Some(GatewayError::Unauthorized(_))
        ));
    }
}
