//! Agent Adapter
//!
//! Sends one user message to the agent under test and returns a
//! normalized `AgentResponse`. Only the HTTP adapter is built in; the
//! other config variants are declared for config compatibility and
//! rejected at construction.

pub mod http;
pub mod response;

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::types::{AdapterConfig, AgentAdapter};

pub use http::HttpAdapter;

/// Build an adapter from its config. Each call returns a fresh
/// instance, so concurrent scenarios never share adapter state.
pub fn build(config: &AdapterConfig) -> Result<Arc<dyn AgentAdapter>> {
    match config {
        AdapterConfig::Http(http_config) => {
            Ok(Arc::new(HttpAdapter::new(http_config.clone())))
        }
        AdapterConfig::Subprocess { command, .. } => {
            bail!("subprocess adapter ({}) is not supported by this runner", command)
        }
        AdapterConfig::OpenaiAssistant { assistant_id, .. } => {
            bail!(
                "openai-assistant adapter ({}) is not supported by this runner; \
                 use an http adapter in front of the assistant",
                assistant_id
            )
        }
        AdapterConfig::Custom { module } => {
            bail!("custom adapter module ({}) is not supported by this runner", module)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HttpAdapterConfig, RequestFormat};

    #[test]
    fn test_build_http() {
        let config = AdapterConfig::Http(HttpAdapterConfig {
            url: "http://localhost:3000/chat".to_string(),
            headers: None,
            request_format: RequestFormat::Messages,
            body_template: None,
            response_parser: None,
            streaming: None,
        });
        assert!(build(&config).is_ok());
    }

    #[test]
    fn test_build_unsupported_variants() {
        let config = AdapterConfig::Subprocess {
            command: "./agent".to_string(),
            args: Vec::new(),
            cwd: None,
        };
        assert!(build(&config).is_err());

        let config = AdapterConfig::Custom { module: "./custom.js".to_string() };
        assert!(build(&config).is_err());
    }

    #[test]
    fn test_adapter_config_tagged_serde() {
        let json = r#"{"type":"http","url":"http://x/chat","requestFormat":"legacy"}"#;
        let config: AdapterConfig = serde_json::from_str(json).unwrap();
        match config {
            AdapterConfig::Http(http) => {
                assert_eq!(http.request_format, RequestFormat::Legacy)
            }
            _ => panic!("expected http variant"),
        }
    }
}
