//! Fabrik Configuration
//!
//! Loads and saves the project configuration from
//! `<project>/.fabrik/config.json`. String values of the form
//! `${env.NAME}` are expanded from the environment at load time, so
//! secrets stay out of the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::AdapterConfig;

const CONFIG_DIR: &str = ".fabrik";
const CONFIG_FILENAME: &str = "config.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatewayProvider {
    #[default]
    Openai,
    Anthropic,
    ChatgptSession,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub provider: GatewayProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: GatewayProvider::default(),
            model: default_model(),
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_scenario_dir")]
    pub scenario_dir: String,
    #[serde(default = "default_trace_db")]
    pub trace_db: String,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_parallelism() -> usize {
    1
}

fn default_scenario_dir() -> String {
    "fabrik-scenarios".to_string()
}

fn default_trace_db() -> String {
    ".fabrik/traces.db".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            parallelism: default_parallelism(),
            retries: 0,
            scenario_dir: default_scenario_dir(),
            trace_db: default_trace_db(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FabrikConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterConfig>,
    #[serde(default)]
    pub run: RunConfig,
}

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_DIR).join(CONFIG_FILENAME)
}

/// Expand `${env.NAME}` in every string of the tree. Unset variables
/// expand to the empty string.
fn expand_env(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix("${env.") {
                if let Some(name) = rest.strip_suffix('}') {
                    *s = std::env::var(name).unwrap_or_default();
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(expand_env),
        Value::Object(map) => map.values_mut().for_each(expand_env),
        _ => {}
    }
}

/// Load the config, merging defaults for missing fields. Returns
/// `None` when no config file exists or it cannot be parsed.
pub fn load_config(project_root: &Path) -> Option<FabrikConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return None;
    }

    let contents = std::fs::read_to_string(&path).ok()?;
    let mut raw: Value = serde_json::from_str(&contents).ok()?;
    expand_env(&mut raw);
    serde_json::from_value(raw).ok()
}

/// Save the config, creating `.fabrik/` if needed. Written with mode
/// 0o600 since it may carry API keys.
pub fn save_config(project_root: &Path, config: &FabrikConfig) -> Result<()> {
    let path = config_path(project_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &json)
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FabrikConfig::default();
        assert_eq!(config.gateway.model, "gpt-4o");
        assert_eq!(config.run.timeout_ms, 30_000);
        assert_eq!(config.run.parallelism, 1);
        assert_eq!(config.run.retries, 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FabrikConfig::default();
        config.gateway.model = "claude-sonnet-4-5".to_string();
        config.run.parallelism = 4;

        save_config(dir.path(), &config).unwrap();
        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded.gateway.model, "claude-sonnet-4-5");
        assert_eq!(loaded.run.parallelism, 4);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path()).is_none());
    }

    #[test]
    fn test_env_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "{\"gateway\": {\"apiKey\": \"${env.FABRIK_TEST_KEY}\"}}",
        )
        .unwrap();

        std::env::set_var("FABRIK_TEST_KEY", "sk-test-123");
        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded.gateway.api_key.as_deref(), Some("sk-test-123"));
        std::env::remove_var("FABRIK_TEST_KEY");
    }

    #[test]
    fn test_partial_config_merges_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"run\": {\"parallelism\": 8}}").unwrap();

        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded.run.parallelism, 8);
        assert_eq!(loaded.run.timeout_ms, 30_000);
        assert_eq!(loaded.gateway.model, "gpt-4o");
    }

    #[test]
    fn test_resolve_path_with_tilde() {
        let resolved = resolve_path("~/traces.db");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("traces.db"));
        assert_eq!(resolve_path("/abs/path"), "/abs/path");
    }
}
