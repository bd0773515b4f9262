//! Profile Persistence
//!
//! The discovered profile is cached at `<project>/.fabrik/agent-profile.json`
//! and re-read by later commands. A stale profile (older than 7 days)
//! loads with a warning.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::types::{AgentProfile, ProfileSource};

pub const PROFILE_DIR: &str = ".fabrik";
pub const PROFILE_FILE: &str = "agent-profile.json";
pub const STALE_AFTER_DAYS: i64 = 7;

pub fn profile_path(project_root: &Path) -> PathBuf {
    project_root.join(PROFILE_DIR).join(PROFILE_FILE)
}

/// The degraded discovery output: a 0.2-confidence shell carrying the
/// user's description hint, if any.
pub fn minimal_profile(source: ProfileSource, hint: Option<&str>) -> AgentProfile {
    let name = match &source {
        ProfileSource::RepoUrl { url } => url
            .rsplit('/')
            .next()
            .unwrap_or("unknown-agent")
            .trim_end_matches(".git")
            .to_string(),
        ProfileSource::LocalDir { path } => Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown-agent".to_string()),
        ProfileSource::HttpEndpoint { .. } => "http-agent".to_string(),
        ProfileSource::AssistantId { id } => id.clone(),
    };

    AgentProfile {
        discovered_at: Utc::now().to_rfc3339(),
        source,
        confidence: 0.2,
        name,
        description: hint.unwrap_or("No description discovered").to_string(),
        domain: "unknown".to_string(),
        tools: Vec::new(),
        system_prompt: None,
        model_info: None,
        known_constraints: Vec::new(),
        expected_tone: None,
        supported_languages: Vec::new(),
        max_turns: None,
        endpoint: None,
        codebase: None,
        evidence: Vec::new(),
    }
}

/// Write the profile as pretty JSON, creating `.fabrik/` if needed.
pub fn save_profile(project_root: &Path, profile: &AgentProfile) -> Result<PathBuf> {
    let path = profile_path(project_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(profile).context("failed to serialize profile")?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Read the cached profile. `None` when no profile exists; a parse
/// failure is an error (the file is corrupt, not merely absent).
pub fn load_profile(project_root: &Path) -> Result<Option<AgentProfile>> {
    let path = profile_path(project_root);
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let profile: AgentProfile =
        serde_json::from_str(&raw).with_context(|| format!("corrupt profile at {}", path.display()))?;

    if let Ok(discovered) = DateTime::parse_from_rfc3339(&profile.discovered_at) {
        if Utc::now().signed_duration_since(discovered) > Duration::days(STALE_AFTER_DAYS) {
            warn!(
                "profile at {} is older than {} days; consider re-running discovery",
                path.display(),
                STALE_AFTER_DAYS
            );
        }
    }

    Ok(Some(profile))
}
