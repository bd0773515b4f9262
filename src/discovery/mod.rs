//! Discovery Engine
//!
//! Builds an `AgentProfile` from one of four source kinds, with
//! decreasing prior confidence: assistant API (~0.9), repo or local
//! source (~0.7), HTTP probing (0.3-0.6). Whatever goes wrong, the
//! pipeline yields *some* profile -- minimally a 0.2-confidence shell
//! carrying the user's description hint.

pub mod extract;
pub mod files;
pub mod probe;
pub mod profile;
pub mod ranking;
pub mod synthesis;

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::HttpAdapter;
use crate::types::{
    AgentProfile, CodebaseInfo, DiscoveredTool, Evidence, EvidenceKind, HttpAdapterConfig,
    LlmGateway, ModelInfo, ProfileSource, RelevantFile, RequestFormat,
};

pub use files::{FileReader, LocalFileReader};
pub use profile::{load_profile, minimal_profile, save_profile};

/// Prior confidence by source kind.
pub const PRIOR_ASSISTANT: f64 = 0.9;
pub const PRIOR_CODEBASE: f64 = 0.7;

#[derive(Clone, Debug, Default)]
pub struct DiscoveryOptions {
    /// User-supplied description of the agent, used to annotate
    /// degraded profiles and steer synthesis.
    pub hint: Option<String>,
    /// Where `.fabrik/agent-profile.json` is written.
    pub project_root: PathBuf,
}

/// Run discovery against `source` and persist the resulting profile.
pub async fn discover(
    gateway: Arc<dyn LlmGateway>,
    source: ProfileSource,
    options: &DiscoveryOptions,
) -> Result<AgentProfile> {
    let hint = options.hint.as_deref();

    let profile = match &source {
        ProfileSource::LocalDir { path } => {
            let reader = Arc::new(LocalFileReader::new(path.clone()));
            run_codebase(gateway, reader, source.clone(), hint).await
        }
        ProfileSource::RepoUrl { url } => match clone_repo(url) {
            Ok(checkout) => {
                let reader = Arc::new(LocalFileReader::new(checkout.clone()));
                let profile = run_codebase(gateway, reader, source.clone(), hint).await;
                let _ = std::fs::remove_dir_all(&checkout);
                profile
            }
            Err(err) => {
                warn!("clone of {} failed: {}; emitting minimal profile", url, err);
                minimal_profile(source.clone(), hint)
            }
        },
        ProfileSource::HttpEndpoint { url } => {
            let adapter = HttpAdapter::new(HttpAdapterConfig {
                url: url.clone(),
                headers: None,
                request_format: RequestFormat::Messages,
                body_template: None,
                response_parser: None,
                streaming: None,
            });
            probe::probe_endpoint(&*gateway, &adapter, url, hint).await
        }
        ProfileSource::AssistantId { id } => match fetch_assistant(id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!("assistant fetch for {} failed: {}; emitting minimal profile", id, err);
                minimal_profile(source.clone(), hint)
            }
        },
    };

    let path = save_profile(&options.project_root, &profile)?;
    info!(
        "profile for '{}' written to {} (confidence {:.2})",
        profile.name,
        path.display(),
        profile.confidence
    );
    Ok(profile)
}

/// The codebase pipeline: orient, rank, extract, synthesize. Any stage
/// producing nothing drops through to the minimal profile.
async fn run_codebase(
    gateway: Arc<dyn LlmGateway>,
    reader: Arc<dyn FileReader>,
    source: ProfileSource,
    hint: Option<&str>,
) -> AgentProfile {
    let orientation = match files::orient(&*reader).await {
        Ok(orientation) if !orientation.files.is_empty() => orientation,
        Ok(_) => {
            warn!("no readable files found; emitting minimal profile");
            return minimal_profile(source, hint);
        }
        Err(err) => {
            warn!("orientation failed: {}; emitting minimal profile", err);
            return minimal_profile(source, hint);
        }
    };

    let ranked = ranking::rank_files(&*gateway, &orientation).await;
    let (extractions, mut evidence) =
        extract::extract_files(Arc::clone(&gateway), reader, &ranked).await;

    if let Some(readme) = &orientation.readme {
        evidence.push(Evidence {
            kind: EvidenceKind::Readme,
            source: "README".to_string(),
            finding: extract::truncate_content(readme),
            confidence: 0.5,
        });
    }
    if let Some(manifest_name) = &orientation.manifest_name {
        evidence.push(Evidence {
            kind: EvidenceKind::Manifest,
            source: manifest_name.clone(),
            finding: "manifest present".to_string(),
            confidence: 0.6,
        });
    }

    if evidence.iter().all(|e| e.kind == EvidenceKind::Failure) && extractions.is_empty() {
        warn!("no evidence produced; emitting minimal profile");
        return minimal_profile(source, hint);
    }

    let dependencies = files::manifest_dependencies(
        orientation.manifest_name.as_deref(),
        orientation.manifest.as_deref(),
    );

    let mut profile = synthesis::synthesize(
        &*gateway,
        source,
        orientation.readme.as_deref(),
        extractions,
        evidence,
        hint,
        PRIOR_CODEBASE,
    )
    .await;

    profile.codebase = Some(CodebaseInfo {
        framework: None,
        entry_point: None,
        relevant_files: ranked
            .iter()
            .map(|f| RelevantFile {
                path: f.path.clone(),
                role: f.reason.clone(),
                excerpt: None,
            })
            .collect(),
        dependencies,
    });

    profile
}

/// Shallow-clone a repository for local analysis.
fn clone_repo(url: &str) -> Result<PathBuf> {
    let checkout = std::env::temp_dir().join(format!("fabrik-clone-{}", Uuid::new_v4()));

    let output = Command::new("git")
        .args(["clone", "--depth", "1", url])
        .arg(&checkout)
        .output()
        .context("failed to invoke git")?;

    if !output.status.success() {
        anyhow::bail!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(checkout)
}

/// Fetch a structured assistant definition from the OpenAI assistants
/// API; the richest source, hence the highest prior.
async fn fetch_assistant(assistant_id: &str) -> Result<AgentProfile> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .context("OPENAI_API_KEY is required to fetch an assistant profile")?;

    let url = format!("https://api.openai.com/v1/assistants/{}", assistant_id);
    let resp = reqwest::Client::new()
        .get(&url)
        .bearer_auth(api_key)
        .header("OpenAI-Beta", "assistants=v2")
        .send()
        .await
        .context("assistant request failed")?;

    if !resp.status().is_success() {
        anyhow::bail!("assistant API returned {}", resp.status());
    }

    let data: Value = resp.json().await.context("unparseable assistant response")?;
    Ok(assistant_profile(assistant_id, &data))
}

/// Map an assistants-API object onto a profile.
fn assistant_profile(assistant_id: &str, data: &Value) -> AgentProfile {
    let source = ProfileSource::AssistantId { id: assistant_id.to_string() };
    let mut profile = minimal_profile(source, None);

    if let Some(name) = data["name"].as_str() {
        profile.name = name.to_string();
    }
    if let Some(description) = data["description"].as_str() {
        profile.description = description.to_string();
    }
    profile.system_prompt = data["instructions"].as_str().map(str::to_string);
    profile.model_info = data["model"].as_str().map(|m| ModelInfo {
        provider: Some("openai".to_string()),
        model: Some(m.to_string()),
    });

    if let Some(tools) = data["tools"].as_array() {
        for tool in tools {
            let (name, description, parameters) =
                if tool["type"].as_str() == Some("function") {
                    (
                        tool.pointer("/function/name").and_then(Value::as_str),
                        tool.pointer("/function/description")
                            .and_then(Value::as_str)
                            .unwrap_or(""),
                        tool.pointer("/function/parameters").cloned(),
                    )
                } else {
                    (tool["type"].as_str(), "built-in assistant tool", None)
                };
            if let Some(name) = name {
                profile.merge_tool(DiscoveredTool {
                    name: name.to_string(),
                    description: description.to_string(),
                    parameters,
                    citation: "assistants-api".to_string(),
                });
            }
        }
    }

    profile.evidence.push(Evidence {
        kind: EvidenceKind::AssistantApi,
        source: assistant_id.to_string(),
        finding: "assistant definition fetched from the assistants API".to_string(),
        confidence: PRIOR_ASSISTANT,
    });
    profile.confidence = PRIOR_ASSISTANT;
    profile.bound_confidence();
    profile
}
