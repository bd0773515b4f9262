//! File Ranking
//!
//! One gateway call orders the tree by how likely each file is to
//! define the agent's behavior. When the model's answer does not fit
//! the schema (after one retry), a filename heuristic takes over; the
//! pipeline never stalls here.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::types::{ChatMessage, GenerateRequest, LlmGateway};

use super::files::Orientation;

/// Ranked output is capped at this many files.
pub const MAX_RANKED: usize = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankedFile {
    pub path: String,
    pub reason: String,
    pub priority: Priority,
}

fn ranking_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "files": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "reason": {"type": "string"},
                        "priority": {"type": "string", "enum": ["high", "medium", "low"]}
                    },
                    "required": ["path", "reason", "priority"]
                }
            }
        },
        "required": ["files"]
    })
}

fn ranking_prompt(orientation: &Orientation) -> String {
    let mut prompt = String::from(
        "Rank the files below by how likely they are to define a conversational \
         AI agent's behavior: its system prompt, tools, constraints, or model \
         configuration. Reply with JSON {\"files\": [{\"path\", \"reason\", \
         \"priority\": \"high\"|\"medium\"|\"low\"}]}, most important first, at \
         most 25 entries.\n\nFile tree:\n",
    );
    for file in &orientation.files {
        prompt.push_str(file);
        prompt.push('\n');
    }
    if let Some(readme) = &orientation.readme {
        prompt.push_str("\nREADME:\n");
        prompt.push_str(readme);
    }
    if let Some(manifest) = &orientation.manifest {
        prompt.push_str("\nManifest:\n");
        prompt.push_str(manifest);
    }
    prompt
}

/// Filename fallback: behavior-defining names rank high, entry points
/// medium, the rest low. Original tree order is preserved within each
/// band.
pub fn heuristic_rank(files: &[String]) -> Vec<RankedFile> {
    let high = Regex::new(r"(?i)(prompt|system|instruction|config|tool|agent)").unwrap();
    let medium = Regex::new(r"(?i)(route|handler|api|index|main)").unwrap();
    let readme = Regex::new(r"(?i)^readme").unwrap();

    let mut ranked: Vec<RankedFile> = files
        .iter()
        .map(|path| {
            let filename = path.rsplit('/').next().unwrap_or(path);
            let (priority, reason) = if readme.is_match(filename) {
                (Priority::High, "project readme")
            } else if high.is_match(filename) {
                (Priority::High, "behavior-defining filename")
            } else if medium.is_match(filename) {
                (Priority::Medium, "entry point or routing filename")
            } else {
                (Priority::Low, "no filename signal")
            };
            RankedFile {
                path: path.clone(),
                reason: reason.to_string(),
                priority,
            }
        })
        .collect();

    ranked.sort_by_key(|f| match f.priority {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    });
    ranked.truncate(MAX_RANKED);
    ranked
}

/// Rank via the gateway, retrying once on schema failure, then falling
/// back to the heuristic.
pub async fn rank_files(gateway: &dyn LlmGateway, orientation: &Orientation) -> Vec<RankedFile> {
    let request = GenerateRequest {
        messages: vec![
            ChatMessage::system(
                "You analyze repository file trees to locate agent-defining code.",
            ),
            ChatMessage::user(ranking_prompt(orientation)),
        ],
        output_schema: Some(ranking_schema()),
        temperature: Some(0.0),
        max_tokens: Some(2048),
    };

    for _attempt in 0..2 {
        match gateway.generate(request.clone()).await {
            Ok(reply) => {
                if let Some(parsed) = reply.parsed {
                    if let Ok(mut files) = serde_json::from_value::<Vec<RankedFile>>(
                        parsed.get("files").cloned().unwrap_or_default(),
                    ) {
                        // Only rank files that actually exist in the tree.
                        files.retain(|f| orientation.files.contains(&f.path));
                        if !files.is_empty() {
                            files.truncate(MAX_RANKED);
                            return files;
                        }
                    }
                }
            }
            Err(err) => {
                warn!("ranking call failed: {}", err);
                break;
            }
        }
    }

    warn!("falling back to heuristic file ranking");
    heuristic_rank(&orientation.files)
}
