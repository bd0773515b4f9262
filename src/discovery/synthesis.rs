//! Profile Synthesis
//!
//! Folds the per-file extractions into one profile. The mechanical
//! parts (tool dedup, constraint union, evidence) are deterministic;
//! one gateway call judges the identity fields and overall confidence.
//! Conflicts resolve code over README over inference, explicit over
//! implicit, and the final confidence is bounded by the evidence.

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::types::{
    AgentProfile, ChatMessage, Evidence, GenerateRequest, LlmGateway, ModelInfo, ProfileSource,
};

use super::extract::FileExtraction;
use super::profile::minimal_profile;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisDoc {
    name: String,
    description: String,
    domain: String,
    expected_tone: Option<String>,
    #[serde(default)]
    supported_languages: Vec<String>,
    confidence: f64,
}

fn synthesis_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "description": {"type": "string"},
            "domain": {"type": "string"},
            "expectedTone": {"type": ["string", "null"]},
            "supportedLanguages": {"type": "array", "items": {"type": "string"}},
            "confidence": {"type": "number"}
        },
        "required": ["name", "description", "domain", "confidence"]
    })
}

/// Deterministic part of the merge: flatten findings, dedup tools by
/// name (first wins), union constraints, pick the first system prompt
/// and model config seen.
pub struct Aggregate {
    pub system_prompt: Option<String>,
    pub model_info: Option<ModelInfo>,
    pub constraints: Vec<String>,
    pub findings: Vec<String>,
}

pub fn aggregate(profile: &mut AgentProfile, extractions: &[FileExtraction]) -> Aggregate {
    let mut system_prompt = None;
    let mut model_info = None;
    let mut constraints: Vec<String> = Vec::new();
    let mut findings = Vec::new();

    for extraction in extractions {
        for tool in &extraction.tools {
            profile.merge_tool(tool.clone());
        }
        for constraint in &extraction.constraints {
            if !constraints.contains(constraint) {
                constraints.push(constraint.clone());
            }
        }
        if system_prompt.is_none() {
            system_prompt = extraction.system_prompt.clone();
        }
        if model_info.is_none() {
            model_info = extraction.model_config.clone();
        }
        findings.extend(extraction.findings.iter().cloned());
    }

    profile.system_prompt = system_prompt.clone();
    profile.model_info = model_info.clone();
    profile.known_constraints = constraints.clone();

    Aggregate { system_prompt, model_info, constraints, findings }
}

fn synthesis_prompt(
    readme: Option<&str>,
    extractions: &[FileExtraction],
    aggregate: &Aggregate,
    hint: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "Synthesize an identity for the agent described by the evidence below. \
         Resolution rules: facts from code override the README; both override \
         inference; explicit statements override implicit ones. Reply with JSON \
         {\"name\", \"description\", \"domain\", \"expectedTone\", \
         \"supportedLanguages\", \"confidence\" (0..1, your overall certainty)}.\n",
    );

    if let Some(hint) = hint {
        prompt.push_str(&format!("\nUser-provided description hint: {}\n", hint));
    }
    if let Some(readme) = readme {
        prompt.push_str(&format!("\nREADME (secondary source):\n{}\n", readme));
    }
    if let Some(system_prompt) = &aggregate.system_prompt {
        prompt.push_str(&format!(
            "\nSystem prompt found in code (primary source):\n{}\n",
            system_prompt
        ));
    }
    if !aggregate.constraints.is_empty() {
        prompt.push_str(&format!(
            "\nConstraints from code: {}\n",
            aggregate.constraints.join("; ")
        ));
    }

    let domains: Vec<&str> = extractions
        .iter()
        .filter_map(|e| e.domain.as_deref())
        .collect();
    if !domains.is_empty() {
        prompt.push_str(&format!("\nDomain signals from code: {}\n", domains.join(", ")));
    }

    if !aggregate.findings.is_empty() {
        prompt.push_str("\nFindings:\n");
        for finding in &aggregate.findings {
            prompt.push_str(&format!("- {}\n", finding));
        }
    }

    prompt
}

/// Produce the final profile from a codebase run. Synthesis failures
/// degrade to the deterministic aggregate; the pipeline always yields
/// a profile.
pub async fn synthesize(
    gateway: &dyn LlmGateway,
    source: ProfileSource,
    readme: Option<&str>,
    extractions: Vec<FileExtraction>,
    evidence: Vec<Evidence>,
    hint: Option<&str>,
    prior_confidence: f64,
) -> AgentProfile {
    let mut profile = minimal_profile(source, hint);
    let aggregate_summary = aggregate(&mut profile, &extractions);
    profile.evidence = evidence;
    profile.confidence = prior_confidence;

    let request = GenerateRequest {
        messages: vec![
            ChatMessage::system(
                "You synthesize agent profiles from discovery evidence. Be conservative: \
                 claim only what the evidence supports.",
            ),
            ChatMessage::user(synthesis_prompt(readme, &extractions, &aggregate_summary, hint)),
        ],
        output_schema: Some(synthesis_schema()),
        temperature: Some(0.0),
        max_tokens: Some(1024),
    };

    for _attempt in 0..2 {
        match gateway.generate(request.clone()).await {
            Ok(reply) => {
                if let Some(parsed) = reply.parsed {
                    if let Ok(doc) = serde_json::from_value::<SynthesisDoc>(parsed) {
                        profile.name = doc.name;
                        profile.description = doc.description;
                        profile.domain = doc.domain;
                        profile.expected_tone = doc.expected_tone;
                        profile.supported_languages = doc.supported_languages;
                        profile.confidence = doc.confidence.min(prior_confidence);
                        break;
                    }
                }
            }
            Err(err) => {
                warn!("synthesis call failed, keeping aggregate profile: {}", err);
                break;
            }
        }
    }

    profile.bound_confidence();
    profile
}
