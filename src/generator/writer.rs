//! Scenario Writer
//!
//! One gateway call per scenario produces a declarative scenario
//! record, which is validated and rendered as a YAML artifact. Working
//! on records instead of generated test source turns the old sanitizer
//! into a validator: disallowed assertion kinds are dropped at parse
//! time, and every surviving assertion is awaited by construction when
//! the runner compiles the record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::gateway::structured;
use crate::runner::loader::{AssertionDoc, PersonaDoc, ScenarioDoc, TurnDoc};
use crate::types::{
    AgentProfile, ChatMessage, GenerateRequest, LlmGateway, ScenarioCategory, ScenarioSpec,
    TestPlan,
};

/// Kinds the writer may not emit: tool and judge assertions beyond
/// `llmJudge` are reserved for hand-written scenarios.
fn is_disallowed(doc: &AssertionDoc) -> bool {
    matches!(
        doc,
        AssertionDoc::ToolCalled { .. }
            | AssertionDoc::ToolNotCalled { .. }
            | AssertionDoc::Guardrail { .. }
            | AssertionDoc::Sentiment { .. }
            | AssertionDoc::Factuality { .. }
            | AssertionDoc::Custom { .. }
    )
}

/// Drop disallowed assertion kinds in place. Returns how many were
/// removed.
pub fn validate_doc(doc: &mut ScenarioDoc) -> usize {
    let before = doc.assertions.len();
    doc.assertions.retain(|a| !is_disallowed(a));
    before - doc.assertions.len()
}

/// The deterministic fallback when the model's record is unusable:
/// render the planner's spec directly, judged against its success
/// criteria.
fn fallback_doc(category: ScenarioCategory, spec: &ScenarioSpec) -> ScenarioDoc {
    let criteria = if spec.success_criteria.is_empty() {
        spec.intent.clone()
    } else {
        spec.success_criteria.join("; ")
    };

    ScenarioDoc {
        name: spec.name.clone(),
        tags: vec![category.to_string()],
        persona: PersonaDoc {
            role: spec.persona.role.clone(),
            tone: if spec.persona.tone.is_empty() {
                None
            } else {
                Some(spec.persona.tone.clone())
            },
        },
        turns: spec.turns.iter().map(|t| TurnDoc { says: t.clone() }).collect(),
        assertions: vec![AssertionDoc::LlmJudge { criteria, threshold: 3.0 }],
    }
}

fn writer_prompt(profile: &AgentProfile, category: ScenarioCategory, spec: &ScenarioSpec) -> String {
    format!(
        "Write a runnable test scenario for the agent below as a YAML document.\n\n\
         Agent: {} -- {}\nCategory: {}\nScenario: {} -- {}\nPersona: {} ({})\n\
         Intent: {}\nSuccess criteria: {}\nFailure indicators: {}\nSuggested turns:\n{}\n\n\
         The YAML document must have exactly these keys: name, persona {{role, tone}}, \
         turns (list of {{says}}), assertions (list of tagged records). Allowed assertion \
         types: contains {{value}}, notContains {{value}}, matches {{pattern}}, \
         jsonSchema {{schema}}, latency {{maxMs}}, tokenUsage {{maxTokens}}, \
         llmJudge {{criteria, threshold}}. Use no other assertion types. \
         Reply with the YAML only.",
        profile.name,
        profile.description,
        category,
        spec.name,
        spec.description,
        spec.persona.role,
        spec.persona.tone,
        spec.intent,
        spec.success_criteria.join("; "),
        spec.failure_indicators.join("; "),
        spec.turns
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Produce one validated scenario record. Unusable model output falls
/// back to rendering the planner's spec.
pub async fn write_one(
    gateway: &dyn LlmGateway,
    profile: &AgentProfile,
    category: ScenarioCategory,
    spec: &ScenarioSpec,
) -> ScenarioDoc {
    let request = GenerateRequest {
        messages: vec![
            ChatMessage::system(
                "You write declarative test scenarios for conversational AI agents. \
                 Output only a YAML document; no commentary.",
            ),
            ChatMessage::user(writer_prompt(profile, category, spec)),
        ],
        output_schema: None,
        temperature: Some(0.3),
        max_tokens: Some(2048),
    };

    let mut doc = match gateway.generate(request).await {
        Ok(reply) => {
            let candidate = structured::strip_fence(&reply.text);
            match serde_yaml::from_str::<ScenarioDoc>(candidate) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(
                        "writer output for '{}' was not a scenario record ({}); using fallback",
                        spec.name, err
                    );
                    fallback_doc(category, spec)
                }
            }
        }
        Err(err) => {
            warn!("writer call for '{}' failed ({}); using fallback", spec.name, err);
            fallback_doc(category, spec)
        }
    };

    // The plan owns naming; the record keeps the category as a tag.
    doc.name = spec.name.clone();
    if !doc.tags.iter().any(|t| t == &category.to_string()) {
        doc.tags.push(category.to_string());
    }

    let dropped = validate_doc(&mut doc);
    if dropped > 0 {
        warn!(
            "dropped {} disallowed assertion(s) from '{}'",
            dropped, spec.name
        );
    }
    if doc.assertions.is_empty() {
        // A scenario with no assertions can never pass; give it the
        // judge fallback instead of shipping a silent test.
        doc.assertions = fallback_doc(category, spec).assertions;
    }
    if doc.turns.is_empty() {
        doc.turns = spec.turns.iter().map(|t| TurnDoc { says: t.clone() }).collect();
    }

    doc
}

/// Write every planned scenario as `<slug>.yaml` under `out_dir`.
pub async fn write_scenarios(
    gateway: &dyn LlmGateway,
    profile: &AgentProfile,
    plan: &TestPlan,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut written = Vec::new();
    for category in &plan.categories {
        for spec in &category.scenarios {
            let doc = write_one(gateway, profile, category.category, spec).await;

            let yaml = serde_yaml::to_string(&doc).context("failed to render scenario")?;
            let path = out_dir.join(format!("{}.yaml", spec.slug));
            std::fs::write(&path, yaml)
                .with_context(|| format!("failed to write {}", path.display()))?;

            info!("wrote scenario '{}' to {}", spec.name, path.display());
            written.push(path);
        }
    }

    Ok(written)
}
