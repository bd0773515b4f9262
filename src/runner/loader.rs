//! Scenario Loader
//!
//! Compiles declarative `.yaml`/`.yml` scenario artifacts into runnable
//! `Scenario`s. A file that fails to parse or has an invalid shape is
//! skipped with a warning; the rest of the suite proceeds.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::types::AgentResponse;

use super::context::ScenarioContext;
use super::Scenario;

fn default_threshold() -> f64 {
    3.0
}

/// One declared assertion. The tag names double as the wire names of
/// `AssertionKind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssertionDoc {
    #[serde(rename_all = "camelCase")]
    Contains { value: String },
    #[serde(rename_all = "camelCase")]
    NotContains { value: String },
    #[serde(rename_all = "camelCase")]
    Matches { pattern: String },
    #[serde(rename_all = "camelCase")]
    JsonSchema { schema: Value },
    #[serde(rename_all = "camelCase")]
    Latency { max_ms: u64 },
    #[serde(rename_all = "camelCase")]
    TokenUsage { max_tokens: u64 },
    #[serde(rename_all = "camelCase")]
    ToolCalled { tool: String },
    #[serde(rename_all = "camelCase")]
    ToolNotCalled { tool: String },
    #[serde(rename_all = "camelCase")]
    Sentiment { expected: String },
    #[serde(rename_all = "camelCase")]
    LlmJudge {
        criteria: String,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    #[serde(rename_all = "camelCase")]
    Guardrail { rule: String },
    #[serde(rename_all = "camelCase")]
    Factuality { reference: String },
    #[serde(rename_all = "camelCase")]
    Custom { instruction: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnDoc {
    pub says: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaDoc {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

/// Declarative scenario artifact: persona, turns, and assertions over
/// the final agent response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub persona: PersonaDoc,
    pub turns: Vec<TurnDoc>,
    #[serde(default)]
    pub assertions: Vec<AssertionDoc>,
}

/// Apply one declared assertion against the final response. Async
/// kinds are awaited here, so a compiled scenario can never leave a
/// judge un-awaited.
async fn apply_assertion(ctx: &ScenarioContext, response: &AgentResponse, doc: &AssertionDoc) {
    match doc {
        AssertionDoc::Contains { value } => ctx.assert.contains(response, value),
        AssertionDoc::NotContains { value } => ctx.assert.not_contains(response, value),
        AssertionDoc::Matches { pattern } => ctx.assert.matches(response, pattern),
        AssertionDoc::JsonSchema { schema } => ctx.assert.json_schema(response, schema),
        AssertionDoc::Latency { max_ms } => ctx.assert.latency(response, *max_ms),
        AssertionDoc::TokenUsage { max_tokens } => ctx.assert.token_usage(response, *max_tokens),
        AssertionDoc::ToolCalled { tool } => ctx.assert.tool_called(response, tool),
        AssertionDoc::ToolNotCalled { tool } => ctx.assert.tool_not_called(response, tool),
        AssertionDoc::Sentiment { expected } => ctx.assert.sentiment(response, expected).await,
        AssertionDoc::LlmJudge { criteria, threshold } => {
            ctx.assert.llm_judge(response, criteria, *threshold).await
        }
        AssertionDoc::Guardrail { rule } => ctx.assert.guardrail(response, rule).await,
        AssertionDoc::Factuality { reference } => {
            ctx.assert.factuality(response, reference).await
        }
        AssertionDoc::Custom { instruction } => ctx.assert.custom(response, instruction).await,
    }
}

/// Compile a declarative doc into a runnable scenario: play the turns
/// in order, then evaluate every assertion against the last response.
pub fn compile(doc: ScenarioDoc) -> Scenario {
    let name = doc.name.clone();
    let tags = doc.tags.clone();
    let doc = Arc::new(doc);

    Scenario {
        name,
        tags,
        body: Arc::new(move |ctx: ScenarioContext| {
            let doc = Arc::clone(&doc);
            Box::pin(async move {
                let mut last: Option<AgentResponse> = None;
                for turn in &doc.turns {
                    last = Some(ctx.agent.send(&turn.says).await?);
                }

                if let Some(response) = last {
                    for assertion in &doc.assertions {
                        apply_assertion(&ctx, &response, assertion).await;
                    }
                }
                Ok(())
            })
        }),
    }
}

fn load_file(path: &Path) -> Option<Scenario> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("skipping unreadable scenario file {}: {}", path.display(), err);
            return None;
        }
    };

    let doc: ScenarioDoc = match serde_yaml::from_str(&raw) {
        Ok(doc) => doc,
        Err(err) => {
            warn!("skipping invalid scenario file {}: {}", path.display(), err);
            return None;
        }
    };

    if doc.name.trim().is_empty() {
        warn!("skipping scenario file {} with empty name", path.display());
        return None;
    }

    Some(compile(doc))
}

/// Load every `.yaml`/`.yml` scenario under `dir`, in filename order.
/// Zero matching files is not an error.
pub fn load_dir(dir: &Path) -> Vec<Scenario> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!("scenario directory {} is not readable", dir.display());
        return Vec::new();
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    paths.iter().filter_map(|p| load_file(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
name: greeting pass-through
tags: [happy-path]
persona:
  role: new customer
  tone: cheerful
turns:
  - says: "Hi there! How are you?"
assertions:
  - type: contains
    value: "hello"
  - type: latency
    maxMs: 5000
"#;

    #[test]
    fn test_parse_scenario_doc() {
        let doc: ScenarioDoc = serde_yaml::from_str(DOC).unwrap();
        assert_eq!(doc.name, "greeting pass-through");
        assert_eq!(doc.turns.len(), 1);
        assert_eq!(doc.assertions.len(), 2);
        assert_eq!(
            doc.assertions[0],
            AssertionDoc::Contains { value: "hello".to_string() }
        );
        assert_eq!(doc.assertions[1], AssertionDoc::Latency { max_ms: 5000 });
    }

    #[test]
    fn test_llm_judge_default_threshold() {
        let yaml = "type: llmJudge\ncriteria: stays on topic\n";
        let doc: AssertionDoc = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            doc,
            AssertionDoc::LlmJudge { criteria: "stays on topic".to_string(), threshold: 3.0 }
        );
    }

    #[test]
    fn test_doc_round_trip() {
        let doc: ScenarioDoc = serde_yaml::from_str(DOC).unwrap();
        let rendered = serde_yaml::to_string(&doc).unwrap();
        let back: ScenarioDoc = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_load_dir_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.yaml"), DOC).unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "turns: [not a scenario").unwrap();
        std::fs::write(dir.path().join("unnamed.yml"), "name: \"\"\npersona:\n  role: x\nturns: []\n").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not yaml").unwrap();

        let scenarios = load_dir(dir.path());
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].name, "greeting pass-through");
    }

    #[test]
    fn test_load_dir_missing_is_empty() {
        let scenarios = load_dir(Path::new("/definitely/not/here"));
        assert!(scenarios.is_empty());
    }
}
