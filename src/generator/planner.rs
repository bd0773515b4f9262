//! Test Planner
//!
//! One gateway call turns a projected profile into an ordered test
//! plan: categories of scenario specs. The category filter is applied
//! before the count cap, and truncation preserves within-category
//! order.

use anyhow::{bail, Result};
use serde_json::json;

use crate::types::{
    AgentProfile, ChatMessage, GenerateRequest, LlmGateway, PlanCategory, ScenarioCategory,
    TestPlan,
};

pub const DEFAULT_COUNT: usize = 10;

/// How much of the system prompt the planner gets to see.
const SYSTEM_PROMPT_PREVIEW_CHARS: usize = 2000;

fn plan_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "categories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "enum": [
                                "happy-path", "edge-case", "adversarial",
                                "guardrail", "multi-turn", "tone", "tool-use"
                            ]
                        },
                        "scenarios": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string"},
                                    "slug": {"type": "string"},
                                    "description": {"type": "string"},
                                    "persona": {
                                        "type": "object",
                                        "properties": {
                                            "role": {"type": "string"},
                                            "tone": {"type": "string"},
                                            "backstory": {"type": "string"}
                                        },
                                        "required": ["role"]
                                    },
                                    "turns": {"type": "array", "items": {"type": "string"}},
                                    "intent": {"type": "string"},
                                    "successCriteria": {"type": "array", "items": {"type": "string"}},
                                    "failureIndicators": {"type": "array", "items": {"type": "string"}}
                                },
                                "required": ["name", "slug", "description", "persona", "intent"]
                            }
                        }
                    },
                    "required": ["category", "scenarios"]
                }
            }
        },
        "required": ["categories"]
    })
}

/// The profile projection the planner sees: identity, tools,
/// constraints, tone, and a truncated system prompt.
fn plan_prompt(profile: &AgentProfile) -> String {
    let mut prompt = format!(
        "Design behavioral test scenarios for this agent.\n\nName: {}\nDescription: {}\n\
         Domain: {}\n",
        profile.name, profile.description, profile.domain
    );

    if !profile.tools.is_empty() {
        prompt.push_str("Tools:\n");
        for tool in &profile.tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
    }
    if !profile.known_constraints.is_empty() {
        prompt.push_str(&format!(
            "Constraints: {}\n",
            profile.known_constraints.join("; ")
        ));
    }
    if let Some(tone) = &profile.expected_tone {
        prompt.push_str(&format!("Expected tone: {}\n", tone));
    }
    if let Some(system_prompt) = &profile.system_prompt {
        let preview: String = system_prompt.chars().take(SYSTEM_PROMPT_PREVIEW_CHARS).collect();
        prompt.push_str(&format!("System prompt (truncated):\n{}\n", preview));
    }

    prompt.push_str(
        "\nGenerate scenarios in these categories, in this order: happy-path, \
         edge-case, adversarial, guardrail, multi-turn, tone.",
    );
    if profile.tools.is_empty() {
        prompt.push_str(" Do not generate a tool-use category.");
    } else {
        let names: Vec<&str> = profile.tools.iter().map(|t| t.name.as_str()).collect();
        prompt.push_str(&format!(
            " Also generate a tool-use category referencing only these tools: {}.",
            names.join(", ")
        ));
    }
    prompt.push_str(
        "\nEach scenario needs: name, slug (kebab-case), description, persona \
         (role, tone, backstory), turns (ordered user messages), intent, \
         successCriteria, failureIndicators. Reply with JSON \
         {\"categories\": [{\"category\", \"scenarios\": [...]}]}.",
    );

    prompt
}

/// Category filter first, then the count cap. Truncation walks the
/// plan in order, so within-category order survives.
pub fn apply_limits(
    mut plan: TestPlan,
    categories: Option<&[ScenarioCategory]>,
    count: usize,
) -> TestPlan {
    if let Some(filter) = categories {
        plan.categories.retain(|c| filter.contains(&c.category));
    }

    let mut remaining = count;
    let mut limited = Vec::new();
    for mut category in plan.categories {
        if remaining == 0 {
            break;
        }
        if category.scenarios.len() > remaining {
            category.scenarios.truncate(remaining);
        }
        remaining -= category.scenarios.len();
        if !category.scenarios.is_empty() {
            limited.push(category);
        }
    }

    TestPlan { categories: limited }
}

/// Build the plan. The tool-use category is discarded when the profile
/// lists no tools, whatever the model generated.
pub async fn build_plan(
    gateway: &dyn LlmGateway,
    profile: &AgentProfile,
    categories: Option<&[ScenarioCategory]>,
    count: usize,
) -> Result<TestPlan> {
    let request = GenerateRequest {
        messages: vec![
            ChatMessage::system(
                "You are a test designer for conversational AI agents. Scenarios must be \
                 concrete, runnable, and grounded in the agent's actual capabilities.",
            ),
            ChatMessage::user(plan_prompt(profile)),
        ],
        output_schema: Some(plan_schema()),
        temperature: Some(0.3),
        max_tokens: Some(8192),
    };

    for attempt in 0..2 {
        let reply = gateway.generate(request.clone()).await?;
        let Some(parsed) = reply.parsed else {
            if attempt == 0 {
                continue;
            }
            bail!("planner reply did not match the plan schema after retry");
        };

        let mut plan: TestPlan = match serde_json::from_value(parsed) {
            Ok(plan) => plan,
            Err(err) => {
                if attempt == 0 {
                    continue;
                }
                bail!("planner reply had an invalid shape: {}", err);
            }
        };

        if profile.tools.is_empty() {
            plan.categories
                .retain(|c| c.category != ScenarioCategory::ToolUse);
        }
        dedup_slugs(&mut plan.categories);

        return Ok(apply_limits(plan, categories, count));
    }

    unreachable!("loop returns or bails on the second attempt")
}

/// Slugs name the output files; duplicates get a numeric suffix.
fn dedup_slugs(categories: &mut [PlanCategory]) {
    let mut seen = std::collections::HashSet::new();
    for category in categories.iter_mut() {
        for scenario in category.scenarios.iter_mut() {
            let mut slug = scenario.slug.clone();
            let mut n = 2;
            while !seen.insert(slug.clone()) {
                slug = format!("{}-{}", scenario.slug, n);
                n += 1;
            }
            scenario.slug = slug;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerateResponse, PersonaSpec, ScenarioSpec, TokenUsage};
    use async_trait::async_trait;

    fn spec(name: &str) -> ScenarioSpec {
        ScenarioSpec {
            name: name.to_string(),
            slug: name.to_string(),
            description: "test".to_string(),
            persona: PersonaSpec {
                role: "customer".to_string(),
                tone: "neutral".to_string(),
                backstory: String::new(),
            },
            turns: vec!["hello".to_string()],
            intent: "greet".to_string(),
            success_criteria: Vec::new(),
            failure_indicators: Vec::new(),
        }
    }

    fn category(cat: ScenarioCategory, names: &[&str]) -> PlanCategory {
        PlanCategory {
            category: cat,
            scenarios: names.iter().map(|n| spec(n)).collect(),
        }
    }

    #[test]
    fn test_apply_limits_truncates_in_order() {
        let plan = TestPlan {
            categories: vec![
                category(ScenarioCategory::HappyPath, &["a", "b", "c"]),
                category(ScenarioCategory::EdgeCase, &["d", "e"]),
                category(ScenarioCategory::Tone, &["f"]),
            ],
        };

        let limited = apply_limits(plan, None, 4);
        assert_eq!(limited.scenario_count(), 4);
        assert_eq!(limited.categories.len(), 2);
        // Within-category order is preserved.
        let names: Vec<&str> = limited.categories[0]
            .scenarios
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(limited.categories[1].scenarios[0].name, "d");
    }

    #[test]
    fn test_category_filter_applied_before_truncation() {
        let plan = TestPlan {
            categories: vec![
                category(ScenarioCategory::HappyPath, &["a", "b", "c"]),
                category(ScenarioCategory::Tone, &["f", "g"]),
            ],
        };

        // Without filter-first semantics, count=2 would exhaust on
        // happy-path before tone was reached.
        let limited = apply_limits(plan, Some(&[ScenarioCategory::Tone]), 2);
        assert_eq!(limited.categories.len(), 1);
        assert_eq!(limited.categories[0].category, ScenarioCategory::Tone);
        assert_eq!(limited.scenario_count(), 2);
    }

    struct PlanGateway {
        reply: String,
    }

    #[async_trait]
    impl LlmGateway for PlanGateway {
        async fn generate(
            &self,
            request: GenerateRequest,
        ) -> anyhow::Result<GenerateResponse> {
            let parsed = request
                .output_schema
                .as_ref()
                .and_then(|s| crate::gateway::structured::decode(&self.reply, s));
            Ok(GenerateResponse {
                text: self.reply.clone(),
                parsed,
                usage: TokenUsage::default(),
            })
        }
    }

    fn profile_without_tools() -> AgentProfile {
        crate::discovery::minimal_profile(
            crate::types::ProfileSource::LocalDir { path: "/x".to_string() },
            Some("a bot"),
        )
    }

    #[tokio::test]
    async fn test_tool_use_category_dropped_without_tools() {
        let reply = r#"{"categories": [
            {"category": "happy-path", "scenarios": [
                {"name": "greet", "slug": "greet", "description": "d",
                 "persona": {"role": "customer"}, "intent": "greet"}
            ]},
            {"category": "tool-use", "scenarios": [
                {"name": "use tool", "slug": "use-tool", "description": "d",
                 "persona": {"role": "customer"}, "intent": "tools"}
            ]}
        ]}"#;
        let gateway = PlanGateway { reply: reply.to_string() };

        let plan = build_plan(&gateway, &profile_without_tools(), None, 10)
            .await
            .unwrap();
        assert_eq!(plan.categories.len(), 1);
        assert_eq!(plan.categories[0].category, ScenarioCategory::HappyPath);
    }

    #[tokio::test]
    async fn test_unusable_plan_errors_after_retry() {
        let gateway = PlanGateway { reply: "not a plan at all".to_string() };
        let result = build_plan(&gateway, &profile_without_tools(), None, 10).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_dedup_slugs() {
        let mut categories = vec![
            category(ScenarioCategory::HappyPath, &["greet", "greet"]),
            category(ScenarioCategory::Tone, &["greet"]),
        ];
        dedup_slugs(&mut categories);

        assert_eq!(categories[0].scenarios[0].slug, "greet");
        assert_eq!(categories[0].scenarios[1].slug, "greet-2");
        assert_eq!(categories[1].scenarios[0].slug, "greet-3");
    }
}
