//! Fabrik - Type Definitions
//!
//! Shared types for the evaluation pipeline: the agent profile produced
//! by discovery, the wire types exchanged with the agent under test, and
//! the result types flowing into the trace store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Agent Profile ───────────────────────────────────────────────

/// Where a profile came from. Set once at discovery time; there is no
/// mutator, so the source is fixed for the life of the profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProfileSource {
    RepoUrl { url: String },
    LocalDir { path: String },
    HttpEndpoint { url: String },
    AssistantId { id: String },
}

/// A capability surfaced during discovery. The `citation` points at the
/// evidence (file path, probe name, API field) that justified it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    pub citation: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantFile {
    pub path: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub relevant_files: Vec<RelevantFile>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// One record in the profile's append-only evidence trail. Every
/// non-identity field of the profile must be traceable to at least one
/// of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub source: String,
    pub finding: String,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Readme,
    Manifest,
    Code,
    SystemPrompt,
    Probe,
    AssistantApi,
    Inference,
    Failure,
}

/// Canonical structured understanding of the agent under test.
/// Produced once per discovery invocation and cached on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub discovered_at: String,
    pub source: ProfileSource,
    pub confidence: f64,

    pub name: String,
    pub description: String,
    pub domain: String,

    #[serde(default)]
    pub tools: Vec<DiscoveredTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,

    #[serde(default)]
    pub known_constraints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_tone: Option<String>,
    #[serde(default)]
    pub supported_languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codebase: Option<CodebaseInfo>,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl AgentProfile {
    /// Add a tool unless one with the same (case-sensitive) name already
    /// exists. First occurrence wins.
    pub fn merge_tool(&mut self, tool: DiscoveredTool) {
        if !self.tools.iter().any(|t| t.name == tool.name) {
            self.tools.push(tool);
        }
    }

    /// Clamp `confidence` to the maximum confidence among cited evidence.
    /// A profile with no evidence cannot claim more than the minimal 0.2.
    pub fn bound_confidence(&mut self) {
        let ceiling = if self.evidence.is_empty() {
            0.2
        } else {
            self.evidence
                .iter()
                .map(|e| e.confidence)
                .fold(0.0_f64, f64::max)
        };
        self.confidence = self.confidence.clamp(0.0, ceiling.min(1.0));
    }
}

// ─── Chat & Gateway ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Input to one structured-generation call.
#[derive(Clone, Debug, Default)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    /// When present, the gateway attempts structured decoding and sets
    /// `GenerateResponse::parsed` only if the output validates.
    pub output_schema: Option<Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct GenerateResponse {
    pub text: String,
    /// Present only when a schema was requested and the output parsed
    /// and validated. Absent on parse/validation failure - never an error.
    pub parsed: Option<Value>,
    pub usage: TokenUsage,
}

/// Structured generation against an LLM provider. Implementations must
/// be safe under concurrent calls; each call is independent.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<GenerateResponse>;
}

// ─── Agent Adapter ───────────────────────────────────────────────

/// A tool invocation reported by the agent under test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Normalized response to one `send`. Constructed once per exchange and
/// never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Prior turns re-sent with each request; no server-side session is
/// assumed.
#[derive(Clone, Debug, Default)]
pub struct ConversationContext {
    pub turns: Vec<ChatMessage>,
}

/// Drives the agent under test. Stateless per send unless a context is
/// provided.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn send(
        &self,
        message: &str,
        context: Option<&ConversationContext>,
    ) -> anyhow::Result<AgentResponse>;

    /// Clear any per-conversation state (conversation ids, buffers).
    async fn reset(&self) {}
}

// ─── Adapter Configuration ───────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestFormat {
    #[default]
    Messages,
    Legacy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAdapterConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub request_format: RequestFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_template: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_parser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AdapterConfig {
    Http(HttpAdapterConfig),
    #[serde(rename_all = "camelCase")]
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    OpenaiAssistant {
        assistant_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    Custom {
        module: String,
    },
}

// ─── Assertions ──────────────────────────────────────────────────

/// Assertion families. The serialized names double as the tags in
/// scenario YAML artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionKind {
    Contains,
    NotContains,
    Matches,
    JsonSchema,
    Latency,
    TokenUsage,
    ToolCalled,
    ToolNotCalled,
    Sentiment,
    LlmJudge,
    Guardrail,
    Factuality,
    Custom,
}

impl AssertionKind {
    /// LLM-backed kinds run asynchronously and must be drained before a
    /// scenario completes.
    pub fn is_async(self) -> bool {
        matches!(
            self,
            AssertionKind::Sentiment
                | AssertionKind::LlmJudge
                | AssertionKind::Guardrail
                | AssertionKind::Factuality
                | AssertionKind::Custom
        )
    }
}

/// Outcome of one assertion. Append-only within a scenario execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── Run Results ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Persona,
    Agent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Per-scenario outcome. `passed` and `score` deliberately disagree for
/// zero-assertion scenarios: the score stays 1.0 for diffing while the
/// pass flag is false, which keeps "silent test" diagnostics visible.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub scenario: String,
    pub passed: bool,
    pub score: f64,
    pub assertions: Vec<AssertionResult>,
    pub turns: Vec<ConversationTurn>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// Score = fraction of passed assertions; 1.0 when none exist.
    pub fn compute_score(assertions: &[AssertionResult]) -> f64 {
        if assertions.is_empty() {
            return 1.0;
        }
        let passed = assertions.iter().filter(|a| a.passed).count();
        passed as f64 / assertions.len() as f64
    }

    /// A scenario passes iff no error, at least one assertion, and all
    /// assertions passed. Zero-assertion scenarios never vacuously pass.
    pub fn compute_passed(assertions: &[AssertionResult], error: Option<&str>) -> bool {
        error.is_none() && !assertions.is_empty() && assertions.iter().all(|a| a.passed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub id: String,
    pub version: String,
    pub created_at: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}

/// A persisted run: metadata plus all scenario results, stored under an
/// opaque id and a user-supplied version label.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRun {
    pub meta: RunMeta,
    pub results: Vec<RunResult>,
}

// ─── Test Plan ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioCategory {
    HappyPath,
    EdgeCase,
    Adversarial,
    Guardrail,
    MultiTurn,
    Tone,
    ToolUse,
}

impl ScenarioCategory {
    /// Categories generated for every profile. Tool-use is added only
    /// when the profile lists at least one tool.
    pub fn unconditional() -> &'static [ScenarioCategory] {
        &[
            ScenarioCategory::HappyPath,
            ScenarioCategory::EdgeCase,
            ScenarioCategory::Adversarial,
            ScenarioCategory::Guardrail,
            ScenarioCategory::MultiTurn,
            ScenarioCategory::Tone,
        ]
    }
}

impl std::fmt::Display for ScenarioCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScenarioCategory::HappyPath => "happy-path",
            ScenarioCategory::EdgeCase => "edge-case",
            ScenarioCategory::Adversarial => "adversarial",
            ScenarioCategory::Guardrail => "guardrail",
            ScenarioCategory::MultiTurn => "multi-turn",
            ScenarioCategory::Tone => "tone",
            ScenarioCategory::ToolUse => "tool-use",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSpec {
    pub role: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub backstory: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSpec {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub persona: PersonaSpec,
    #[serde(default)]
    pub turns: Vec<String>,
    pub intent: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub failure_indicators: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCategory {
    pub category: ScenarioCategory,
    pub scenarios: Vec<ScenarioSpec>,
}

/// Ordered output of the planner: categories in generation order, each
/// holding its scenarios in generation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlan {
    pub categories: Vec<PlanCategory>,
}

impl TestPlan {
    pub fn scenario_count(&self) -> usize {
        self.categories.iter().map(|c| c.scenarios.len()).sum()
    }
}
