//! Assertion Surface
//!
//! `Assert` binds the collector, the LLM gateway, and the optional
//! agent profile into the object scenarios call. Synchronous checks
//! record immediately; LLM-backed checks are spawned as tracked tasks
//! so the runner can drain them even when a scenario never awaits the
//! returned handle.
//!
//! The "current" binding is scenario-local task storage, not a process
//! global: concurrent scenarios cannot race on it, and it is unbound
//! automatically when the scenario's scope ends.

pub mod collector;
pub mod judge;
pub mod local;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::types::{AgentProfile, AgentResponse, LlmGateway};

pub use collector::AssertionCollector;

tokio::task_local! {
    static CURRENT: Assert;
}

/// Run `fut` with `assert` bound as the task-local current assertion
/// surface. The binding ends with the future, success or panic.
pub async fn with_current<F: Future>(assert: Assert, fut: F) -> F::Output {
    CURRENT.scope(assert, fut).await
}

/// Resolve the current task's assertion surface, if one is bound.
/// Shim for code that does not thread the `ScenarioContext` through.
pub fn current() -> Option<Assert> {
    CURRENT.try_with(|a| a.clone()).ok()
}

/// Completion handle for an LLM-backed assertion. Awaiting is optional;
/// the runner drains the underlying task either way.
pub struct PendingAssertion {
    rx: oneshot::Receiver<()>,
}

impl Future for PendingAssertion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender means the task already finished (or died and
        // was recorded by drain); either way the assertion is settled.
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Clone)]
pub struct Assert {
    collector: AssertionCollector,
    gateway: Arc<dyn LlmGateway>,
    profile: Option<Arc<AgentProfile>>,
}

impl Assert {
    pub fn new(
        collector: AssertionCollector,
        gateway: Arc<dyn LlmGateway>,
        profile: Option<Arc<AgentProfile>>,
    ) -> Self {
        Self { collector, gateway, profile }
    }

    pub fn collector(&self) -> &AssertionCollector {
        &self.collector
    }

    // ─── Local assertions ────────────────────────────────────────

    pub fn contains(&self, response: &AgentResponse, needle: &str) {
        self.collector.record(local::contains(response, needle));
    }

    pub fn not_contains(&self, response: &AgentResponse, needle: &str) {
        self.collector.record(local::not_contains(response, needle));
    }

    pub fn matches(&self, response: &AgentResponse, pattern: &str) {
        self.collector.record(local::matches(response, pattern));
    }

    pub fn json_schema(&self, response: &AgentResponse, schema: &Value) {
        self.collector.record(local::json_schema(response, schema));
    }

    pub fn latency(&self, response: &AgentResponse, max_ms: u64) {
        self.collector.record(local::latency(response, max_ms));
    }

    pub fn token_usage(&self, response: &AgentResponse, max_tokens: u64) {
        self.collector.record(local::token_usage(response, max_tokens));
    }

    pub fn tool_called(&self, response: &AgentResponse, name: &str) {
        self.collector.record(local::tool_called(response, name));
    }

    pub fn tool_not_called(&self, response: &AgentResponse, name: &str) {
        self.collector.record(local::tool_not_called(response, name));
    }

    // ─── LLM-backed assertions ───────────────────────────────────

    fn spawn_judge<Fut>(&self, judge_call: impl FnOnce(JudgeContext) -> Fut) -> PendingAssertion
    where
        Fut: Future<Output = crate::types::AssertionResult> + Send + 'static,
    {
        let context = JudgeContext {
            gateway: self.gateway.clone(),
            profile: self.profile.clone(),
        };
        let collector = self.collector.clone();
        let (tx, rx) = oneshot::channel();

        let fut = judge_call(context);
        let handle = tokio::spawn(async move {
            collector.record(fut.await);
            let _ = tx.send(());
        });
        self.collector.track(handle);

        PendingAssertion { rx }
    }

    pub fn sentiment(&self, response: &AgentResponse, expected: &str) -> PendingAssertion {
        let text = response.text.clone();
        let expected = expected.to_string();
        self.spawn_judge(move |ctx| async move {
            judge::sentiment(&*ctx.gateway, ctx.profile.as_deref(), &text, &expected).await
        })
    }

    pub fn llm_judge(
        &self,
        response: &AgentResponse,
        criteria: &str,
        threshold: f64,
    ) -> PendingAssertion {
        let text = response.text.clone();
        let criteria = criteria.to_string();
        self.spawn_judge(move |ctx| async move {
            judge::llm_judge(&*ctx.gateway, ctx.profile.as_deref(), &text, &criteria, threshold)
                .await
        })
    }

    pub fn guardrail(&self, response: &AgentResponse, rule: &str) -> PendingAssertion {
        let text = response.text.clone();
        let rule = rule.to_string();
        self.spawn_judge(move |ctx| async move {
            judge::guardrail(&*ctx.gateway, ctx.profile.as_deref(), &text, &rule).await
        })
    }

    pub fn factuality(&self, response: &AgentResponse, reference: &str) -> PendingAssertion {
        let text = response.text.clone();
        let reference = reference.to_string();
        self.spawn_judge(move |ctx| async move {
            judge::factuality(&*ctx.gateway, ctx.profile.as_deref(), &text, &reference).await
        })
    }

    pub fn custom(&self, response: &AgentResponse, instruction: &str) -> PendingAssertion {
        let text = response.text.clone();
        let instruction = instruction.to_string();
        self.spawn_judge(move |ctx| async move {
            judge::custom(&*ctx.gateway, ctx.profile.as_deref(), &text, &instruction).await
        })
    }
}

struct JudgeContext {
    gateway: Arc<dyn LlmGateway>,
    profile: Option<Arc<AgentProfile>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerateRequest, GenerateResponse, TokenUsage};
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowJudgeGateway;

    #[async_trait]
    impl LlmGateway for SlowJudgeGateway {
        async fn generate(&self, _request: GenerateRequest) -> anyhow::Result<GenerateResponse> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(GenerateResponse {
                text: "{\"score\": 4, \"reasoning\": \"fine\"}".to_string(),
                parsed: None,
                usage: TokenUsage::default(),
            })
        }
    }

    fn response(text: &str) -> AgentResponse {
        AgentResponse {
            text: text.to_string(),
            tool_calls: Vec::new(),
            latency_ms: 10,
            token_usage: None,
            raw: None,
        }
    }

    fn assert_surface() -> Assert {
        Assert::new(AssertionCollector::new(), Arc::new(SlowJudgeGateway), None)
    }

    #[tokio::test]
    async fn test_sync_assertions_record_in_order() {
        let assert = assert_surface();
        let r = response("Hello! How can I help?");

        assert.contains(&r, "hello");
        assert.latency(&r, 5000);

        let results = assert.collector().results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|a| a.passed));
    }

    #[tokio::test]
    async fn test_unawaited_judge_is_drained() {
        let assert = assert_surface();
        let r = response("some reply");

        // Fire and forget: the handle is dropped without awaiting.
        let _ = assert.llm_judge(&r, "is helpful", 3.0);
        assert_eq!(assert.collector().len(), 0);

        assert.collector().drain().await;
        let results = assert.collector().results();
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn test_awaited_judge_resolves() {
        let assert = assert_surface();
        let r = response("some reply");

        assert.llm_judge(&r, "is helpful", 3.0).await;
        assert_eq!(assert.collector().len(), 1);

        // Draining afterwards neither blocks nor duplicates.
        assert.collector().drain().await;
        assert_eq!(assert.collector().len(), 1);
    }

    #[tokio::test]
    async fn test_current_binding_is_task_local() {
        let assert = assert_surface();
        assert!(current().is_none());

        with_current(assert, async {
            assert!(current().is_some());
        })
        .await;

        assert!(current().is_none());
    }
}
