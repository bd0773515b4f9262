//! Scenario Executor
//!
//! Runs each scenario against a fresh adapter and collector: race the
//! body against the timeout, drain pending judge tasks, then apply the
//! pass rule and score. Batches of `parallelism` scenarios run
//! concurrently; emitted results always mirror input order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assertions::{self, Assert, AssertionCollector};
use crate::types::{
    AgentAdapter, AgentProfile, LlmGateway, RunMeta, RunResult, StoredRun,
};

use super::context::{AgentHandle, ScenarioContext};
use super::Scenario;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Produces one adapter per scenario execution, so concurrent
/// scenarios never share adapter state.
pub type AdapterFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn AgentAdapter>> + Send + Sync>;

#[derive(Clone, Copy, Debug)]
pub struct RunnerOptions {
    pub timeout_ms: u64,
    pub parallelism: usize,
    pub retries: u32,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            parallelism: 1,
            retries: 0,
        }
    }
}

pub struct ScenarioRunner {
    gateway: Arc<dyn LlmGateway>,
    adapter_factory: AdapterFactory,
    profile: Option<Arc<AgentProfile>>,
    options: RunnerOptions,
}

impl ScenarioRunner {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        adapter_factory: AdapterFactory,
        profile: Option<Arc<AgentProfile>>,
        options: RunnerOptions,
    ) -> Self {
        Self { gateway, adapter_factory, profile, options }
    }

    /// Run all scenarios. Zero scenarios yields an empty list, not an
    /// error.
    pub async fn run(&self, scenarios: &[Scenario]) -> Vec<RunResult> {
        let batch_size = self.options.parallelism.max(1);
        let mut results = Vec::with_capacity(scenarios.len());

        for batch in scenarios.chunks(batch_size) {
            let futures: Vec<_> = batch
                .iter()
                .map(|scenario| self.run_with_retries(scenario))
                .collect();
            // join_all preserves batch order, so results mirror input
            // order regardless of completion order.
            results.extend(join_all(futures).await);
        }

        results
    }

    /// A failed scenario is rerun up to `retries` more times, each
    /// attempt against a reset adapter. The last result wins; earlier
    /// attempts are logged for flake diagnosis.
    async fn run_with_retries(&self, scenario: &Scenario) -> RunResult {
        let attempts = self.options.retries as usize + 1;
        let mut last = None;

        for attempt in 1..=attempts {
            let adapter = match (self.adapter_factory)() {
                Ok(adapter) => adapter,
                Err(err) => {
                    return error_result(
                        &scenario.name,
                        format!("failed to build adapter: {}", err),
                    )
                }
            };
            if attempt > 1 {
                adapter.reset().await;
            }

            let result = self.run_once(scenario, adapter).await;
            let passed = result.passed;

            if !passed && attempt < attempts {
                warn!(
                    "scenario '{}' failed attempt {}/{} (score {:.2}{}), retrying",
                    scenario.name,
                    attempt,
                    attempts,
                    result.score,
                    result
                        .error
                        .as_deref()
                        .map(|e| format!(", error: {}", e))
                        .unwrap_or_default(),
                );
            }

            last = Some(result);
            if passed {
                break;
            }
        }

        last.expect("at least one attempt ran")
    }

    async fn run_once(&self, scenario: &Scenario, adapter: Arc<dyn AgentAdapter>) -> RunResult {
        let started = Instant::now();

        let collector = AssertionCollector::new();
        let turns = Arc::new(Mutex::new(Vec::new()));
        let assert = Assert::new(collector.clone(), self.gateway.clone(), self.profile.clone());

        let ctx = ScenarioContext {
            agent: AgentHandle::new(adapter, turns.clone()),
            assert: assert.clone(),
            profile: self.profile.clone(),
            scores: Arc::new(Mutex::new(HashMap::new())),
            conversation_id: Uuid::new_v4().to_string(),
        };

        // The current-assert binding is scoped to this future: it ends
        // with the scenario, even on timeout or panic.
        let body = assertions::with_current(assert, (scenario.body)(ctx));

        let error = match timeout(Duration::from_millis(self.options.timeout_ms), body).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("Scenario timed out after {}ms", self.options.timeout_ms)),
        };

        // Pending judge tasks keep running after a timeout; their
        // results still belong to this scenario.
        collector.drain().await;

        let assertion_results = collector.results();
        let score = RunResult::compute_score(&assertion_results);
        let passed = RunResult::compute_passed(&assertion_results, error.as_deref());

        info!(
            "scenario '{}': {} ({}/{} assertions, score {:.2})",
            scenario.name,
            if passed { "pass" } else { "fail" },
            assertion_results.iter().filter(|a| a.passed).count(),
            assertion_results.len(),
            score,
        );

        let turns_result = turns.lock().unwrap().clone();

        RunResult {
            scenario: scenario.name.clone(),
            passed,
            score,
            assertions: assertion_results,
            turns: turns_result,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        }
    }
}

fn error_result(name: &str, error: String) -> RunResult {
    RunResult {
        scenario: name.to_string(),
        passed: false,
        score: 1.0,
        assertions: Vec::new(),
        turns: Vec::new(),
        duration_ms: 0,
        error: Some(error),
    }
}

/// Package run results for the trace store under a version label.
pub fn build_stored_run(version: &str, results: Vec<RunResult>) -> StoredRun {
    let passed = results.iter().filter(|r| r.passed).count();
    StoredRun {
        meta: RunMeta {
            id: Uuid::new_v4().to_string(),
            version: version.to_string(),
            created_at: Utc::now().to_rfc3339(),
            total: results.len(),
            passed,
            failed: results.len() - passed,
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
        },
        results,
    }
}
