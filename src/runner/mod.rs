//! Scenario Runner
//!
//! Loads scenarios, drives multi-turn conversations against the agent
//! under test, collects assertion verdicts, and computes deterministic
//! scores.

pub mod context;
pub mod executor;
pub mod loader;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use context::{AgentHandle, ScenarioContext};
pub use executor::{build_stored_run, AdapterFactory, RunnerOptions, ScenarioRunner};
pub use loader::{load_dir, ScenarioDoc};

pub type ScenarioFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type ScenarioFn = Arc<dyn Fn(ScenarioContext) -> ScenarioFuture + Send + Sync>;

/// Unit of execution: pure metadata until the runner invokes `body`.
/// Owns no resources.
#[derive(Clone)]
pub struct Scenario {
    pub name: String,
    pub tags: Vec<String>,
    pub body: ScenarioFn,
}

impl Scenario {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(ScenarioContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            tags: Vec::new(),
            body: Arc::new(move |ctx| Box::pin(body(ctx))),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Scenarios registered natively by embedding code, run side by side
/// with loaded YAML artifacts.
#[derive(Clone, Debug, Default)]
pub struct ScenarioSet {
    scenarios: Vec<Scenario>,
}

impl ScenarioSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scenario: Scenario) {
        self.scenarios.push(scenario);
    }

    pub fn into_scenarios(self) -> Vec<Scenario> {
        self.scenarios
    }
}
