//! Scenario Generator
//!
//! Planner plus writer: the planner turns a profile into an ordered
//! test plan, the writer renders each planned scenario as a YAML
//! artifact the runner can load.

pub mod planner;
pub mod writer;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::types::{AgentProfile, LlmGateway, ScenarioCategory, TestPlan};

pub use planner::{build_plan, DEFAULT_COUNT};
pub use writer::write_scenarios;

#[derive(Clone, Debug)]
pub struct GeneratorOptions {
    pub count: usize,
    pub categories: Option<Vec<ScenarioCategory>>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self { count: DEFAULT_COUNT, categories: None }
    }
}

/// Plan and write scenarios for a profile. Returns the plan and the
/// artifact paths.
pub async fn generate(
    gateway: &dyn LlmGateway,
    profile: &AgentProfile,
    options: &GeneratorOptions,
    out_dir: &Path,
) -> Result<(TestPlan, Vec<PathBuf>)> {
    let plan = planner::build_plan(
        gateway,
        profile,
        options.categories.as_deref(),
        options.count,
    )
    .await?;

    let written = writer::write_scenarios(gateway, profile, &plan, out_dir).await?;
    Ok((plan, written))
}
