//! Fabrik CLI
//!
//! Entry point wiring the pipeline together: `discover` writes the
//! agent profile, `gen` plans and writes scenarios, `run` executes
//! them (optionally saving a trace), `diff` compares two saved
//! versions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use fabrik::adapter;
use fabrik::config::{self, FabrikConfig, GatewayProvider};
use fabrik::discovery::{self, DiscoveryOptions};
use fabrik::gateway::{AnthropicGateway, GatewayError, OpenAiGateway, SessionGateway};
use fabrik::generator::{self, GeneratorOptions};
use fabrik::runner::{self, RunnerOptions, ScenarioRunner};
use fabrik::store::{diff_runs, TraceStore, DEFAULT_THRESHOLD};
use fabrik::types::{LlmGateway, ProfileSource, RunResult, ScenarioCategory};

#[derive(Parser, Debug)]
#[command(
    name = "fabrik",
    version,
    about = "Evaluation harness for conversational AI agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Explore an agent and write its profile
    Discover {
        /// Local source directory of the agent
        #[arg(long, conflicts_with_all = ["repo", "endpoint", "assistant"])]
        dir: Option<String>,
        /// Git repository URL of the agent
        #[arg(long)]
        repo: Option<String>,
        /// Live HTTP chat endpoint of the agent
        #[arg(long)]
        endpoint: Option<String>,
        /// OpenAI assistant id
        #[arg(long)]
        assistant: Option<String>,
        /// Short description hint for degraded profiles
        #[arg(long)]
        description: Option<String>,
    },
    /// Generate test scenarios from the discovered profile
    Gen {
        /// Maximum number of scenarios
        #[arg(long, default_value_t = generator::DEFAULT_COUNT)]
        count: usize,
        /// Restrict to these categories (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Output directory for scenario artifacts
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run scenarios against the live agent
    Run {
        /// Scenario directory
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        parallelism: Option<usize>,
        #[arg(long)]
        retries: Option<u32>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Persist the run to the trace store under this version label
        #[arg(long)]
        save: Option<String>,
    },
    /// Compare two saved run versions
    Diff {
        baseline: String,
        candidate: String,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
}

fn build_gateway(config: &FabrikConfig) -> Result<Arc<dyn LlmGateway>> {
    let gateway_config = &config.gateway;
    let gateway: Arc<dyn LlmGateway> = match gateway_config.provider {
        GatewayProvider::Openai => match (&gateway_config.api_key, &gateway_config.base_url) {
            (Some(key), base) => Arc::new(OpenAiGateway::new(
                base.clone()
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
                key.clone(),
                gateway_config.model.clone(),
            )),
            (None, _) => Arc::new(OpenAiGateway::from_env(gateway_config.model.clone())?),
        },
        GatewayProvider::Anthropic => match (&gateway_config.api_key, &gateway_config.base_url) {
            (Some(key), base) => Arc::new(AnthropicGateway::new(
                base.clone()
                    .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
                key.clone(),
                gateway_config.model.clone(),
            )),
            (None, _) => Arc::new(AnthropicGateway::from_env(gateway_config.model.clone())?),
        },
        GatewayProvider::ChatgptSession => {
            Arc::new(SessionGateway::new(gateway_config.model.clone()))
        }
    };
    Ok(gateway)
}

fn parse_categories(raw: &[String]) -> Result<Option<Vec<ScenarioCategory>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut categories = Vec::new();
    for name in raw {
        let value = serde_json::from_value(serde_json::Value::String(name.clone()))
            .with_context(|| format!("unknown category: {name}"))?;
        categories.push(value);
    }
    Ok(Some(categories))
}

fn print_results(results: &[RunResult]) {
    for result in results {
        let status = if result.passed {
            "PASS".green()
        } else if result.error.is_none() && result.assertions.is_empty() {
            "SILENT".yellow()
        } else {
            "FAIL".red()
        };
        println!(
            "{} {} (score {:.2}, {}/{} assertions, {}ms)",
            status,
            result.scenario,
            result.score,
            result.assertions.iter().filter(|a| a.passed).count(),
            result.assertions.len(),
            result.duration_ms,
        );
        if let Some(error) = &result.error {
            println!("    error: {}", error);
        }
    }

    let passed = results.iter().filter(|r| r.passed).count();
    println!(
        "\n{} passed, {} failed, {} total",
        passed,
        results.len() - passed,
        results.len()
    );
}

async fn cmd_discover(
    config: &FabrikConfig,
    project_root: PathBuf,
    source: ProfileSource,
    description: Option<String>,
) -> Result<()> {
    let gateway = build_gateway(config)?;
    let options = DiscoveryOptions { hint: description, project_root };
    let profile = discovery::discover(gateway, source, &options).await?;

    println!(
        "Discovered {} ({}), confidence {:.2}, {} tool(s), {} evidence record(s)",
        profile.name.bold(),
        profile.domain,
        profile.confidence,
        profile.tools.len(),
        profile.evidence.len(),
    );
    Ok(())
}

async fn cmd_gen(
    config: &FabrikConfig,
    project_root: PathBuf,
    count: usize,
    categories: Vec<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let profile = discovery::load_profile(&project_root)?
        .context("no agent profile found; run `fabrik discover` first")?;

    let gateway = build_gateway(config)?;
    let options = GeneratorOptions { count, categories: parse_categories(&categories)? };
    let out_dir = out.unwrap_or_else(|| project_root.join(&config.run.scenario_dir));

    let (plan, written) = generator::generate(&*gateway, &profile, &options, &out_dir).await?;
    println!(
        "Planned {} scenario(s) across {} categorie(s); wrote {} file(s) to {}",
        plan.scenario_count(),
        plan.categories.len(),
        written.len(),
        out_dir.display(),
    );
    Ok(())
}

async fn cmd_run(
    config: &FabrikConfig,
    project_root: PathBuf,
    dir: Option<PathBuf>,
    parallelism: Option<usize>,
    retries: Option<u32>,
    timeout_ms: Option<u64>,
    save: Option<String>,
) -> Result<()> {
    let adapter_config = config
        .adapter
        .clone()
        .context("no adapter configured; add an `adapter` section to .fabrik/config.json")?;

    let scenario_dir = dir.unwrap_or_else(|| project_root.join(&config.run.scenario_dir));
    let scenarios = runner::load_dir(&scenario_dir);
    if scenarios.is_empty() {
        println!("No scenarios found in {}", scenario_dir.display());
        return Ok(());
    }

    let profile = discovery::load_profile(&project_root)?.map(Arc::new);
    let gateway = build_gateway(config)?;
    let options = RunnerOptions {
        timeout_ms: timeout_ms.unwrap_or(config.run.timeout_ms),
        parallelism: parallelism.unwrap_or(config.run.parallelism),
        retries: retries.unwrap_or(config.run.retries),
    };

    let factory: runner::AdapterFactory =
        Arc::new(move || adapter::build(&adapter_config));
    let scenario_runner = ScenarioRunner::new(gateway, factory, profile, options);

    let results = scenario_runner.run(&scenarios).await;
    print_results(&results);

    if let Some(version) = save {
        let stored = runner::build_stored_run(&version, results);
        let db_path = config::resolve_path(
            &project_root.join(&config.run.trace_db).to_string_lossy(),
        );
        let mut store = TraceStore::open(&db_path)?;
        store.save_run(&stored)?;
        println!("Saved run {} under version '{}'", stored.meta.id, version);
    }

    Ok(())
}

fn cmd_diff(
    config: &FabrikConfig,
    project_root: PathBuf,
    baseline: String,
    candidate: String,
    threshold: f64,
) -> Result<()> {
    let db_path =
        config::resolve_path(&project_root.join(&config.run.trace_db).to_string_lossy());
    let store = TraceStore::open(&db_path)?;

    let baseline_run = store
        .load_by_version(&baseline)?
        .with_context(|| format!("no run saved under version '{}'", baseline))?;
    let candidate_run = store
        .load_by_version(&candidate)?
        .with_context(|| format!("no run saved under version '{}'", candidate))?;

    let report = diff_runs(&baseline_run, &candidate_run, threshold);

    for diff in &report.scenarios {
        let status = match diff.status {
            fabrik::store::DiffStatus::Regression => "REGRESSION".red(),
            fabrik::store::DiffStatus::Improvement => "IMPROVED".green(),
            fabrik::store::DiffStatus::Added => "ADDED".cyan(),
            fabrik::store::DiffStatus::Removed => "REMOVED".yellow(),
            fabrik::store::DiffStatus::Unchanged => "UNCHANGED".normal(),
        };
        let delta = diff
            .score_delta
            .map(|d| format!(" ({:+.2})", d))
            .unwrap_or_default();
        println!("{} {}{}", status, diff.scenario, delta);
    }

    let summary = &report.summary;
    println!(
        "\n{} regression(s), {} improvement(s), {} added, {} removed, {} unchanged",
        summary.regressions, summary.improvements, summary.added, summary.removed,
        summary.unchanged,
    );

    if report.has_regressions {
        bail!(
            "{} regression(s) between '{}' and '{}'",
            summary.regressions,
            baseline,
            candidate
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let project_root = std::env::current_dir().context("cannot resolve working directory")?;
    let config = config::load_config(&project_root).unwrap_or_default();

    match cli.command {
        Commands::Discover { dir, repo, endpoint, assistant, description } => {
            let source = if let Some(dir) = dir {
                ProfileSource::LocalDir { path: dir }
            } else if let Some(url) = repo {
                ProfileSource::RepoUrl { url }
            } else if let Some(url) = endpoint {
                ProfileSource::HttpEndpoint { url }
            } else if let Some(id) = assistant {
                ProfileSource::AssistantId { id }
            } else {
                bail!("one of --dir, --repo, --endpoint, or --assistant is required")
            };
            cmd_discover(&config, project_root, source, description).await
        }
        Commands::Gen { count, categories, out } => {
            cmd_gen(&config, project_root, count, categories, out).await
        }
        Commands::Run { dir, parallelism, retries, timeout_ms, save } => {
            cmd_run(&config, project_root, dir, parallelism, retries, timeout_ms, save).await
        }
        Commands::Diff { baseline, candidate, threshold } => {
            cmd_diff(&config, project_root, baseline, candidate, threshold)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fabrik=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        // Auth problems get their actionable message, not a backtrace.
        if let Some(GatewayError::Unauthorized(message)) = err.downcast_ref::<GatewayError>() {
            eprintln!("{}", message.red());
        } else {
            eprintln!("{} {:#}", "error:".red(), err);
        }
        std::process::exit(1);
    }
}
