//! Scenario fuzzing CLI: discovers the tunable parameters of a route scenario, searches
//! them with random/PSO/GA strategies against an external simulator, and records every
//! evaluation in `{data_dir}/results.db`.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use scenario_fuzz_core::{
    discover, RewardFunction, ScenarioDescription, SearchConfig, SearchMethod,
};
use scenario_fuzz::{
    util::{parse_range_override, parse_seed},
    CancellationToken, EngineSettings, LogProgress, Orchestrator, ProcessConfig, ProcessExecutor,
    ResultStore, RunRequest,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "scenario-fuzz")]
#[command(about = "Search driving-scenario parameters for safety-critical outcomes")]
struct Cli {
    /// Range configuration YAML; overrides FUZZ_RANGES_FILE.
    #[arg(long, global = true)]
    ranges: Option<PathBuf>,

    /// Output directory; overrides FUZZ_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List fuzzable parameters of a route file with their resolved ranges.
    Discover(ScenarioArgs),
    /// Summarize the active range configuration.
    Ranges,
    /// List the available reward functions.
    Rewards,
    /// Run a fuzzing search to completion (Ctrl-C stops it early).
    Run(RunArgs),
    /// List stored runs, most recent first.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the search records of a stored run as JSON lines.
    History { run_id: Uuid },
}

#[derive(Args)]
struct ScenarioArgs {
    /// Route XML file.
    route_file: PathBuf,

    #[arg(long)]
    route_id: Option<String>,

    /// Range override as `name=min:max`; repeatable.
    #[arg(long = "override")]
    overrides: Vec<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    scenario: ScenarioArgs,

    #[arg(long, default_value_t = SearchMethod::Pso)]
    method: SearchMethod,

    #[arg(long, default_value_t = 10)]
    iterations: usize,

    #[arg(long, default_value_t = RewardFunction::Ttc)]
    reward: RewardFunction,

    /// Decimal or 0x-prefixed hex.
    #[arg(long, default_value = "42")]
    seed: String,

    /// Population size for PSO/GA; method default when unset.
    #[arg(long)]
    population: Option<usize>,

    #[arg(long)]
    mutation_rate: Option<f64>,

    /// Command run once per evaluation. Receives SCENARIO_FILE, RESULT_FILE and
    /// CURRENT_RUN_NUMBER in its environment.
    #[arg(long)]
    scenario_command: String,

    /// Long-lived simulator command, restarted by the engine.
    #[arg(long)]
    simulator_command: Option<String>,

    /// Per-evaluation timeout; overrides FUZZ_TIMEOUT_SECS.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Evaluations between proactive simulator restarts (0 disables); overrides
    /// FUZZ_RESTART_GAP.
    #[arg(long)]
    restart_gap: Option<usize>,

    #[arg(long)]
    stop_on_collision: bool,
}

#[derive(Serialize)]
struct DiscoveredParameter {
    scenario: String,
    scenario_type: String,
    name: String,
    current_value: f64,
    semantic_type: &'static str,
    lower_bound: f64,
    upper_bound: f64,
    tier: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = EngineSettings::from_env();
    if let Some(path) = cli.ranges {
        settings.ranges_file = Some(path);
    }
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    match cli.command {
        Command::Discover(args) => cmd_discover(&settings, args),
        Command::Ranges => {
            let ranges = settings.load_ranges()?;
            print_json(&ranges.summary())?;
            print_json(&ranges)
        }
        Command::Rewards => {
            for reward in RewardFunction::ALL {
                println!("{:<16} {}", reward.as_str(), reward.description());
            }
            Ok(())
        }
        Command::Run(args) => cmd_run(settings, args).await,
        Command::Runs { limit } => {
            let store = open_store(&settings)?;
            let runs = store.list_runs(limit).map_err(|e| anyhow!(e))?;
            print_json(&runs)
        }
        Command::History { run_id } => {
            let store = open_store(&settings)?;
            if store.get_run(run_id).map_err(|e| anyhow!(e))?.is_none() {
                return Err(anyhow!("unknown run {run_id}"));
            }
            for record in store.history(run_id).map_err(|e| anyhow!(e))? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(())
        }
    }
}

fn cmd_discover(settings: &EngineSettings, args: ScenarioArgs) -> Result<()> {
    let ranges = settings.load_ranges()?;
    let overrides = parse_overrides(&args.overrides)?;
    let description = ScenarioDescription::from_file(&args.route_file, args.route_id)?;
    let discovered = discover(&description)?;

    let mut rows = Vec::with_capacity(discovered.parameters.len());
    for spec in &discovered.parameters {
        let ((lower, upper), tier) = ranges.resolve_with_tier(
            &spec.name,
            &spec.scenario_type,
            spec.current_value,
            overrides.get(&spec.name).copied(),
        )?;
        rows.push(DiscoveredParameter {
            scenario: spec.scenario_instance.clone(),
            scenario_type: spec.scenario_type.clone(),
            name: spec.name.clone(),
            current_value: spec.current_value,
            semantic_type: spec.semantic_type.as_str(),
            lower_bound: lower,
            upper_bound: upper,
            tier: tier.as_str(),
        });
    }

    tracing::info!(
        town = ?discovered.town,
        scenario_type = %discovered.scenario_type,
        parameters = rows.len(),
        "discovered fuzzable parameters"
    );
    print_json(&rows)
}

async fn cmd_run(settings: EngineSettings, args: RunArgs) -> Result<()> {
    let ranges = Arc::new(settings.load_ranges()?);
    let store = Arc::new(open_store(&settings)?);
    let orchestrator = Orchestrator::new(ranges, store, Arc::new(LogProgress));

    let description =
        ScenarioDescription::from_file(&args.scenario.route_file, args.scenario.route_id)?;

    let mut search = SearchConfig::new(args.method);
    if let Some(population) = args.population {
        search.pso.population_size = population;
        search.ga.population_size = population;
    }
    if let Some(rate) = args.mutation_rate {
        search.ga.prob_mut = rate;
    }

    let mut request = RunRequest::from_settings(&settings, description.clone(), search);
    request.iteration_budget = args.iterations;
    request.reward = args.reward;
    request.seed = parse_seed(&args.seed)?;
    request.user_overrides = parse_overrides(&args.scenario.overrides)?;
    request.stop_on_collision = args.stop_on_collision;
    if let Some(secs) = args.timeout_secs {
        request.evaluation_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(gap) = args.restart_gap {
        request.restart_gap = gap;
    }

    let prepared = orchestrator.prepare(request)?;
    let run_id = prepared.run_id;
    let run_dir = settings.data_dir.join("runs").join(run_id.to_string());

    let mut executor = ProcessExecutor::new(ProcessConfig {
        scenario: description,
        simulator_command: args.simulator_command,
        scenario_command: args.scenario_command,
        work_dir: run_dir,
        startup_grace: Duration::from_secs(settings.simulator_startup_secs),
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current evaluation");
            ctrl_c.cancel();
        }
    });

    let state = orchestrator
        .execute(prepared, &mut executor, &cancel)
        .await;

    let summary = serde_json::json!({
        "run_id": state.run_id,
        "status": state.status,
        "scenarios_executed": state.scenarios_executed,
        "total_scenarios": state.total_scenarios,
        "collision_found": state.collision_found,
        "best_reward": state.best_reward(),
        "best_parameters": state.best_parameters(),
        "failure_reason": state.failure_reason,
    });

    let runs_dir = settings.data_dir.join("runs");
    tokio::fs::create_dir_all(&runs_dir)
        .await
        .with_context(|| format!("failed to create {}", runs_dir.display()))?;
    let final_path = runs_dir.join(format!("{run_id}.json"));
    tokio::fs::write(&final_path, serde_json::to_vec_pretty(&state)?)
        .await
        .with_context(|| format!("failed to write {}", final_path.display()))?;

    print_json(&summary)
}

fn open_store(settings: &EngineSettings) -> Result<ResultStore> {
    ResultStore::open(&settings.data_dir).map_err(|e| anyhow!(e))
}

fn parse_overrides(raw: &[String]) -> Result<HashMap<String, (f64, f64)>> {
    raw.iter()
        .map(|entry| parse_range_override(entry))
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
