use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use researchflow_core::engine::{DynEngine, OpenAiCompatibleEngine, ScriptedEngine};
use researchflow_core::tools::evaluate;
use researchflow_core::{
    AiResponse, Config, ConfigLoader, JsonlSessionStore, ResearchService, ServiceConfig,
    SessionStore, TelemetryOptions, ToolRegistry, init_metrics_from_env, init_telemetry,
    persist_trace,
};
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "researchflow",
    version,
    about = "Research, fact-check and summarize a question with tool-using agents"
)]
struct Cli {
    /// Path to a researchflow.toml (defaults to $RESEARCHFLOW_CONFIG or ./researchflow.toml).
    #[arg(long, global = true, env = "RESEARCHFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a research session and print the final report.
    Run(RunArgs),
    /// List stored sessions, newest first.
    History(HistoryArgs),
    /// Print one stored session as JSON.
    Show(SessionArgs),
    /// Delete a stored session.
    Delete(SessionArgs),
    /// Evaluate an arithmetic expression with the calculator tool grammar.
    Calc(CalcArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Research question (at least 5 characters).
    query: String,

    /// Researcher turns before research is saved (1-5).
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Fact-checker turns before facts are saved.
    #[arg(long)]
    fact_check_max_iterations: Option<u32>,

    /// Abort the run after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Use a canned in-process engine instead of the configured provider.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Print the full result as JSON instead of the markdown report.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print the node trace after the report.
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Directory to write the node trace JSON into.
    #[arg(long)]
    trace_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long, default_value_t = 0)]
    skip: usize,

    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Session identifier.
    id: String,
}

#[derive(Args, Debug)]
struct CalcArgs {
    expression: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    init_telemetry(TelemetryOptions {
        env_filter: Some(format!("{},researchflow_core={}", config.logging.level, config.logging.level)),
        with_target: false,
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("researchflow-cli");

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(&config, args).await?,
            Command::History(args) => history_command(&config, args).await?,
            Command::Show(args) => show_command(&config, args).await?,
            Command::Delete(args) => delete_command(&config, args).await?,
            Command::Calc(args) => calc_command(args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn store(config: &Config) -> Arc<JsonlSessionStore> {
    Arc::new(JsonlSessionStore::new(&config.sessions.dir))
}

fn offline_engine() -> DynEngine {
    Arc::new(ScriptedEngine::new(AiResponse::text(
        "# Research Report: Offline run\n\n## Executive Summary\nThis report was produced by the \
         offline engine; no provider was contacted.\n\n## Key Findings\n- None.\n\n\
         ## Uncertainties\n- Everything.\n\n## Sources\n- None.",
    )))
}

async fn run_command(config: &Config, args: RunArgs) -> Result<()> {
    let mut options = config.run_options();
    if let Some(max) = args.max_iterations {
        ConfigLoader::validate_max_iterations("--max-iterations", max)?;
        options = options.with_max_iterations(max);
    }
    if let Some(max) = args.fact_check_max_iterations {
        options = options.with_fact_check_max_iterations(max);
    }
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let engine: DynEngine = if args.offline {
        offline_engine()
    } else {
        info!(provider = config.llm.provider.as_str(), model = %config.llm.model, "using reasoning engine");
        let api_key = config.llm_api_key()?;
        Arc::new(OpenAiCompatibleEngine::new(config.engine_config(), api_key)?)
    };
    let tools = Arc::new(ToolRegistry::with_builtins(config.web_tools_config()));

    let service = ResearchService::new(
        engine,
        tools,
        store(config),
        ServiceConfig {
            max_concurrent_runs: config.workflow.max_concurrent_runs,
        },
    );

    info!(query = %args.query, "starting research session");
    let submission = service.submit(&args.query, options).await?;

    if let Some(dir) = &args.trace_dir {
        let path = persist_trace(dir, &submission.record.id, submission.outcome.trace.events())?;
        info!(path = %path.display(), "trace written");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&submission.record)?);
    } else {
        println!("{}", submission.outcome.report.final_report);
        println!(
            "\n(session {} | {} research turns | {} fact-check turns)",
            submission.record.id,
            submission.outcome.report.iterations,
            submission.outcome.report.fact_check_iterations
        );
    }
    if args.trace {
        println!("\n{}", submission.outcome.trace.summary().render_markdown());
    }
    Ok(())
}

async fn history_command(config: &Config, args: HistoryArgs) -> Result<()> {
    let sessions = store(config).history(args.skip, args.limit).await?;
    if sessions.is_empty() {
        println!("No sessions recorded.");
        return Ok(());
    }
    for session in sessions {
        let took = session
            .processing_time_ms
            .map(|ms| format!("{ms} ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<10}  {:>9}  {}  {}",
            session.created_at.format("%Y-%m-%d %H:%M:%S"),
            session.status.as_str(),
            took,
            session.id,
            session.query
        );
    }
    Ok(())
}

async fn show_command(config: &Config, args: SessionArgs) -> Result<()> {
    let record = store(config)
        .get(&args.id)
        .await?
        .with_context(|| format!("session {} not found", args.id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn delete_command(config: &Config, args: SessionArgs) -> Result<()> {
    if store(config).delete(&args.id).await? {
        println!("Deleted session {}", args.id);
    } else {
        println!("Session {} not found", args.id);
    }
    Ok(())
}

fn calc_command(args: CalcArgs) -> Result<()> {
    let value = evaluate(&args.expression)
        .with_context(|| format!("could not evaluate '{}'", args.expression))?;
    println!("{value}");
    Ok(())
}
