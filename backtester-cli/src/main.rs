//! Backtester CLI: serve the run manager, run strategies locally, and drive
//! a running server.
//!
//! Commands:
//! - `serve`: start the HTTP gateway
//! - `run`: run a `.strat` file to completion in-process
//! - `validate`: check a `.strat` file without running it
//! - `list`, `execute`, `start`, `stop`, `stop-all`, `clear`, `clear-all`,
//!   `report`: client calls against `--server`

use anyhow::{bail, Context, Result};
use backtester_core::StrategyRegistry;
use backtester_runner::api::{ApiError, ClearAllResponse, RunResponse, RunsResponse, StopAllResponse};
use backtester_runner::{
    init_tracing, load_config, LogFormat, ManagerSettings, RunManager, RunReport, RunSummary, ServerSettings,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_SERVER: &str = "http://127.0.0.1:9054";

#[derive(Parser)]
#[command(name = "backtester", about = "Strategy backtester: run manager and simulation engine")]
struct Cli {
    /// Server base URL for client commands. Falls back to BACKTESTER_SERVER.
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    Serve {
        /// Server settings TOML. BACKTESTER_* variables override it.
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Run a strategy file to completion in this process.
    Run {
        file: PathBuf,

        /// Write the full run report as JSON.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Base directory for relative CSV paths. Defaults to the file's directory.
        #[arg(long)]
        csv_base_dir: Option<PathBuf>,
    },
    /// Parse and validate a strategy file.
    Validate { file: PathBuf },
    /// List every run on the server.
    List,
    /// Create a run on the server from a strategy file it can read.
    Execute {
        file: PathBuf,

        /// Register the run without starting it.
        #[arg(long, default_value_t = false)]
        no_run: bool,
    },
    /// Start a created run.
    Start { id: String },
    /// Stop a running run and wait for it to finish.
    Stop { id: String },
    /// Stop every run.
    StopAll,
    /// Remove a finished run.
    Clear { id: String },
    /// Remove every run that is not running.
    ClearAll,
    /// Print a run's report.
    Report { id: String },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let server = cli
        .server
        .or_else(|| std::env::var("BACKTESTER_SERVER").ok())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());

    match cli.command {
        Commands::Serve { settings } => run_serve(settings.as_deref()),
        Commands::Run { file, output, csv_base_dir } => run_local(&file, output.as_deref(), csv_base_dir),
        Commands::Validate { file } => run_validate(&file),
        command => {
            let client = Client::new(server);
            run_client(&client, command)
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")
}

fn run_serve(settings_path: Option<&Path>) -> Result<()> {
    let settings = ServerSettings::load(settings_path)?;
    if let Err(e) = init_tracing(settings.log_format) {
        eprintln!("tracing already initialised: {e}");
    }
    tracing::info!(
        addr = %settings.listen_addr,
        reports = ?settings.report_path,
        paper_exchanges = settings.paper_exchanges.len(),
        "starting backtester server"
    );

    let manager = Arc::new(RunManager::new(settings.manager_settings(), settings.services()));
    runtime()?.block_on(async move {
        let listener = tokio::net::TcpListener::bind(settings.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
        backtester_runner::api::serve(listener, manager, backtester_runner::api::shutdown_signal()).await?;
        Ok(())
    })
}

fn run_local(file: &Path, output: Option<&Path>, csv_base_dir: Option<PathBuf>) -> Result<()> {
    let _ = init_tracing(LogFormat::Pretty);
    let mut settings = ServerSettings::load(None)?;
    settings.csv_base_dir = csv_base_dir
        .or(settings.csv_base_dir)
        .or_else(|| file.parent().map(Path::to_path_buf));
    let manager = RunManager::new(ManagerSettings::default(), settings.services());

    let report = runtime()?.block_on(async {
        let id = manager.create_from_file(file)?;
        manager.start(id)?;
        manager.wait(id).await?;
        manager.run_report(id).await
    })?;

    print_report(&report);
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Report saved to: {}", path.display());
    }
    if let Some(error) = &report.summary.error {
        bail!("run ended {}: {error}", report.summary.state);
    }
    Ok(())
}

fn run_validate(file: &Path) -> Result<()> {
    let cfg = load_config(file)?;
    StrategyRegistry::with_defaults()
        .build(&cfg.strategy_settings)
        .with_context(|| format!("strategy '{}' rejected its settings", cfg.strategy_settings.name))?;
    println!("OK: {} ({} pairs)", cfg.display_name(), cfg.currency_settings.len());
    println!("Fingerprint: {}", cfg.fingerprint());
    Ok(())
}

fn run_client(client: &Client, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            let runs: RunsResponse = client.get("listallruns", &[])?;
            print_runs(&runs.runs);
        }
        Commands::Execute { file, no_run } => {
            let path = file.canonicalize().unwrap_or(file);
            let no_run = no_run.to_string();
            let response: RunResponse = client.get(
                "executestrategyfromfile",
                &[("path", &*path.to_string_lossy()), ("do_not_run_immediately", no_run.as_str())],
            )?;
            print_runs(&[response.run]);
        }
        Commands::Start { id } => {
            let response: RunResponse = client.get("startrunbyid", &[("id", id.as_str())])?;
            print_runs(&[response.run]);
        }
        Commands::Stop { id } => {
            let response: RunResponse = client.get("stoprunbyid", &[("id", id.as_str())])?;
            print_runs(&[response.run]);
        }
        Commands::StopAll => {
            let response: StopAllResponse = client.get("stopallruns", &[])?;
            print_runs(&response.stopped);
            for err in &response.errors {
                println!("{}: {} ({})", err.id, err.message, err.code);
            }
        }
        Commands::Clear { id } => {
            let response: RunResponse = client.get("clearrun", &[("id", id.as_str())])?;
            println!("Cleared {}", response.run.id);
        }
        Commands::ClearAll => {
            let response: ClearAllResponse = client.get("clearallruns", &[])?;
            println!("Cleared {} run(s), {} still running.", response.cleared.len(), response.remaining.len());
        }
        Commands::Report { id } => {
            let report: Value = client.get("runreport", &[("id", id.as_str())])?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve { .. } | Commands::Run { .. } | Commands::Validate { .. } => {
            bail!("not a client command")
        }
    }
    Ok(())
}

/// Blocking JSON client for the `/v1` routes.
struct Client {
    base: String,
    http: reqwest::blocking::Client,
}

impl Client {
    fn new(base: String) -> Self {
        Self { base: base.trim_end_matches('/').to_string(), http: reqwest::blocking::Client::new() }
    }

    fn get<T: serde::de::DeserializeOwned>(&self, method: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/v1/{method}", self.base);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            match serde_json::from_str::<ApiError>(&body) {
                Ok(err) => bail!("{} ({}): {}", err.code, status.as_u16(), err.message),
                Err(_) => bail!("{}: {}", status, body.trim()),
            }
        }
        serde_json::from_str(&body).with_context(|| format!("unexpected response from {url}"))
    }
}

fn print_runs(runs: &[RunSummary]) {
    if runs.is_empty() {
        println!("No runs.");
        return;
    }
    println!("{:<38} {:<20} {:<18} {:<10} {:<5}", "ID", "Nickname", "Strategy", "State", "Live");
    println!("{}", "-".repeat(95));
    for run in runs {
        println!(
            "{:<38} {:<20} {:<18} {:<10} {:<5}",
            run.id.to_string(),
            run.nickname,
            run.strategy,
            run.state.to_string(),
            if run.live { "yes" } else { "no" }
        );
        if let Some(error) = &run.error {
            println!("  error: {error}");
        }
    }
}

fn print_report(report: &RunReport) {
    let metrics = &report.statistics.metrics;
    println!();
    println!("=== Run Report ===");
    println!("Run:            {}", report.summary.id);
    println!("Strategy:       {}", report.summary.strategy);
    println!("State:          {}", report.summary.state);
    println!("Fingerprint:    {}", report.fingerprint);
    println!("Periods:        {}", metrics.periods);
    println!("Fills:          {}", metrics.fill_count);
    println!("Fees:           {:.4}", metrics.total_fees);
    println!();
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", metrics.total_return * 100.0);
    println!("CAGR:           {:.2}%", metrics.cagr * 100.0);
    println!("Sharpe:         {:.3}", metrics.sharpe);
    println!("Sortino:        {:.3}", metrics.sortino);
    println!("Calmar:         {:.3}", metrics.calmar);
    println!("Max Drawdown:   {:.2}%", metrics.max_drawdown * 100.0);
    println!("Realized PnL:   {:.4}", metrics.realized_pnl);
    println!("Total Value:    {:.4}", report.total_value);
    println!();
    println!("--- Pairs ---");
    for pair in &report.statistics.pairs {
        println!(
            "{:<28} events {:>6}  buys {:>5}  sells {:>5}  move {:>7.2}%",
            pair.key.to_string(),
            pair.events,
            pair.buy_fills,
            pair.sell_fills,
            pair.market_movement_percent
        );
    }
    for err in &report.statistics.errors {
        println!("WARNING: {} {}", err.timestamp, err.message);
    }
    println!();
}
