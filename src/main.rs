use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vulndash_rs::config::Settings;
use vulndash_rs::context::ServiceContext;
use vulndash_rs::dispatch::validate_target;
use vulndash_rs::parser::parse_scan_output;
use vulndash_rs::scanner::{NmapScanner, ScanCapability};
use vulndash_rs::server;
use vulndash_rs::store::{FindingStore, SqliteFindingStore};
use vulndash_rs::types::Finding;

/// vulndash-rs: vulnerability dashboard backend running nmap scans as background jobs.
#[derive(Debug, Parser)]
#[command(
    name = "vulndash-rs",
    version,
    about = "Vulnerability dashboard backend running nmap scans as background jobs.",
    long_about = None
)]
struct Cli {
    /// SQLite database file for findings.
    #[arg(long, global = true, env = "VULNDASH_DATABASE", default_value = "vulns.db")]
    database: PathBuf,

    /// Scanner binary.
    #[arg(long, global = true, env = "VULNDASH_NMAP", default_value = "nmap")]
    nmap: PathBuf,

    /// Extra scanner argument, repeatable (e.g. --nmap-arg=-T4).
    #[arg(long = "nmap-arg", global = true, allow_hyphen_values = true)]
    nmap_args: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the dashboard and run scan workers.
    Serve(ServeArgs),
    /// Scan one target now, store and print the findings.
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Listen address.
    #[arg(long, env = "VULNDASH_BIND", default_value = "127.0.0.1:5000")]
    bind: String,

    /// Scan jobs executing concurrently.
    #[arg(long, env = "VULNDASH_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Queued jobs before new submissions are refused.
    #[arg(long = "queue-capacity", default_value_t = 256)]
    queue_capacity: usize,

    /// Scanner timeout per job, in seconds.
    #[arg(long = "scan-timeout-secs", env = "VULNDASH_SCAN_TIMEOUT", default_value_t = 300)]
    scan_timeout_secs: u64,

    /// How long finished jobs stay queryable, in seconds.
    #[arg(long = "job-retention-secs", default_value_t = 86_400)]
    job_retention_secs: u64,

    /// Directory with static UI assets.
    #[arg(long = "ui-dir", default_value = "ui")]
    ui_dir: PathBuf,
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Target host, address or range.
    target: String,

    /// Scanner timeout in seconds.
    #[arg(long = "timeout-secs", default_value_t = 300)]
    timeout_secs: u64,

    /// Write the stored findings as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store = SqliteFindingStore::open(&cli.database)
        .with_context(|| format!("failed to open database {}", cli.database.display()))?;
    let scanner = NmapScanner::new(cli.nmap.clone(), cli.nmap_args.clone());

    match cli.command {
        Command::Serve(args) => {
            let settings = Settings {
                bind: args.bind,
                database: cli.database,
                workers: args.workers,
                queue_capacity: args.queue_capacity,
                scan_timeout: Duration::from_secs(args.scan_timeout_secs),
                job_retention: Duration::from_secs(args.job_retention_secs),
                nmap_program: cli.nmap,
                nmap_args: cli.nmap_args,
                ui_dir: args.ui_dir,
            };
            serve(settings, Arc::new(store), Arc::new(scanner)).await
        }
        Command::Scan(args) => scan_once(args, &store, &scanner).await,
    }
}

async fn serve(
    settings: Settings,
    store: Arc<dyn FindingStore>,
    scanner: Arc<dyn ScanCapability>,
) -> Result<()> {
    info!(
        bind = %settings.bind,
        database = %settings.database.display(),
        workers = settings.workers,
        scan_timeout_secs = settings.scan_timeout.as_secs(),
        nmap = %settings.nmap_program.display(),
        "starting vulndash-rs"
    );

    let services = ServiceContext::start(&settings, store, scanner);
    let app = server::router(services.context.clone(), &settings.ui_dir);
    let result = server::serve(&settings.bind, app, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;
    services.shutdown().await;
    result
}

async fn scan_once(args: ScanArgs, store: &SqliteFindingStore, scanner: &NmapScanner) -> Result<()> {
    let target = validate_target(Some(args.target.as_str()))?;
    println!("Scanning {target} ...");

    let raw = tokio::time::timeout(Duration::from_secs(args.timeout_secs), scanner.scan(target))
        .await
        .context("scan timed out")??;
    let findings = parse_scan_output(&raw, target)?;
    let rows = if findings.is_empty() {
        println!("No findings to save.");
        Vec::new()
    } else {
        let count = store.insert_many(findings).await?;
        let rows = store.list_recent(Some(count)).await?;
        print_findings_table(&rows);
        rows
    };

    if let Some(path) = args.output.as_deref() {
        write_findings_json(path, &rows)?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

/// Write `rows` as pretty JSON; an empty scan still produces `[]`.
fn write_findings_json(path: &Path, rows: &[Finding]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, rows)?;
    Ok(())
}

fn print_findings_table(rows: &[Finding]) {
    let mut target_w = "target".len();
    let mut service_w = "service".len();
    let mut state_w = "state".len();
    for r in rows {
        target_w = target_w.max(r.target.len());
        service_w = service_w.max(r.service.len().min(40));
        state_w = state_w.max(r.state.len());
    }
    let port_w = 5usize;

    println!("\nFindings saved: {}", rows.len());
    println!(
        "{:<target_w$}  {:>port_w$}  {:<service_w$}  {:<state_w$}",
        "target", "port", "service", "state",
    );
    println!(
        "{:-<target_w$}  {:-<port_w$}  {:-<service_w$}  {:-<state_w$}",
        "", "", "", "",
    );
    // Listed newest first; print in scan order.
    for r in rows.iter().rev() {
        let port = r.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        let service: String = r.service.chars().take(40).collect();
        println!(
            "{:<target_w$}  {:>port_w$}  {:<service_w$}  {:<state_w$}",
            r.target, port, service, r.state,
        );
    }
}
