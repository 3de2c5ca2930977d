use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mtail_core::{Config, DocumentExt, OutputFormat};
use mtail_kubehub::{ClusterApi, Fetcher, KubeCluster};
use mtail_tail::{DiffLogger, FacadeMetrics, Processor, Tail, WatchExit};
use tokio::{signal, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Deadline for one-shot commands talking to the cluster.
const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "mtail", version, about = "Mirror Kubernetes manifests to disk and report how they change")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Kubeconfig to use instead of the default discovery chain
    #[arg(long = "kubeconfig", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Directory manifests are written to
    #[arg(short = 'o', long = "output-directory", global = true)]
    output_directory: Option<PathBuf>,

    /// Manifest file format (yaml or json)
    #[arg(short = 'f', long = "output-format", global = true)]
    output_format: Option<OutputFormat>,

    /// Interval between full refreshes, e.g. 30m or 24h
    #[arg(long = "refresh-interval", global = true)]
    refresh_interval: Option<String>,

    /// Namespaces to include (comma-separated)
    #[arg(short = 'n', long = "namespaces", global = true, value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Namespaces to exclude (comma-separated)
    #[arg(long = "exclude-namespaces", global = true, value_delimiter = ',')]
    exclude_namespaces: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Fetch manifests, then keep watching and refreshing
    Run,
    /// Fetch manifests once and exit
    RunOnce,
    /// List the objects matched by the configuration
    List,
    /// Describe what the configuration collects
    Describe,
}

fn init_tracing() {
    let env = std::env::var("MTAIL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MTAIL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid MTAIL_METRICS_ADDR; expected host:port");
        }
    }
}

/// File, then `MTAIL_*` environment, then flags; validated last.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::load(&cli.config)?;
    cfg.apply_env_overrides().context("applying environment overrides")?;
    apply_flags(&mut cfg, cli);
    cfg.validate()?;
    Ok(cfg)
}

fn apply_flags(cfg: &mut Config, cli: &Cli) {
    if let Some(path) = &cli.kubeconfig {
        cfg.kubeconfig = Some(path.clone());
    }
    if let Some(dir) = &cli.output_directory {
        cfg.output.directory = dir.clone();
    }
    if let Some(format) = cli.output_format {
        cfg.output.format = format;
    }
    if let Some(interval) = &cli.refresh_interval {
        cfg.refresh_interval = Some(interval.clone());
    }
    if !cli.namespaces.is_empty() {
        cfg.namespaces = cli.namespaces.clone();
    }
    if !cli.exclude_namespaces.is_empty() {
        cfg.exclude_namespaces = cli.exclude_namespaces.clone();
    }
}

async fn connect(cfg: &Config) -> Result<Arc<dyn ClusterApi>> {
    let cluster = KubeCluster::connect(cfg.kubeconfig.as_deref()).await.context("create kubernetes client")?;
    Ok(Arc::new(cluster))
}

fn build_tail(api: Arc<dyn ClusterApi>, cfg: Config) -> Result<Tail> {
    let processor = Processor::from_config(&cfg)?;
    let sink = Arc::new(DiffLogger::from(cfg.logging.log_diffs));
    Ok(Tail::new(api, cfg, processor, sink).with_metrics(Arc::new(FacadeMetrics)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    match cli.command {
        Commands::Describe => print!("{}", cfg.describe()),
        Commands::List => {
            let api = connect(&cfg).await?;
            list(api, &cfg).await?;
        }
        Commands::RunOnce => {
            let tail = build_tail(connect(&cfg).await?, cfg)?;
            let total = tail.run_full_manifest_check(ONE_SHOT_TIMEOUT).await?;
            println!("Fetched {} manifest(s)", total);
        }
        Commands::Run => {
            let interval = cfg.refresh_interval()?;
            let tail = build_tail(connect(&cfg).await?, cfg)?;
            run(tail, interval).await?;
        }
    }
    Ok(())
}

/// Initial refresh, then watches plus a periodic refresh until Ctrl-C or the first failure.
async fn run(tail: Tail, interval: Duration) -> Result<()> {
    let total = tail.run_full_manifest_check(interval).await?;
    println!("Fetched {} manifest(s)", total);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down");
                cancel.cancel();
            }
        }
    });

    let refresher = tokio::spawn({
        let tail = tail.clone();
        let cancel = cancel.clone();
        async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = ticker.tick() => {}
                }
                let pass = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    res = tail.run_full_manifest_check(interval) => res,
                };
                match pass {
                    Ok(total) => println!("Fetched {} manifest(s)", total),
                    Err(e) => {
                        error!(error = %e, "periodic refresh failed");
                        cancel.cancel();
                        return Err(e);
                    }
                }
            }
        }
    });

    let watched = tail.watch_resources(cancel.clone()).await;
    cancel.cancel();
    let refreshed = refresher.await.context("refresh task failed")?;
    match watched? {
        WatchExit::Cancelled => info!("watches stopped"),
        WatchExit::Completed => info!("no watches left running"),
    }
    refreshed?;
    Ok(())
}

async fn list(api: Arc<dyn ClusterApi>, cfg: &Config) -> Result<()> {
    let fetcher = Fetcher::new(api, cfg);
    let deadline = Instant::now() + ONE_SHOT_TIMEOUT;
    let mut rows = vec![["KIND".to_string(), "NAMESPACE".to_string(), "NAME".to_string()]];
    for rule in &cfg.objects {
        for obj in fetcher.fetch(rule, deadline).await? {
            rows.push([rule.kind.clone(), obj.object_namespace().unwrap_or("-").to_string(), obj.object_name().to_string()]);
        }
    }
    print!("{}", render_table(&rows));
    Ok(())
}

fn render_table(rows: &[[String; 3]]) -> String {
    let mut widths = [0usize; 3];
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }
    let mut out = String::new();
    for row in rows {
        out.push_str(&format!("{:<w0$}  {:<w1$}  {}\n", row[0], row[1], row[2], w0 = widths[0], w1 = widths[1]));
    }
    out
}
