//! Forecast point-extraction archiver.
//!
//! Extracts station values for one model/element pair from remote forecast
//! files, month by month, and merges them into deduplicated Parquet
//! partitions on local disk or S3.

mod config;
mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use archive_common::{Domain, Element, Model};
use archive_store::{ArchiveStore, ArchiveWriter};
use chrono::NaiveDate;
use clap::Parser;
use extraction::{
    adapter_for, element_spec, HttpClient, Orchestrator, OrchestratorConfig, StationCatalog,
    SynopticClient,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::ArchiverConfig;
use run::{station_query, ArchiveRun};

#[derive(Parser, Debug)]
#[command(name = "model-archiver")]
#[command(about = "Archive station point forecasts from NBM, HRRR and URMA")]
struct Args {
    /// Model: nbm, nbmqmd, nbmqmd_exp, hrrr or urma
    #[arg(long, env = "ARCHIVER_MODEL")]
    model: String,

    /// Element: Wind, Gust, precip6hr, precip24hr, snow6hr, snow24hr, maxt, mint
    #[arg(long, env = "ARCHIVER_ELEMENT")]
    element: String,

    /// First day to archive (YYYY-MM-DD)
    #[arg(long)]
    start: String,

    /// Last day to archive, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: String,

    /// Domain code (ak, co, hi)
    #[arg(long, default_value = "ak")]
    domain: String,

    /// Run configuration file
    #[arg(long, env = "ARCHIVER_CONFIG", default_value = "config/archiver.yaml")]
    config: PathBuf,

    /// Concurrent file tasks (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Local archive root (overrides config)
    #[arg(long, env = "ARCHIVE_ROOT")]
    archive_root: Option<PathBuf>,

    /// Write to the configured S3 bucket instead of local disk
    #[arg(long)]
    s3: bool,

    /// Station list JSON cache
    #[arg(long)]
    stations: Option<PathBuf>,

    /// State to select stations from (overrides config)
    #[arg(long)]
    state: Option<String>,

    /// Comma-separated station network ids (overrides config)
    #[arg(long)]
    network: Option<String>,

    /// Station metadata API token
    #[arg(long, env = "SYNOPTIC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Validate everything before touching the network
    let model: Model = args.model.parse()?;
    let element: Element = args.element.parse()?;
    let domain: Domain = args.domain.parse()?;
    element_spec(model, element)?;

    let start = parse_date(&args.start)?;
    let end = parse_date(&args.end)?;
    if end < start {
        bail!("End date {} is before start date {}", end, start);
    }

    let config = ArchiverConfig::load(&args.config)?;
    let workers = args.workers.unwrap_or(config.max_workers);

    info!(
        model = %model,
        element = %element,
        domain = %domain,
        start = %start,
        end = %end,
        workers = workers,
        "Starting model archiver"
    );

    let http = HttpClient::new(config.http_settings(), config.retry_policy())?;

    let state = args.state.unwrap_or_else(|| config.stations.state.clone());
    let network = args.network.unwrap_or_else(|| config.stations.network.clone());
    let stations_path = args.stations.unwrap_or_else(|| {
        config
            .stations
            .cache_dir
            .join(format!("{}_{}_{}.json", state.to_lowercase(), model, element))
    });
    let query = station_query(args.token.unwrap_or_default(), &state, &network, element);
    let client = SynopticClient::new(http.clone(), config.stations.metadata_url.clone());
    let catalog = StationCatalog::load_or_fetch(&stations_path, &client, &query)
        .await
        .context("Failed to load station metadata")?;
    if catalog.is_empty() {
        bail!("No stations in {}", stations_path.display());
    }

    let store = if args.s3 {
        let settings = config
            .archive
            .s3
            .as_ref()
            .context("--s3 requires archive.s3 in the config file")?;
        ArchiveStore::s3(settings)?
    } else {
        ArchiveStore::local(args.archive_root.unwrap_or_else(|| config.archive.local_root.clone()))
    };
    info!(store = ?store, stations = catalog.len(), "Archive target ready");

    let orchestrator_config = OrchestratorConfig {
        workers,
        task_timeout: Duration::from_secs(config.task_timeout_secs),
        download_dir: config.download_dir.clone(),
        keep_downloads: false,
    };
    let orchestrator = Orchestrator::new(
        http,
        adapter_for(model, config.base_url(model)),
        orchestrator_config,
    );

    orchestrator
        .remove_stale_downloads()
        .await
        .context("Failed to clear stale downloads")?;

    let run = ArchiveRun {
        model,
        element,
        domain,
        forecast_hours: config.forecast_hours_for(model, element),
        orchestrator,
        writer: ArchiveWriter::new(store),
    };
    run.run(start, end, &catalog.stations).await?;

    let stats = run.orchestrator.cache_stats();
    info!(
        cached_cells = stats.entries,
        hit_rate = stats.hit_rate(),
        "Shutting down"
    );
    Ok(())
}
