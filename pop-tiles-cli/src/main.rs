use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pop_tiles::source::{HttpRasterSource, LocalRasterSource, RasterSource};
use pop_tiles::{
    AccessToken, BatchReport, CancellationToken, CountryOutcome, HttpTileService, ProjectConfig,
    RenderPipeline, TileUploader, TilesetNamer,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ISO3 codes of the countries to render, comma separated
    #[arg(short, long, env = "MAPBOX_COUNTRIES", value_delimiter = ',')]
    countries: Vec<String>,

    /// Access token for the tile service
    #[arg(short, long, env = "MAPBOX_AUTH", hide_env_values = true)]
    auth: Option<String>,

    /// Project configuration (legend, source and upload settings)
    #[arg(long, value_name = "FILE", default_value = "config/project_configuration.yml")]
    config: PathBuf,

    /// Read `<iso>_ppp_<year>.tif` from this directory instead of downloading
    #[arg(long, value_name = "DIR")]
    raster_dir: Option<PathBuf>,

    /// Working directory (default: a temporary directory removed on exit)
    #[arg(short, long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Number of render threads (default: number of CPU cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Give up on remaining countries after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Render only, do not upload (requires --work-dir)
    #[arg(long)]
    render_only: bool,

    /// Seed for tileset ids and names
    #[arg(long)]
    seed: Option<u64>,

    /// Write the iso -> {mapid, name} result as JSON
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let start_time = std::time::Instant::now();

    info!("##### pop-tiles #####");

    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    // a bad legend affects every country, so fail before touching any of them
    let config = ProjectConfig::from_path(&args.config)
        .with_context(|| format!("Failed to load configuration {:?}", args.config))?;
    let legend = config.legend().context("Invalid legend configuration")?;

    let countries = normalize_countries(&args.countries);
    if countries.is_empty() {
        warn!("No countries provided for tile uploads");
        return Ok(());
    }

    if args.render_only && args.work_dir.is_none() {
        anyhow::bail!("--render-only needs --work-dir to keep the rendered rasters");
    }
    let token = match (&args.auth, args.render_only) {
        (Some(auth), _) => Some(AccessToken::new(auth.clone())),
        (None, true) => None,
        (None, false) => anyhow::bail!("No tile service credentials, set --auth or MAPBOX_AUTH"),
    };

    let cancel = match args.deadline_secs {
        Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
        None => CancellationToken::new(),
    };

    // keep the temporary directory alive until the run is over
    let temp_dir;
    let work_dir = match &args.work_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            dir.clone()
        }
        None => {
            temp_dir = tempfile::Builder::new()
                .prefix("TempSubnationalPopulation")
                .tempdir()
                .context("Failed to create working directory")?;
            temp_dir.path().to_path_buf()
        }
    };
    info!("Working directory: {:?}", work_dir);

    let source: Box<dyn RasterSource> = match &args.raster_dir {
        Some(dir) => Box::new(LocalRasterSource::new(dir, config.raster.year)),
        None => Box::new(HttpRasterSource::new(
            config.raster.source_url.clone(),
            config.raster.year,
            Duration::from_secs(config.raster.download_timeout_secs),
        )?),
    };

    let pipeline = RenderPipeline::new(
        source,
        legend,
        &work_dir,
        config.raster.max_width,
        cancel.clone(),
    );

    let report = match token {
        Some(token) => {
            let service = HttpTileService::new(
                config.upload.endpoint.clone(),
                Duration::from_secs(config.upload.request_timeout_secs),
            )?;
            let uploader = TileUploader::new(
                service,
                TilesetNamer::new(config.upload.owner.clone(), config.raster.year, args.seed),
                config.upload.retry_policy(),
                cancel,
            );
            pipeline.run(&countries, &uploader, &token)
        }
        None => pipeline.render_all(&countries),
    };

    log_report(&report);

    if let Some(path) = &args.summary {
        write_summary(&report, path)?;
    }

    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}

fn normalize_countries(countries: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = countries
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

fn log_report(report: &BatchReport) {
    for (iso, outcome) in &report.outcomes {
        match outcome {
            CountryOutcome::Uploaded(tileset) => info!("{}: {}", iso, tileset.map_id),
            CountryOutcome::Rendered(raster) => info!("{}: {:?}", iso, raster.path),
            _ => {}
        }
    }

    let failures = report.failures();
    if failures > 0 {
        error!(
            "{} of {} countries failed or were skipped",
            failures,
            report.outcomes.len()
        );
    }
}

fn write_summary(report: &BatchReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&report.uploaded())?;
    fs::write(path, json).with_context(|| format!("Failed to write summary {:?}", path))?;
    info!("Written summary: {:?}", path);
    Ok(())
}
