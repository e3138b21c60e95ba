//! Frame-extraction worker binary.
//!
//! Usage: `vframe-worker [--job payload.json]... <video-or-dir>...`
//!
//! Prints one JSON `ProcessingResult` per video on stdout and exits
//! non-zero when any video failed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vframe_media::{FfmpegSampler, TranscodeBackend};
use vframe_models::VideoJob;
use vframe_worker::{
    build_jobs, discover_videos, load_jobs, metrics, BatchExecutor, ProcessorOptions, VideoProcessor, WorkerConfig,
};

const DEFAULT_LOG_FILTER: &str = "vframe_worker=info,vframe_media=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vframe-worker");

    let config = WorkerConfig::from_env();
    config.validate()?;
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!(%addr, "Serving Prometheus metrics");
    }

    let jobs = collect_jobs(std::env::args().skip(1), &config)?;
    if jobs.is_empty() {
        bail!("no videos to process; usage: vframe-worker [--job payload.json]... <video-or-dir>...");
    }

    let sampler = Arc::new(FfmpegSampler::new().context("ffmpeg is required for frame sampling")?);
    let failed = run_batch(jobs, sampler, &config).await?;
    if failed > 0 {
        warn!(failed, "Some videos failed");
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // Logs go to stderr; stdout carries the results.
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }
}

fn collect_jobs(mut args: impl Iterator<Item = String>, config: &WorkerConfig) -> Result<Vec<VideoJob>> {
    let mut jobs = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--job" {
            let path = args.next().context("--job needs a payload file")?;
            jobs.extend(load_jobs(&PathBuf::from(&path)).with_context(|| format!("reading job payload {}", path))?);
            continue;
        }
        let videos = discover_videos(&PathBuf::from(&arg))?;
        jobs.extend(build_jobs(&videos, &config.frames_dir, &config.tuning));
    }
    Ok(jobs)
}

#[cfg(not(feature = "libav"))]
fn backend() -> Result<vframe_media::PipeBackend> {
    vframe_media::PipeBackend::new().context("ffmpeg is required for transcoding")
}

#[cfg(feature = "libav")]
fn backend() -> Result<vframe_media::LibavBackend> {
    vframe_media::LibavBackend::new().context("libav initialisation failed")
}

async fn run_batch(jobs: Vec<VideoJob>, sampler: Arc<FfmpegSampler>, config: &WorkerConfig) -> Result<usize> {
    let backend = backend()?;
    info!(backend = backend.name(), videos = jobs.len(), "Processing batch");
    let processor = VideoProcessor::new(backend, sampler, ProcessorOptions::from(config));
    let executor = BatchExecutor::new(processor, config.pool_size());

    let results = executor.run(jobs).await;
    let mut failed = 0;
    for result in &results {
        if !result.success {
            failed += 1;
        }
        println!("{}", serde_json::to_string(result)?);
    }
    Ok(failed)
}
