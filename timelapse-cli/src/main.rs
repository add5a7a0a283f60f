//! Satellite imagery time-lapse CLI
//!
//! Renders a short video of yearly satellite imagery around a point.
//!
//! ## Direct invocation
//!
//!   timelapse run --lat 4.5 --lon 12.5 -y 2023 -y 2024 -y 2025 -o congo.mp4
//!
//! ## HTTP server
//!
//!   timelapse serve --port 8000
//!
//! then `POST /generate-video` with `{"lat": 4.5, "lon": 12.5, "years": [2023, 2024]}`.
//!
//! ## YAML config file
//!
//! Both subcommands accept `--config`; see `timelapse_core::PipelineConfig`
//! for every key. Command line flags take precedence over file values.
//!
//! ```yaml
//! half_width_degrees: 0.25
//! default_years: [2024, 2025]
//! fetch:
//!   concurrency: 2
//!   retries: 1
//! ```
//!
//! ## Graceful interruption
//!
//! In `run` mode, Ctrl+C stops the run at the next stage or frame boundary and
//! removes its working files unless `--keep-artifacts` is set. A running ffmpeg
//! is left to finish its file first.

mod server;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing_subscriber::EnvFilter;

use timelapse_core::{Error, Pipeline, PipelineConfig, RunEvent, RunRequest, Stage, VideoArtifact};

#[derive(Parser, Debug)]
#[command(name = "timelapse")]
#[command(about = "Render satellite imagery time-lapse videos", long_about = None)]
#[command(arg_required_else_help = true)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the frames/ and output/ working directories
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Log filter (e.g. "debug", "timelapse_core=trace"); defaults to $RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one video and write it to disk
    Run(RunArgs),
    /// Serve POST /generate-video over HTTP
    Serve(ServeArgs),
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Latitude of the point of interest
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Longitude of the point of interest
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Year to include (repeatable; defaults to the configured years)
    #[arg(short = 'y', long = "year")]
    years: Vec<i32>,

    /// Output video path (defaults to the configured output name)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Degrees around the point on each side
    #[arg(long)]
    half_width: Option<f64>,

    /// Maximum concurrent frame downloads
    #[arg(long)]
    concurrency: Option<usize>,

    /// Extra attempts for frames that fail at the network level
    #[arg(long)]
    retries: Option<u32>,

    /// Keep frames, diagnostics and the GIF after the run
    #[arg(long)]
    keep_artifacts: bool,
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8000")]
    port: u16,
}

fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {:?}", path))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {:?}", path))
}

fn init_tracing(filter: Option<&str>, fallback: &str) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(work_dir) = &args.work_dir {
        config.work_dir = work_dir.clone();
    }

    match args.command {
        Command::Run(run) => {
            // keep the progress bar readable unless asked otherwise
            init_tracing(args.log_level.as_deref(), "warn");
            run_once(config, run).await
        }
        Command::Serve(serve) => {
            init_tracing(args.log_level.as_deref(), "info");
            serve_http(config, serve.port).await
        }
    }
}

/// Direct-invocation adapter.
async fn run_once(mut config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(half_width) = args.half_width {
        config.half_width_degrees = half_width;
    }
    if let Some(concurrency) = args.concurrency {
        config.fetch.concurrency = concurrency;
    }
    if let Some(retries) = args.retries {
        config.fetch.retries = retries;
    }
    config.keep_artifacts |= args.keep_artifacts;
    let keep_artifacts = config.keep_artifacts;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.transcode.output_name));

    // Set up SIGINT handler
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to set Ctrl-C handler")?;
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::new(config)?
        .with_events(events_tx)
        .with_interrupt(interrupted.clone());
    let progress = tokio::spawn(report_progress(events_rx));

    let request = RunRequest {
        lat: args.lat,
        lon: args.lon,
        years: (!args.years.is_empty()).then_some(args.years),
    };

    let start = Instant::now();
    let result = pipeline.run(request, |video| deliver_to(video, output)).await;

    // closes the event channel so the progress task can finish
    drop(pipeline);
    progress.await??;

    let report = match result {
        Ok(report) => report,
        Err(Error::Cancelled { stage }) => {
            eprintln!("{}", cancelled_message(stage, keep_artifacts));
            return Ok(());
        }
        Err(err) => return Err(err).context("time-lapse run failed"),
    };

    println!(
        "Output saved to: {:?} ({} frames, run {})",
        report.delivered, report.animation.frame_count, report.run_id
    );
    for failed in report.summary.failed() {
        if let Some(reason) = failed.failure() {
            match reason.diagnostic() {
                Some(path) => println!("  skipped {}: {} (response saved to {:?})", failed.year(), reason, path),
                None => println!("  skipped {}: {}", failed.year(), reason),
            }
        }
    }
    println!("Run time: {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn cancelled_message(stage: Stage, keep_artifacts: bool) -> String {
    if keep_artifacts {
        format!("Interrupted while {stage}, working files kept.")
    } else {
        format!("Interrupted while {stage}, working files removed.")
    }
}

/// Copy the finished video to where the user asked for it.
async fn deliver_to(video: VideoArtifact, output: PathBuf) -> timelapse_core::Result<PathBuf> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&video.path, &output).await?;
    Ok(output)
}

/// Drive a progress bar from pipeline events until the channel closes.
async fn report_progress(mut events: UnboundedReceiver<RunEvent>) -> anyhow::Result<()> {
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut failed = 0;
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Planned { years, .. } => {
                progress.set_length(years.len() as u64);
                progress.set_message("downloading");
            }
            RunEvent::Frame { year, ok, .. } => {
                if !ok {
                    failed += 1;
                    progress.println(format!("Warning: no usable image for {year}"));
                }
                progress.inc(1);
            }
            RunEvent::Stage { stage: Stage::Failed, .. } => {
                progress.abandon_with_message("failed");
            }
            RunEvent::Stage { stage: Stage::Done, .. } => {
                progress.finish_with_message(match failed {
                    0 => "done".to_string(),
                    n => format!("done ({n} skipped)"),
                });
            }
            RunEvent::Stage { stage, .. } => {
                progress.set_message(stage.to_string());
            }
        }
    }
    Ok(())
}

/// HTTP adapter.
async fn serve_http(config: PipelineConfig, port: u16) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::new(config)?);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "server running");

    axum::serve(listener, server::router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(?error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
