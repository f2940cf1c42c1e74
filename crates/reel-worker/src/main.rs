//! Highlight reel worker binary.
//!
//! Usage: `reel-worker <video> [--detect-only] [--select <id,id,...>] [--captions]`
//!
//! Clusters the people in `<video>`, then renders a reel following the
//! selected identities (all of them unless `--select` is given).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_media::FfmpegVideoIo;
use reel_ml_client::{DetectionClient, MlClientConfig, TranscriptionClient};
use reel_models::{IdentityId, Job, JobType, Video};
use reel_worker::{
    Capabilities, CapabilityRegistry, JobOutcome, JobStore, MemoryStore, Pipeline, WorkerConfig,
    WorkerError,
};

struct Args {
    video: String,
    detect_only: bool,
    select: Option<Vec<IdentityId>>,
    captions: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut video = None;
    let mut detect_only = false;
    let mut select = None;
    let mut captions = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--detect-only" => detect_only = true,
            "--captions" => captions = true,
            "--select" => {
                let ids = args.next().context("--select needs a comma-separated list")?;
                select = Some(
                    ids.split(',')
                        .filter(|s| !s.is_empty())
                        .map(IdentityId::from)
                        .collect(),
                );
            }
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => video = Some(other.to_string()),
        }
    }

    Ok(Args {
        video: video.context("usage: reel-worker <video> [--detect-only] [--select ids] [--captions]")?,
        detect_only,
        select,
        captions,
    })
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "reel=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for HTTPS model endpoints)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        bail!("failed to install rustls crypto provider");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    let args = parse_args()?;
    let config = WorkerConfig::from_env()?;
    config.validate()?;
    info!("Worker config: {:?}", config);

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("METRICS_ADDR")?;
        reel_worker::metrics::init_metrics(addr)?;
        info!(%addr, "Serving metrics");
    }

    let registry = CapabilityRegistry::new();
    let capabilities = registry
        .get_or_init(|| async {
            let ml = MlClientConfig::from_env();
            let detector = DetectionClient::new(&ml).map_err(|e| WorkerError::config(e.to_string()))?;
            let transcriber =
                TranscriptionClient::new(&ml).map_err(|e| WorkerError::config(e.to_string()))?;
            Ok(Capabilities::new(Arc::new(detector)).with_transcriber(Arc::new(transcriber)))
        })
        .await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling");
            cancel_tx.send(true).ok();
        }
    });

    let io = FfmpegVideoIo::new()
        .with_cancel(cancel_rx.clone())
        .with_timeout(config.ffmpeg_timeout.as_secs());
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(config, Arc::new(io), store.clone(), capabilities).with_cancel(cancel_rx);

    let video = Video::new(&args.video);
    let video_id = video.id.clone();
    store.insert_video(video).await;

    let detection = Job::new(video_id.clone(), JobType::IdentityDetection);
    store.insert_job(detection.clone()).await?;
    let identities = match pipeline.run(&detection.id).await? {
        JobOutcome::Identities(report) => report.identities,
        JobOutcome::Rendered(_) => bail!("identity detection produced a render"),
    };
    println!("{}", serde_json::to_string_pretty(&identities)?);

    if args.detect_only {
        return Ok(());
    }

    let selected = args
        .select
        .unwrap_or_else(|| identities.iter().map(|i| i.id.clone()).collect());
    let render = Job::new(video_id.clone(), JobType::HighlightRender)
        .with_selection(selected)
        .with_captions(args.captions);
    store.insert_job(render.clone()).await?;

    let outcome = pipeline.run(&render.id).await?;
    let video = store.get_video(&video_id).await?;
    info!(
        output = video.processed_path.as_deref().unwrap_or_default(),
        "Highlight reel ready"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
