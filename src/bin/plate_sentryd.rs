//! plate_sentryd - license plate sentry daemon
//!
//! This daemon:
//! 1. Loads configuration (`--config` or `PLATE_SENTRY_CONFIG`, then env overrides)
//! 2. Opens the frame source, detector, recognizer and plate store
//! 3. Runs the frame loop until Ctrl-C, end of stream or `--max-frames`
//! 4. Releases the camera and logs a run summary
//!
//! With `--image <file>` it instead checks one photo: the detector runs once
//! and the best detection is recognized and stored without the dwell gate.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use plate_sentry::{
    check_still_image, FrameLoop, PlateSentryConfig, RecognitionOutcome, StopSignal,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json). Overrides PLATE_SENTRY_CONFIG.
    #[arg(long, env = "PLATE_SENTRY_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after processing this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Check a single photo instead of running the frame loop.
    #[arg(long, value_name = "FILE", conflicts_with = "max_frames")]
    image: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = PlateSentryConfig::load_from(args.config.as_deref())?;
    if let Some(image) = args.image.as_deref() {
        match check_still_image(&cfg, image)? {
            None => log::info!("{}: no plate found", image.display()),
            Some(RecognitionOutcome::NoText) => {
                log::info!("{}: plate unreadable", image.display())
            }
            Some(RecognitionOutcome::Rejected(text)) => {
                log::info!("{}: {} rejected by plate pattern", image.display(), text)
            }
            Some(RecognitionOutcome::Stored(record)) => {
                log::info!("{}: stored {}", image.display(), record.plate_text)
            }
            Some(RecognitionOutcome::Duplicate(text)) => {
                log::info!("{}: {} already stored", image.display(), text)
            }
        }
        return Ok(());
    }

    log::info!(
        "plate_sentryd {} starting: source={} db={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.db_path
    );
    log::info!(
        "gate: confidence_threshold={:.2} drop_threshold={:.2} dwell={:?}",
        cfg.gate.confidence_threshold,
        cfg.gate.drop_threshold,
        cfg.gate.dwell
    );

    let mut frame_loop = FrameLoop::from_config(&cfg)?.with_max_frames(args.max_frames);

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.stop();
    })
    .expect("error setting Ctrl-C handler");

    let summary = frame_loop.run(&stop)?;
    log::info!(
        "plate_sentryd stopped ({:?}): frames={} detections={} triggers={} stored={} duplicates={} no_text={} rejected={} storage_failures={}",
        summary.stop_reason,
        summary.frames,
        summary.frames_with_detection,
        summary.triggers,
        summary.stored,
        summary.duplicates,
        summary.no_text,
        summary.rejected,
        summary.storage_failures
    );
    log::info!(
        "plate store {} holds {} plates",
        cfg.db_path,
        frame_loop.store().count()?
    );
    Ok(())
}
