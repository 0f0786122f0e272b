//! Frame ingestion sources.
//!
//! This module provides the sources the frame loop pulls from:
//! - Synthetic source (`stub://`), a scripted street scene for model-free runs
//! - Image directory replay (a local directory of JPEG/PNG frames, or one image)
//! - USB/CSI cameras via V4L2 (`/dev/video*`, feature: ingest-v4l2)
//!
//! Every source yields RGB24 `Frame`s stamped with a monotonic capture instant.
//! Sources own the camera handle; `release` hands it back and is safe to call
//! more than once.

pub mod image_dir;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::SourceSettings;
use crate::frame::Frame;

pub use image_dir::{read_still_frame, ImageDirSource};
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Camera capability consumed by the frame loop.
pub trait FrameSource: Send {
    /// Connect to the device. Failure here is fatal to the pipeline.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. `Ok(None)` marks the end of a finite stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device.
    fn release(&mut self);

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub location: String,
}

/// Open the source described by `settings.url`.
///
/// - `stub://<name>`: synthetic scene
/// - `/dev/video<N>`: V4L2 camera
/// - any other local path: directory of still frames, or a single image
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    if url.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(settings.clone())));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!("camera {} requires the ingest-v4l2 feature", url));
        }
    }
    if url.is_empty() || url.contains("://") {
        return Err(anyhow!(
            "unsupported frame source {:?} (expected stub://, /dev/video* or a local path)",
            url
        ));
    }
    Ok(Box::new(ImageDirSource::new(
        Path::new(url),
        settings.target_fps,
    )))
}

/// Capture clock for sources that replay at a fixed rate.
///
/// Frame `n` is stamped `start + n / fps`, so replays see the same spacing
/// the camera had regardless of how fast they are processed. With `fps == 0`
/// frames are stamped with the real time they were produced.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReplayClock {
    start: Option<Instant>,
    interval: Option<Duration>,
}

impl ReplayClock {
    pub(crate) fn new(target_fps: u32) -> Self {
        let interval = (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64));
        Self {
            start: None,
            interval,
        }
    }

    /// Capture instant for the frame at zero-based `index`.
    pub(crate) fn stamp(&mut self, index: u64) -> Instant {
        let Some(interval) = self.interval else {
            return Instant::now();
        };
        let start = *self.start.get_or_insert_with(Instant::now);
        start + interval.mul_f64(index as f64)
    }
}
