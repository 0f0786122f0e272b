//! Synthetic street scene (`stub://`).
//!
//! Renders a dark background and, during periodic "visits", a bright
//! plate-shaped rectangle in the middle of the frame. Visits last long enough
//! for one dwell confirmation at the default settings and are separated by
//! empty stretches, so the full arm/confirm/abandon cycle can be exercised
//! without a camera or a model.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{FrameSource, ReplayClock, SourceStats};
use crate::config::SourceSettings;
use crate::frame::Frame;

/// Frames per visit cycle with the plate in view.
const VISIT_FRAMES: u64 = 40;
/// Frames per visit cycle with an empty street.
const GAP_FRAMES: u64 = 30;

pub struct SyntheticSource {
    settings: SourceSettings,
    clock: ReplayClock,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            clock: ReplayClock::new(settings.target_fps),
            settings,
            frame_count: 0,
            connected: false,
        }
    }

    /// True when the plate is drawn in frame `index` (zero-based).
    pub fn plate_visible(index: u64) -> bool {
        index % (VISIT_FRAMES + GAP_FRAMES) < VISIT_FRAMES
    }

    fn render(&self, index: u64) -> RgbImage {
        let (width, height) = (self.settings.width, self.settings.height);
        let mut image = RgbImage::from_fn(width, height, |x, y| {
            let shade = ((x as u64 + y as u64 + index) % 64) as u8;
            Rgb([shade, shade, shade / 2])
        });

        if Self::plate_visible(index) {
            let plate_w = width / 4;
            let plate_h = height / 12;
            let x0 = (width - plate_w) / 2;
            let y0 = (height - plate_h) / 2;
            for y in y0..y0 + plate_h {
                for x in x0..x0 + plate_w {
                    image.put_pixel(x, y, Rgb([240, 240, 235]));
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        if self.settings.width < 12 || self.settings.height < 12 {
            return Err(anyhow!(
                "synthetic source needs at least 12x12 frames, got {}x{}",
                self.settings.width,
                self.settings.height
            ));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.settings.url,
            self.settings.width,
            self.settings.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.settings.url));
        }
        let index = self.frame_count;
        self.frame_count += 1;
        let captured_at = self.clock.stamp(index);
        Ok(Some(Frame::new(self.render(index), captured_at, self.frame_count)))
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("SyntheticSource: released {}", self.settings.url);
        }
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.settings.url.clone(),
        }
    }
}
