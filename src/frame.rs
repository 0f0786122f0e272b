//! Captured frames.
//!
//! A `Frame` owns an RGB24 image plus the monotonic instant it was captured.
//! The capture instant is the clock the confirmation gate runs on, so a
//! replayed or scripted stream produces the same dwell timing as a live one.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use std::time::Instant;

use crate::detect::{BoundingBox, Detection, PlateDetector};

pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: Instant, sequence: u64) -> Self {
        Self {
            image,
            captured_at,
            sequence,
        }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Instant,
        sequence: u64,
    ) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image, captured_at, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Position of this frame in its source's stream, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Run a detector over this frame's pixels.
    pub fn run_detector(&self, detector: &mut dyn PlateDetector) -> Result<Vec<Detection>> {
        detector.detect(self.image.as_raw(), self.width(), self.height())
    }

    /// Copy the region under `bbox`, clamped to the frame.
    ///
    /// Returns `None` when the clamped region is empty.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<RgbImage> {
        let rect = bbox.clamp_to(self.width(), self.height())?;
        Some(imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height).to_image())
    }
}
