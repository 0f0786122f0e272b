use anyhow::{anyhow, Result};

use crate::detect::backend::PlateDetector;
use crate::detect::result::{BoundingBox, Detection};

const DEFAULT_LUMA_THRESHOLD: u8 = 200;
const DEFAULT_MIN_AREA_FRACTION: f32 = 0.001;

/// CPU backend that reports the bright region of a frame as a plate.
///
/// Confidence is the fraction of the region's box covered by bright pixels,
/// so a solid plate-like rectangle scores near 1.0 and scattered highlights
/// score low. Pairs with the synthetic `stub://` source for model-free runs.
#[derive(Clone, Debug)]
pub struct LumaDetector {
    threshold: u8,
    min_area_fraction: f32,
}

impl LumaDetector {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_LUMA_THRESHOLD,
            min_area_fraction: DEFAULT_MIN_AREA_FRACTION,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Default for LumaDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

impl PlateDetector for LumaDetector {
    fn name(&self) -> &'static str {
        "luma"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }

        let w = width as usize;
        let mut bright = 0u64;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        for (i, px) in pixels.chunks_exact(3).enumerate() {
            if luma(px[0], px[1], px[2]) < self.threshold {
                continue;
            }
            let (x, y) = (i % w, i / w);
            bright += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if bright == 0 {
            return Ok(Vec::new());
        }

        let box_area = ((max_x - min_x + 1) * (max_y - min_y + 1)) as f32;
        let frame_area = (width as f32) * (height as f32);
        if box_area < frame_area * self.min_area_fraction {
            return Ok(Vec::new());
        }

        let confidence = (bright as f32 / box_area).clamp(0.0, 1.0);
        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        );
        Ok(vec![Detection::new(bbox, confidence)])
    }
}
