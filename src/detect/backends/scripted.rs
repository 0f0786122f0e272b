use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::PlateDetector;
use crate::detect::result::{BoundingBox, Detection};

/// Detector that replays a fixed per-frame script, for tests that drive the
/// loop directly. Not selectable from configuration.
///
/// Each call to `detect` pops the next scripted frame. Once the script is
/// exhausted every frame is empty.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    frames: VecDeque<Vec<Detection>>,
    calls: u64,
}

impl ScriptedDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
            calls: 0,
        }
    }

    /// One detection per frame at `bbox`; `None` is a frame without detections.
    pub fn from_confidences(bbox: BoundingBox, confidences: &[Option<f32>]) -> Self {
        Self::new(
            confidences
                .iter()
                .map(|c| match c {
                    Some(confidence) => vec![Detection::new(bbox, *confidence)],
                    None => Vec::new(),
                })
                .collect(),
        )
    }

    pub fn push_frame(&mut self, detections: Vec<Detection>) {
        self.frames.push_back(detections);
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl PlateDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}
