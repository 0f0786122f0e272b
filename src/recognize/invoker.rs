use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use regex::Regex;

use super::{normalize_fragments, RecognizedText, Recognizer};
use crate::detect::Detection;
use crate::frame::Frame;
use crate::plate::{PlateRecord, PlateText};
use crate::storage::{InsertOutcome, PlateStore};

/// Result of handling one confirmed detection.
#[derive(Clone, Debug, PartialEq)]
pub enum RecognitionOutcome {
    /// Nothing readable (empty crop, recognizer failure or empty text).
    NoText,
    /// Text did not match the configured plate pattern.
    Rejected(PlateText),
    /// New plate, now stored.
    Stored(PlateRecord),
    /// Plate was already in the store.
    Duplicate(PlateText),
}

/// Crops, recognizes and stores on a confirmation trigger.
pub struct RecognitionInvoker {
    recognizer: Box<dyn Recognizer>,
    allowed_pattern: Option<Regex>,
}

impl RecognitionInvoker {
    pub fn new(recognizer: Box<dyn Recognizer>) -> Self {
        Self {
            recognizer,
            allowed_pattern: None,
        }
    }

    /// Only store normalized text matching `pattern`.
    pub fn with_allowed_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .with_context(|| format!("invalid plate pattern {:?}", pattern))?;
        self.allowed_pattern = Some(regex);
        Ok(self)
    }

    pub fn recognizer_name(&self) -> &'static str {
        self.recognizer.name()
    }

    /// Read the plate under `detection` and insert it if it is new.
    ///
    /// Recognition problems are not errors: they yield `NoText`. Only a
    /// storage failure returns `Err`.
    pub fn handle(
        &mut self,
        frame: &Frame,
        detection: &Detection,
        store: &mut dyn PlateStore,
    ) -> Result<RecognitionOutcome> {
        let Some(crop) = frame.crop(&detection.bbox) else {
            log::warn!(
                "frame {}: confirmed box {:?} is empty after clamping",
                frame.sequence(),
                detection.bbox
            );
            return Ok(RecognitionOutcome::NoText);
        };

        let fragments = match self.recognizer.recognize(&crop) {
            Ok(fragments) => fragments,
            Err(e) => {
                log::warn!(
                    "frame {}: recognizer {} failed: {:#}",
                    frame.sequence(),
                    self.recognizer.name(),
                    e
                );
                return Ok(RecognitionOutcome::NoText);
            }
        };

        let plate = match normalize_fragments(&fragments) {
            RecognizedText::Plate(plate) => plate,
            RecognizedText::NoText => {
                log::info!("frame {}: no text detected", frame.sequence());
                return Ok(RecognitionOutcome::NoText);
            }
        };

        if let Some(pattern) = &self.allowed_pattern {
            if !pattern.is_match(plate.as_str()) {
                log::warn!(
                    "frame {}: recognized text {} does not look like a plate",
                    frame.sequence(),
                    plate
                );
                return Ok(RecognitionOutcome::Rejected(plate));
            }
        }

        let confidence = detection.confidence.clamp(0.0, 1.0);
        let first_seen = wall_clock_now();
        match store
            .insert_if_absent(&plate, confidence, first_seen)
            .with_context(|| format!("failed to record plate {}", plate))?
        {
            InsertOutcome::Inserted => {
                log::info!("detected plate: {}, confidence: {:.2}", plate, confidence);
                Ok(RecognitionOutcome::Stored(PlateRecord {
                    plate_text: plate,
                    first_seen,
                    confidence,
                }))
            }
            InsertOutcome::AlreadyPresent => {
                log::debug!("plate {} already recorded", plate);
                Ok(RecognitionOutcome::Duplicate(plate))
            }
        }
    }
}

/// Local wall-clock time at the store's one-second resolution.
fn wall_clock_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
