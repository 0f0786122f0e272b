//! Plate text recognition.
//!
//! The recognizer is an external collaborator: it receives the cropped plate
//! image and returns text fragments in reading order. This module turns those
//! fragments into a `PlateText` key, or into `RecognizedText::NoText` when
//! nothing usable came back. `NoText` never reaches the plate store.

mod backends;
mod invoker;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::config::RecognizerSettings;
use crate::detect::BoundingBox;
use crate::plate::PlateText;

pub use backends::ScriptedRecognizer;
#[cfg(feature = "ocr-tesseract")]
pub use backends::TesseractRecognizer;
pub use invoker::{RecognitionInvoker, RecognitionOutcome};

/// One piece of text reported by a recognizer.
///
/// Only `text` is used for the plate key; position and confidence are kept
/// for logging.
#[derive(Clone, Debug, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub confidence: f32,
    /// Position inside the cropped plate image, when the engine reports one.
    pub bbox: Option<BoundingBox>,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox: None,
        }
    }
}

/// Text recognition backend.
///
/// Backends are owned and driven by the frame loop thread, so there is no
/// `Send` requirement.
pub trait Recognizer {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Read the text on a cropped plate image. An empty vector is valid.
    fn recognize(&mut self, plate: &RgbImage) -> Result<Vec<TextFragment>>;
}

/// Normalized recognition result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecognizedText {
    Plate(PlateText),
    /// Sentinel for "no text detected".
    NoText,
}

/// Concatenate fragments in reported order, strip all whitespace, uppercase.
pub fn normalize_fragments(fragments: &[TextFragment]) -> RecognizedText {
    let joined: String = fragments.iter().map(|f| f.text.as_str()).collect();
    match PlateText::normalize(&joined) {
        Some(plate) => RecognizedText::Plate(plate),
        None => RecognizedText::NoText,
    }
}

/// Build the recognizer named by the configuration.
pub fn build_recognizer(settings: &RecognizerSettings) -> Result<Box<dyn Recognizer>> {
    match settings.backend.as_str() {
        "scripted" => Ok(Box::new(ScriptedRecognizer::cycling(settings.plates.clone()))),
        #[cfg(feature = "ocr-tesseract")]
        "tesseract" => Ok(Box::new(TesseractRecognizer::new(
            settings.data_path.as_deref(),
            &settings.language,
        )?)),
        #[cfg(not(feature = "ocr-tesseract"))]
        "tesseract" => Err(anyhow!(
            "recognizer backend 'tesseract' requires the ocr-tesseract feature"
        )),
        other => Err(anyhow!("unknown recognizer backend '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaced_plate_normalizes() {
        let fragments = vec![TextFragment::new("AB 12 CD", 0.9)];
        assert_eq!(
            normalize_fragments(&fragments),
            RecognizedText::Plate(PlateText::normalize("AB12CD").unwrap())
        );
    }

    #[test]
    fn fragments_join_in_reported_order() {
        let fragments = vec![
            TextFragment::new("kl", 0.8),
            TextFragment::new(" 55 ", 0.7),
            TextFragment::new("mn", 0.9),
        ];
        match normalize_fragments(&fragments) {
            RecognizedText::Plate(plate) => assert_eq!(plate.as_str(), "KL55MN"),
            RecognizedText::NoText => panic!("expected plate text"),
        }
    }

    #[test]
    fn empty_or_blank_results_are_no_text() {
        assert_eq!(normalize_fragments(&[]), RecognizedText::NoText);
        assert_eq!(
            normalize_fragments(&[TextFragment::new("  ", 0.4)]),
            RecognizedText::NoText
        );
    }
}
