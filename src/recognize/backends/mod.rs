pub mod scripted;

#[cfg(feature = "ocr-tesseract")]
pub mod tesseract;

pub use scripted::ScriptedRecognizer;

#[cfg(feature = "ocr-tesseract")]
pub use tesseract::TesseractRecognizer;
