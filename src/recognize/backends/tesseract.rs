#![cfg(feature = "ocr-tesseract")]

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use leptess::{LepTess, Variable};
use std::io::Cursor;

use crate::recognize::{Recognizer, TextFragment};

const PLATE_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Treat the crop as a single text line.
const PAGE_SEG_SINGLE_LINE: &str = "7";

/// Tesseract OCR through leptess.
pub struct TesseractRecognizer {
    api: LepTess,
}

impl TesseractRecognizer {
    pub fn new(data_path: Option<&str>, language: &str) -> Result<Self> {
        let mut api = LepTess::new(data_path, language)
            .map_err(|e| anyhow!("failed to initialise tesseract ({}): {:?}", language, e))?;
        api.set_variable(Variable::TesseditCharWhitelist, PLATE_CHARSET)
            .map_err(|e| anyhow!("failed to set tesseract whitelist: {:?}", e))?;
        api.set_variable(Variable::TesseditPagesegMode, PAGE_SEG_SINGLE_LINE)
            .map_err(|e| anyhow!("failed to set tesseract page mode: {:?}", e))?;
        Ok(Self { api })
    }
}

impl Recognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&mut self, plate: &RgbImage) -> Result<Vec<TextFragment>> {
        let mut png = Vec::new();
        plate
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("failed to encode plate crop")?;
        self.api
            .set_image_from_mem(&png)
            .map_err(|e| anyhow!("tesseract rejected plate crop: {:?}", e))?;

        let text = self
            .api
            .get_utf8_text()
            .context("tesseract returned invalid UTF-8")?;
        let confidence = (self.api.mean_text_conf() as f32 / 100.0).clamp(0.0, 1.0);

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| TextFragment::new(line, confidence))
            .collect())
    }
}
