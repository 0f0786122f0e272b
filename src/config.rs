use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gate::{
    GateConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_DROP_THRESHOLD, DEFAULT_DWELL,
};

pub const CONFIG_PATH_ENV: &str = "PLATE_SENTRY_CONFIG";

const DEFAULT_DB_PATH: &str = "license_plates.db";
const DEFAULT_SOURCE_URL: &str = "stub://plates";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const MAX_SOURCE_FPS: u32 = 120;
const DEFAULT_DETECTOR: &str = "luma";
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_DETECTOR_MIN_CONFIDENCE: f32 = 0.25;
const DEFAULT_RECOGNIZER: &str = "scripted";
const DEFAULT_RECOGNIZER_LANGUAGE: &str = "eng";
const DEFAULT_SCRIPTED_PLATES: &[&str] = &["AB12CD", "KL55MN", "XY99ZZ"];
const DEFAULT_MAX_STORAGE_FAILURES: u32 = 5;
const DEFAULT_HEALTH_LOG_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct PlateSentryConfigFile {
    db_path: Option<String>,
    source: Option<SourceConfigFile>,
    gate: Option<GateConfigFile>,
    detector: Option<DetectorConfigFile>,
    recognizer: Option<RecognizerConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    confidence_threshold: Option<f32>,
    drop_threshold: Option<f32>,
    dwell_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognizerConfigFile {
    backend: Option<String>,
    plates: Option<Vec<String>>,
    data_path: Option<String>,
    language: Option<String>,
    allowed_pattern: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    max_consecutive_storage_failures: Option<u32>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PlateSentryConfig {
    pub db_path: String,
    pub source: SourceSettings,
    pub gate: GateConfig,
    pub detector: DetectorSettings,
    pub recognizer: RecognizerSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_SOURCE_FPS,
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `luma`, `scripted` or `tract`.
    pub backend: String,
    /// ONNX model, required by `tract`.
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub min_confidence: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            model_path: None,
            input_width: DEFAULT_DETECTOR_INPUT,
            input_height: DEFAULT_DETECTOR_INPUT,
            min_confidence: DEFAULT_DETECTOR_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecognizerSettings {
    /// `scripted` or `tesseract`.
    pub backend: String,
    /// Replies cycled by the `scripted` recognizer.
    pub plates: Vec<String>,
    /// Tesseract data directory; `None` uses the system default.
    pub data_path: Option<String>,
    pub language: String,
    /// Regex the normalized plate text must match to be stored.
    pub allowed_pattern: Option<String>,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_RECOGNIZER.to_string(),
            plates: DEFAULT_SCRIPTED_PLATES
                .iter()
                .map(|plate| plate.to_string())
                .collect(),
            data_path: None,
            language: DEFAULT_RECOGNIZER_LANGUAGE.to_string(),
            allowed_pattern: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Consecutive storage failures after which the frame loop gives up.
    pub max_consecutive_storage_failures: u32,
    pub health_log_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_consecutive_storage_failures: DEFAULT_MAX_STORAGE_FAILURES,
            health_log_interval: Duration::from_secs(DEFAULT_HEALTH_LOG_SECS),
        }
    }
}

impl PlateSentryConfig {
    /// Load from the file named by `PLATE_SENTRY_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`PlateSentryConfig::load`] with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PlateSentryConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let source_defaults = SourceSettings::default();
        let source = SourceSettings {
            url: source_file.url.unwrap_or(source_defaults.url),
            target_fps: source_file.target_fps.unwrap_or(source_defaults.target_fps),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
        };

        let gate_file = file.gate.unwrap_or_default();
        let gate = GateConfig {
            confidence_threshold: gate_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            drop_threshold: gate_file.drop_threshold.unwrap_or(DEFAULT_DROP_THRESHOLD),
            dwell: gate_file
                .dwell_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DWELL),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector_defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(detector_defaults.backend),
            model_path: detector_file.model_path,
            input_width: detector_file
                .input_width
                .unwrap_or(detector_defaults.input_width),
            input_height: detector_file
                .input_height
                .unwrap_or(detector_defaults.input_height),
            min_confidence: detector_file
                .min_confidence
                .unwrap_or(detector_defaults.min_confidence),
        };

        let recognizer_file = file.recognizer.unwrap_or_default();
        let recognizer_defaults = RecognizerSettings::default();
        let recognizer = RecognizerSettings {
            backend: recognizer_file
                .backend
                .unwrap_or(recognizer_defaults.backend),
            plates: recognizer_file
                .plates
                .unwrap_or(recognizer_defaults.plates),
            data_path: recognizer_file.data_path,
            language: recognizer_file
                .language
                .unwrap_or(recognizer_defaults.language),
            allowed_pattern: recognizer_file.allowed_pattern,
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline_defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            max_consecutive_storage_failures: pipeline_file
                .max_consecutive_storage_failures
                .unwrap_or(pipeline_defaults.max_consecutive_storage_failures),
            health_log_interval: pipeline_file
                .health_log_secs
                .map(Duration::from_secs)
                .unwrap_or(pipeline_defaults.health_log_interval),
        };

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            source,
            gate,
            detector,
            recognizer,
            pipeline,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_nonempty("PLATE_SENTRY_DB_PATH") {
            self.db_path = path;
        }
        if let Some(url) = env_nonempty("PLATE_SENTRY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(value) = env_nonempty("PLATE_SENTRY_CONFIDENCE_THRESHOLD") {
            self.gate.confidence_threshold = value.trim().parse().map_err(|_| {
                anyhow!("PLATE_SENTRY_CONFIDENCE_THRESHOLD must be a number in 0..=1")
            })?;
        }
        if let Some(value) = env_nonempty("PLATE_SENTRY_DROP_THRESHOLD") {
            self.gate.drop_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PLATE_SENTRY_DROP_THRESHOLD must be a number in 0..=1"))?;
        }
        if let Some(value) = env_nonempty("PLATE_SENTRY_DWELL_MS") {
            let millis: u64 = value.trim().parse().map_err(|_| {
                anyhow!("PLATE_SENTRY_DWELL_MS must be an integer number of milliseconds")
            })?;
            self.gate.dwell = Duration::from_millis(millis);
        }
        if let Some(backend) = env_nonempty("PLATE_SENTRY_DETECTOR") {
            self.detector.backend = backend.trim().to_string();
        }
        if let Some(backend) = env_nonempty("PLATE_SENTRY_RECOGNIZER") {
            self.recognizer.backend = backend.trim().to_string();
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.gate.validate()?;

        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.source.target_fps > MAX_SOURCE_FPS {
            return Err(anyhow!(
                "source.target_fps must be at most {}, got {}",
                MAX_SOURCE_FPS,
                self.source.target_fps
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!("detector.min_confidence must be within 0..=1"));
        }
        if self.pipeline.max_consecutive_storage_failures == 0 {
            return Err(anyhow!(
                "pipeline.max_consecutive_storage_failures must be greater than zero"
            ));
        }
        if self.recognizer.backend == "scripted" && self.recognizer.plates.is_empty() {
            return Err(anyhow!("scripted recognizer needs at least one plate"));
        }
        if let Some(pattern) = self.recognizer.allowed_pattern.as_deref() {
            regex::Regex::new(pattern)
                .with_context(|| format!("invalid recognizer.allowed_pattern {:?}", pattern))?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PlateSentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
