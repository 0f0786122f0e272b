//! Frame loop: detector -> confirmation gate -> recognition -> store.
//!
//! One thread drives the loop. Each frame is run through the detector, the
//! best detection's confidence is fed to the gate at the frame's capture
//! instant, and a confirmation synchronously invokes recognition with that
//! detection's box. The frame source is released on every exit path.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PlateSentryConfig;
use crate::detect::{best_detection, build_detector, Detection, PlateDetector};
use crate::frame::Frame;
use crate::gate::{ConfirmationGate, GateTransition};
use crate::ingest::{open_source, read_still_frame, FrameSource};
use crate::recognize::{build_recognizer, RecognitionInvoker, RecognitionOutcome};
use crate::storage::{PlateStore, SqlitePlateStore};

/// Cloneable stop flag shared with a signal handler.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Pace the loop to this rate; 0 runs as fast as the source delivers.
    pub target_fps: u32,
    /// Storage failures without a successful insert in between before `run`
    /// gives up.
    pub max_consecutive_storage_failures: u32,
    pub health_log_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_frames: None,
            target_fps: 0,
            max_consecutive_storage_failures: 5,
            health_log_interval: Duration::from_secs(10),
        }
    }
}

impl LoopSettings {
    pub fn from_config(cfg: &PlateSentryConfig) -> Self {
        Self {
            max_frames: None,
            target_fps: cfg.source.target_fps,
            max_consecutive_storage_failures: cfg.pipeline.max_consecutive_storage_failures,
            health_log_interval: cfg.pipeline.health_log_interval,
        }
    }

    fn frame_interval(&self) -> Option<Duration> {
        (self.target_fps > 0).then(|| Duration::from_secs_f64(1.0 / self.target_fps as f64))
    }
}

/// What happened to a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub sequence: u64,
    /// Detection that drove the gate, if any.
    pub detection: Option<Detection>,
    pub transition: GateTransition,
    /// Set only when the gate confirmed on this frame.
    pub outcome: Option<RecognitionOutcome>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    EndOfStream,
    FrameLimit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub frames_with_detection: u64,
    pub triggers: u64,
    pub stored: u64,
    pub duplicates: u64,
    pub no_text: u64,
    pub rejected: u64,
    pub storage_failures: u64,
    pub stop_reason: StopReason,
}

impl LoopSummary {
    fn new() -> Self {
        Self {
            frames: 0,
            frames_with_detection: 0,
            triggers: 0,
            stored: 0,
            duplicates: 0,
            no_text: 0,
            rejected: 0,
            storage_failures: 0,
            stop_reason: StopReason::Stopped,
        }
    }

    fn tally(&mut self, report: &FrameReport) {
        self.frames += 1;
        if report.detection.is_some() {
            self.frames_with_detection += 1;
        }
        if report.transition.is_confirmed() {
            self.triggers += 1;
        }
        match &report.outcome {
            Some(RecognitionOutcome::Stored(_)) => self.stored += 1,
            Some(RecognitionOutcome::Duplicate(_)) => self.duplicates += 1,
            Some(RecognitionOutcome::NoText) => self.no_text += 1,
            Some(RecognitionOutcome::Rejected(_)) => self.rejected += 1,
            None => {}
        }
    }
}

pub struct FrameLoop {
    source: Box<dyn FrameSource>,
    detector: Box<dyn PlateDetector>,
    gate: ConfirmationGate,
    invoker: RecognitionInvoker,
    store: Box<dyn PlateStore>,
    settings: LoopSettings,
}

impl FrameLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn PlateDetector>,
        gate: ConfirmationGate,
        invoker: RecognitionInvoker,
        store: Box<dyn PlateStore>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            detector,
            gate,
            invoker,
            store,
            settings,
        }
    }

    /// Assemble the loop from configuration: source, detector, gate,
    /// recognizer and the SQLite store at `cfg.db_path`.
    pub fn from_config(cfg: &PlateSentryConfig) -> Result<Self> {
        let source = open_source(&cfg.source)?;
        let detector = build_detector(&cfg.detector)
            .with_context(|| format!("failed to load detector '{}'", cfg.detector.backend))?;
        let gate = ConfirmationGate::new(cfg.gate)?;
        let invoker = build_invoker(cfg)?;
        let store = SqlitePlateStore::open(&cfg.db_path)?;
        Ok(Self::new(
            source,
            detector,
            gate,
            invoker,
            Box::new(store),
            LoopSettings::from_config(cfg),
        ))
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.settings.max_frames = max_frames;
        self
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    pub fn store(&self) -> &dyn PlateStore {
        self.store.as_ref()
    }

    /// Run one frame through detector, gate and (on confirmation) recognition.
    ///
    /// A detector failure counts as "no detection". Only a storage failure
    /// returns `Err`; the gate has already returned to idle by then.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport> {
        let detections = match frame.run_detector(self.detector.as_mut()) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!(
                    "frame {}: detector {} failed: {:#}",
                    frame.sequence(),
                    self.detector.name(),
                    e
                );
                Vec::new()
            }
        };
        let detection = best_detection(&detections);
        let transition = self
            .gate
            .observe(detection.map(|d| d.confidence), frame.captured_at());

        match transition {
            GateTransition::Armed { .. } => {
                log::debug!("frame {}: candidate armed", frame.sequence());
            }
            GateTransition::Abandoned { dwell_start } => {
                log::debug!(
                    "frame {}: candidate dropped after {:?}",
                    frame.sequence(),
                    frame.captured_at().saturating_duration_since(dwell_start)
                );
            }
            _ => {}
        }

        let outcome = match (transition.is_confirmed(), detection.as_ref()) {
            (true, Some(detection)) => {
                log::debug!(
                    "frame {}: plate confirmed at confidence {:.2}",
                    frame.sequence(),
                    detection.confidence
                );
                Some(
                    self.invoker
                        .handle(frame, detection, self.store.as_mut())?,
                )
            }
            (true, None) => {
                log::warn!(
                    "frame {}: confirmation without a detection",
                    frame.sequence()
                );
                Some(RecognitionOutcome::NoText)
            }
            (false, _) => None,
        };

        Ok(FrameReport {
            sequence: frame.sequence(),
            detection,
            transition,
            outcome,
        })
    }

    /// Connect the source and process frames until `stop` is raised, the
    /// source ends, the frame limit is hit, or storage keeps failing.
    pub fn run(&mut self, stop: &StopSignal) -> Result<LoopSummary> {
        let result = self.run_inner(stop);
        self.source.release();
        result
    }

    fn run_inner(&mut self, stop: &StopSignal) -> Result<LoopSummary> {
        self.source.connect().context("failed to connect frame source")?;
        log::info!(
            "frame loop running: detector={} recognizer={} dwell={:?}",
            self.detector.name(),
            self.invoker.recognizer_name(),
            self.gate.config().dwell
        );

        let frame_interval = self.settings.frame_interval();
        let mut summary = LoopSummary::new();
        let mut consecutive_failures = 0u32;
        let mut last_health_log = Instant::now();

        loop {
            if stop.is_stopped() {
                summary.stop_reason = StopReason::Stopped;
                break;
            }
            if let Some(limit) = self.settings.max_frames {
                if summary.frames >= limit {
                    summary.stop_reason = StopReason::FrameLimit;
                    break;
                }
            }

            let started = Instant::now();
            let Some(frame) = self.source.next_frame()? else {
                summary.stop_reason = StopReason::EndOfStream;
                break;
            };

            match self.process_frame(&frame) {
                Ok(report) => {
                    if matches!(
                        report.outcome,
                        Some(RecognitionOutcome::Stored(_) | RecognitionOutcome::Duplicate(_))
                    ) {
                        consecutive_failures = 0;
                    }
                    summary.tally(&report);
                }
                Err(e) => {
                    // Only a confirmed detection reaches storage.
                    summary.frames += 1;
                    summary.frames_with_detection += 1;
                    summary.triggers += 1;
                    summary.storage_failures += 1;
                    consecutive_failures += 1;
                    log::error!(
                        "frame {}: storage failure {}/{}: {:#}",
                        frame.sequence(),
                        consecutive_failures,
                        self.settings.max_consecutive_storage_failures,
                        e
                    );
                    if consecutive_failures >= self.settings.max_consecutive_storage_failures {
                        return Err(e.context(format!(
                            "giving up after {} consecutive storage failures",
                            consecutive_failures
                        )));
                    }
                }
            }

            if last_health_log.elapsed() >= self.settings.health_log_interval {
                let stats = self.source.stats();
                log::info!(
                    "source health={} frames={} triggers={} stored={} location={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    summary.triggers,
                    summary.stored,
                    stats.location
                );
                last_health_log = Instant::now();
            }

            if let Some(interval) = frame_interval {
                let spent = started.elapsed();
                if spent < interval {
                    std::thread::sleep(interval - spent);
                }
            }
        }

        log::info!(
            "frame loop finished ({:?}): frames={} triggers={} stored={} duplicates={}",
            summary.stop_reason,
            summary.frames,
            summary.triggers,
            summary.stored,
            summary.duplicates
        );
        Ok(summary)
    }
}

fn build_invoker(cfg: &PlateSentryConfig) -> Result<RecognitionInvoker> {
    let recognizer = build_recognizer(&cfg.recognizer)
        .with_context(|| format!("failed to load recognizer '{}'", cfg.recognizer.backend))?;
    let invoker = RecognitionInvoker::new(recognizer);
    match cfg.recognizer.allowed_pattern.as_deref() {
        Some(pattern) => invoker.with_allowed_pattern(pattern),
        None => Ok(invoker),
    }
}

/// Check a single photo without the dwell gate.
///
/// The detector runs once; its best detection goes straight to recognition
/// and the configured store. Returns `None` when no plate is detected.
pub fn check_still_image(
    cfg: &PlateSentryConfig,
    path: &Path,
) -> Result<Option<RecognitionOutcome>> {
    let frame = read_still_frame(path)?;
    let mut detector = build_detector(&cfg.detector)
        .with_context(|| format!("failed to load detector '{}'", cfg.detector.backend))?;
    let mut invoker = build_invoker(cfg)?;
    let mut store = SqlitePlateStore::open(&cfg.db_path)?;

    let detections = frame.run_detector(detector.as_mut())?;
    let Some(detection) = best_detection(&detections) else {
        log::info!("{}: no plate detected", path.display());
        return Ok(None);
    };
    log::info!(
        "{}: plate detected with confidence {:.2}",
        path.display(),
        detection.confidence
    );
    invoker.handle(&frame, &detection, &mut store).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, ScriptedDetector};
    use crate::gate::GateConfig;
    use crate::recognize::{ScriptedRecognizer, TextFragment};
    use crate::storage::InMemoryPlateStore;
    use image::RgbImage;

    fn frame_at(base: Instant, secs: u64, sequence: u64) -> Frame {
        Frame::new(
            RgbImage::new(64, 48),
            base + Duration::from_secs(secs),
            sequence,
        )
    }

    fn scripted_loop(readings: &[Option<f32>], replies: &[&str]) -> FrameLoop {
        let bbox = BoundingBox::new(8.0, 8.0, 40.0, 24.0);
        let replies = replies
            .iter()
            .map(|text| vec![TextFragment::new(*text, 0.9)])
            .collect();
        FrameLoop::new(
            Box::new(crate::ingest::SyntheticSource::new(Default::default())),
            Box::new(ScriptedDetector::from_confidences(bbox, readings)),
            ConfirmationGate::new(GateConfig::default()).expect("gate"),
            RecognitionInvoker::new(Box::new(ScriptedRecognizer::new(replies))),
            Box::new(InMemoryPlateStore::new()),
            LoopSettings::default(),
        )
    }

    #[test]
    fn stop_signal_is_shared_between_clones() {
        let stop = StopSignal::new();
        let handle = stop.clone();
        assert!(!stop.is_stopped());
        handle.stop();
        assert!(stop.is_stopped());
    }

    #[test]
    fn sustained_plate_is_recognized_once() -> Result<()> {
        let readings = [Some(0.8); 4];
        let mut frame_loop = scripted_loop(&readings, &["AB 12 CD"]);
        let base = Instant::now();

        let reports = (0..4)
            .map(|i| frame_loop.process_frame(&frame_at(base, i, i + 1)))
            .collect::<Result<Vec<_>>>()?;

        assert!(reports[0].outcome.is_none());
        assert!(reports[1].outcome.is_none());
        assert!(matches!(
            reports[2].outcome,
            Some(RecognitionOutcome::Stored(ref record)) if record.plate_text.as_str() == "AB12CD"
        ));
        assert!(reports[3].outcome.is_none());
        assert_eq!(frame_loop.store().count()?, 1);
        Ok(())
    }

    #[test]
    fn missing_detections_never_reach_recognizer() -> Result<()> {
        let mut frame_loop = scripted_loop(&[None, None, None], &["AB12CD"]);
        let base = Instant::now();
        for i in 0..3 {
            let report = frame_loop.process_frame(&frame_at(base, i * 5, i + 1))?;
            assert_eq!(report.transition, GateTransition::Idle);
            assert!(report.detection.is_none());
        }
        assert_eq!(frame_loop.store().count()?, 0);
        Ok(())
    }

    #[test]
    fn loop_stops_at_frame_limit() -> Result<()> {
        let mut frame_loop = scripted_loop(&[], &[]).with_max_frames(Some(3));
        let summary = frame_loop.run(&StopSignal::new())?;
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.stop_reason, StopReason::FrameLimit);
        Ok(())
    }

    #[test]
    fn raised_stop_signal_ends_loop_before_first_frame() -> Result<()> {
        let mut frame_loop = scripted_loop(&[], &[]);
        let stop = StopSignal::new();
        stop.stop();
        let summary = frame_loop.run(&stop)?;
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.stop_reason, StopReason::Stopped);
        Ok(())
    }
}
