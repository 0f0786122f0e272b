use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plate_sentry::detect::{BoundingBox, Detection, PlateDetector, ScriptedDetector};
use plate_sentry::recognize::{ScriptedRecognizer, TextFragment};
use plate_sentry::{
    ConfirmationGate, Frame, FrameLoop, FrameSource, GateConfig, InMemoryPlateStore,
    InsertOutcome, LoopSettings, PlateRecord, PlateStore, PlateText, RecognitionInvoker,
    SourceStats, SqlitePlateStore, StopReason, StopSignal,
};

const PLATE_BOX: BoundingBox = BoundingBox {
    x1: 8.0,
    y1: 8.0,
    x2: 40.0,
    y2: 24.0,
};

/// Source that emits blank frames one second apart and records `release`.
struct ScriptedSource {
    base: Instant,
    remaining: u64,
    produced: u64,
    fail_connect: bool,
    fail_after: Option<u64>,
    stop_after: Option<(u64, StopSignal)>,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn new(frames: u64) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        (
            Self {
                base: Instant::now(),
                remaining: frames,
                produced: 0,
                fail_connect: false,
                fail_after: None,
                stop_after: None,
                released: released.clone(),
            },
            released,
        )
    }
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(anyhow!("camera unplugged"));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.fail_after == Some(self.produced) {
            return Err(anyhow!("capture failed"));
        }
        if let Some((after, stop)) = &self.stop_after {
            if self.produced == *after {
                stop.stop();
            }
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let captured_at = self.base + Duration::from_secs(self.produced);
        self.produced += 1;
        Ok(Some(Frame::new(
            RgbImage::new(64, 48),
            captured_at,
            self.produced,
        )))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
            location: "scripted".to_string(),
        }
    }
}

struct FailingStore;

impl PlateStore for FailingStore {
    fn exists(&self, _plate: &PlateText) -> Result<bool> {
        Ok(false)
    }

    fn insert_if_absent(
        &mut self,
        _plate: &PlateText,
        _confidence: f32,
        _first_seen: NaiveDateTime,
    ) -> Result<InsertOutcome> {
        Err(anyhow!("disk I/O error"))
    }

    fn get(&self, _plate: &PlateText) -> Result<Option<PlateRecord>> {
        Ok(None)
    }

    fn list(&self, _limit: usize) -> Result<Vec<PlateRecord>> {
        Ok(Vec::new())
    }

    fn count(&self) -> Result<u64> {
        Ok(0)
    }
}

struct FailingDetector;

impl PlateDetector for FailingDetector {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        Err(anyhow!("inference backend crashed"))
    }
}

fn replies(texts: &[&str]) -> Vec<Vec<TextFragment>> {
    texts
        .iter()
        .map(|text| vec![TextFragment::new(*text, 0.9)])
        .collect()
}

fn build_loop(
    source: ScriptedSource,
    readings: &[Option<f32>],
    recognizer_replies: Vec<Vec<TextFragment>>,
    store: Box<dyn PlateStore>,
    settings: LoopSettings,
) -> FrameLoop {
    FrameLoop::new(
        Box::new(source),
        Box::new(ScriptedDetector::from_confidences(PLATE_BOX, readings)),
        ConfirmationGate::new(GateConfig::default()).expect("gate"),
        RecognitionInvoker::new(Box::new(ScriptedRecognizer::new(recognizer_replies))),
        store,
        settings,
    )
}

#[test]
fn sustained_plate_triggers_on_third_sample() -> Result<()> {
    let (source, released) = ScriptedSource::new(4);
    let mut frame_loop = build_loop(
        source,
        &[Some(0.8); 4],
        replies(&["AB 12 CD"]),
        Box::new(InMemoryPlateStore::new()),
        LoopSettings::default(),
    );

    let summary = frame_loop.run(&StopSignal::new())?;

    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.triggers, 1);
    assert_eq!(summary.stored, 1);
    let plate = PlateText::normalize("AB12CD").expect("plate");
    assert!(frame_loop.store().exists(&plate)?);
    assert!(released.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn dip_below_drop_threshold_restarts_dwell() -> Result<()> {
    let mut frame_loop = build_loop(
        ScriptedSource::new(0).0,
        &[Some(0.8), Some(0.2), Some(0.8), Some(0.8), Some(0.8)],
        replies(&["KL55MN"]),
        Box::new(InMemoryPlateStore::new()),
        LoopSettings::default(),
    );

    let base = Instant::now();
    let mut confirmed = Vec::new();
    for i in 0..5u64 {
        let frame = Frame::new(RgbImage::new(64, 48), base + Duration::from_secs(i), i + 1);
        if frame_loop.process_frame(&frame)?.transition.is_confirmed() {
            confirmed.push(i);
        }
    }

    assert_eq!(confirmed, vec![4]);
    assert_eq!(frame_loop.store().count()?, 1);
    Ok(())
}

#[test]
fn empty_recognition_is_not_stored() -> Result<()> {
    let (source, _released) = ScriptedSource::new(4);
    let mut frame_loop = build_loop(
        source,
        &[Some(0.9); 4],
        replies(&["   "]),
        Box::new(InMemoryPlateStore::new()),
        LoopSettings::default(),
    );

    let summary = frame_loop.run(&StopSignal::new())?;

    assert_eq!(summary.triggers, 1);
    assert_eq!(summary.no_text, 1);
    assert_eq!(summary.stored, 0);
    assert_eq!(frame_loop.store().count()?, 0);
    Ok(())
}

#[test]
fn plate_seen_in_two_runs_is_stored_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("plates.db");
    let db_path = db_path.to_str().expect("utf-8 path");

    for run in 0..2 {
        let (source, _released) = ScriptedSource::new(3);
        let store = SqlitePlateStore::open(db_path)?;
        let mut frame_loop = build_loop(
            source,
            &[Some(0.8); 3],
            replies(&["xy 99 zz"]),
            Box::new(store),
            LoopSettings::default(),
        );
        let summary = frame_loop.run(&StopSignal::new())?;
        assert_eq!(summary.triggers, 1, "run {}", run);
        if run == 0 {
            assert_eq!(summary.stored, 1);
        } else {
            assert_eq!(summary.duplicates, 1);
        }
    }

    let store = SqlitePlateStore::open(db_path)?;
    assert_eq!(store.count()?, 1);
    let record = store
        .get(&PlateText::normalize("XY99ZZ").expect("plate"))?
        .expect("stored record");
    assert_eq!(record.confidence, 0.8);
    Ok(())
}

#[test]
fn storage_failures_abort_after_limit_and_release_source() {
    // Triggers land on frames 2, 5, 8 with 1 s spacing and a 2 s dwell.
    let (source, released) = ScriptedSource::new(20);
    let mut frame_loop = build_loop(
        source,
        &[Some(0.8); 20],
        replies(&["AB12CD", "KL55MN", "XY99ZZ"]),
        Box::new(FailingStore),
        LoopSettings {
            max_consecutive_storage_failures: 2,
            ..LoopSettings::default()
        },
    );

    let err = frame_loop
        .run(&StopSignal::new())
        .expect_err("storage failures must abort the loop");

    assert!(format!("{:#}", err).contains("disk I/O error"));
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn single_storage_failure_is_survived() -> Result<()> {
    let (source, _released) = ScriptedSource::new(4);
    let mut frame_loop = build_loop(
        source,
        &[Some(0.8); 4],
        replies(&["AB12CD"]),
        Box::new(FailingStore),
        LoopSettings::default(),
    );

    let summary = frame_loop.run(&StopSignal::new())?;

    assert_eq!(summary.storage_failures, 1);
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.frames_with_detection, 4);
    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    Ok(())
}

#[test]
fn stop_signal_ends_loop_and_releases_source() -> Result<()> {
    let stop = StopSignal::new();
    let (mut source, released) = ScriptedSource::new(100);
    source.stop_after = Some((3, stop.clone()));
    let mut frame_loop = build_loop(
        source,
        &[],
        Vec::new(),
        Box::new(InMemoryPlateStore::new()),
        LoopSettings::default(),
    );

    let summary = frame_loop.run(&stop)?;

    assert_eq!(summary.stop_reason, StopReason::Stopped);
    assert_eq!(summary.frames, 4);
    assert!(released.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn capture_error_propagates_and_releases_source() {
    let (mut source, released) = ScriptedSource::new(10);
    source.fail_after = Some(2);
    let mut frame_loop = build_loop(
        source,
        &[],
        Vec::new(),
        Box::new(InMemoryPlateStore::new()),
        LoopSettings::default(),
    );

    assert!(frame_loop.run(&StopSignal::new()).is_err());
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn connect_failure_still_releases_source() {
    let (mut source, released) = ScriptedSource::new(10);
    source.fail_connect = true;
    let mut frame_loop = build_loop(
        source,
        &[],
        Vec::new(),
        Box::new(InMemoryPlateStore::new()),
        LoopSettings::default(),
    );

    assert!(frame_loop.run(&StopSignal::new()).is_err());
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn detector_errors_count_as_no_detection() -> Result<()> {
    let (source, _released) = ScriptedSource::new(5);
    let mut frame_loop = FrameLoop::new(
        Box::new(source),
        Box::new(FailingDetector),
        ConfirmationGate::new(GateConfig::default())?,
        RecognitionInvoker::new(Box::new(ScriptedRecognizer::new(replies(&["AB12CD"])))),
        Box::new(InMemoryPlateStore::new()),
        LoopSettings::default(),
    );

    let summary = frame_loop.run(&StopSignal::new())?;

    assert_eq!(summary.frames, 5);
    assert_eq!(summary.frames_with_detection, 0);
    assert_eq!(summary.triggers, 0);
    Ok(())
}

#[test]
fn synthetic_scene_from_config_stores_first_plate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("plates.db");
    let config_path = dir.path().join("plate_sentry.json");
    let config = serde_json::json!({
        "db_path": db_path.to_str().expect("utf-8 path"),
        "source": { "url": "stub://street", "target_fps": 50, "width": 320, "height": 240 },
        "gate": { "dwell_ms": 500 },
        "detector": { "backend": "luma" },
        "recognizer": { "backend": "scripted", "plates": ["ab 12 cd", "KL55MN"] }
    });
    std::fs::write(&config_path, serde_json::to_vec(&config)?)?;

    let cfg = plate_sentry::PlateSentryConfig::load_from(Some(&config_path))?;
    // One visit (40 frames) plus the empty stretch after it.
    let mut frame_loop = FrameLoop::from_config(&cfg)?.with_max_frames(Some(70));
    let summary = frame_loop.run(&StopSignal::new())?;

    assert_eq!(summary.stop_reason, StopReason::FrameLimit);
    assert_eq!(summary.triggers, 1);
    assert_eq!(summary.stored, 1);

    let store = SqlitePlateStore::open(db_path.to_str().expect("utf-8 path"))?;
    let records = store.list(10)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].plate_text.as_str(), "AB12CD");
    Ok(())
}

fn still_image_config(dir: &std::path::Path) -> Result<plate_sentry::PlateSentryConfig> {
    let config_path = dir.join("plate_sentry.json");
    let config = serde_json::json!({
        "db_path": dir.join("plates.db").to_str().expect("utf-8 path"),
        "detector": { "backend": "luma" },
        "recognizer": { "backend": "scripted", "plates": ["ab 12 cd"] }
    });
    std::fs::write(&config_path, serde_json::to_vec(&config)?)?;
    plate_sentry::PlateSentryConfig::load_from(Some(&config_path))
}

#[test]
fn single_photo_stores_its_plate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = still_image_config(dir.path())?;
    let photo = dir.path().join("car.png");
    let mut image = RgbImage::from_pixel(320, 240, image::Rgb([30, 30, 30]));
    for y in 150..180 {
        for x in 100..220 {
            image.put_pixel(x, y, image::Rgb([250, 250, 250]));
        }
    }
    image.save(&photo)?;

    let outcome = plate_sentry::check_still_image(&cfg, &photo)?;
    match outcome {
        Some(plate_sentry::RecognitionOutcome::Stored(record)) => {
            assert_eq!(record.plate_text.as_str(), "AB12CD");
        }
        other => panic!("expected a stored plate, got {:?}", other),
    }

    let store = SqlitePlateStore::open(&cfg.db_path)?;
    assert_eq!(store.count()?, 1);
    assert_eq!(store.list(10)?[0].plate_text.as_str(), "AB12CD");

    // A second look at the same photo finds the plate already stored.
    assert!(matches!(
        plate_sentry::check_still_image(&cfg, &photo)?,
        Some(plate_sentry::RecognitionOutcome::Duplicate(_))
    ));
    Ok(())
}

#[test]
fn photo_without_plate_stores_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = still_image_config(dir.path())?;
    let photo = dir.path().join("night.png");
    RgbImage::from_pixel(320, 240, image::Rgb([10, 10, 10])).save(&photo)?;

    assert!(plate_sentry::check_still_image(&cfg, &photo)?.is_none());
    assert_eq!(SqlitePlateStore::open(&cfg.db_path)?.count()?, 0);
    Ok(())
}

#[test]
fn single_photo_path_opens_as_frame_source() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let photo = dir.path().join("car.jpg");
    RgbImage::from_pixel(64, 48, image::Rgb([90, 90, 90])).save(&photo)?;

    let settings = plate_sentry::SourceSettings {
        url: photo.to_str().expect("utf-8 path").to_string(),
        ..Default::default()
    };
    let mut source = plate_sentry::open_source(&settings)?;
    source.connect()?;
    assert!(source.next_frame()?.is_some());
    assert!(source.next_frame()?.is_none());
    source.release();
    Ok(())
}
