//! Plate Sentry
//!
//! Watches a video stream for license plates and records each distinct plate
//! once.
//!
//! # Architecture
//!
//! Every frame goes through the same steps:
//!
//! 1. **Detect**: a `PlateDetector` proposes plate boxes with a confidence.
//! 2. **Confirm**: the best detection's confidence feeds the
//!    `ConfirmationGate`, which only triggers once a plate has stayed above
//!    the confidence threshold for the dwell duration.
//! 3. **Recognize**: on a trigger the `RecognitionInvoker` crops the box, runs
//!    the `Recognizer` and normalizes the text.
//! 4. **Record**: the `PlateStore` inserts the plate if it has not been seen
//!    before. Insert-if-absent is atomic across connections and processes.
//!
//! # Module Structure
//!
//! - `config`: file + environment configuration
//! - `detect`: detector trait, backends and detection geometry
//! - `frame`: captured RGB frames
//! - `gate`: dwell-confirmation state machine
//! - `ingest`: frame sources (synthetic, image directory, V4L2)
//! - `pipeline`: the frame loop
//! - `plate`: normalized plate text and stored records
//! - `recognize`: recognizer trait, backends and the invoker
//! - `storage`: SQLite and in-memory plate stores

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};

pub mod config;
pub mod detect;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod pipeline;
pub mod plate;
pub mod recognize;
pub mod storage;

pub use config::{
    DetectorSettings, PipelineSettings, PlateSentryConfig, RecognizerSettings, SourceSettings,
};
pub use detect::{best_detection, BoundingBox, Detection, PlateDetector};
pub use frame::Frame;
pub use gate::{ConfirmationGate, ConfirmationState, GateConfig, GatePhase, GateTransition};
pub use ingest::{open_source, read_still_frame, FrameSource, SourceStats};
pub use pipeline::{
    check_still_image, FrameLoop, FrameReport, LoopSettings, LoopSummary, StopReason, StopSignal,
};
pub use plate::{PlateRecord, PlateText};
pub use recognize::{RecognitionInvoker, RecognitionOutcome, Recognizer, TextFragment};
pub use storage::{InMemoryPlateStore, InsertOutcome, PlateStore, SqlitePlateStore};

/// URI for a named, shared in-memory SQLite database.
///
/// Every connection opened with the same URI sees the same data, which lets
/// tests exercise cross-connection behavior without touching disk.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:plate_sentry_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
