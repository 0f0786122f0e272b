use anyhow::Result;

use crate::detect::result::Detection;

/// Plate detector backend.
///
/// Given one RGB24 frame, returns every plate candidate the model sees.
/// An empty vector is a normal answer. Backends must treat the pixel slice as
/// read-only and must not keep it beyond the call.
pub trait PlateDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
