mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::PlateDetector;
pub use backends::{LumaDetector, ScriptedDetector};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{best_detection, BoundingBox, Detection, PixelRect};

/// Build the detector named by the configuration.
///
/// Fails when the backend is unknown, compiled out, or cannot load its model.
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn PlateDetector>> {
    let mut detector: Box<dyn PlateDetector> = match settings.backend.as_str() {
        "luma" => Box::new(LumaDetector::new()),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model_path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
            Box::new(
                TractBackend::new(model_path, settings.input_width, settings.input_height)?
                    .with_min_confidence(settings.min_confidence),
            )
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => {
            return Err(anyhow!(
                "detector backend 'tract' requires the backend-tract feature"
            ))
        }
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    };
    detector.warm_up()?;
    Ok(detector)
}
