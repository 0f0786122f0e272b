pub mod luma;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use luma::LumaDetector;
pub use scripted::ScriptedDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
