mod backend;
mod backends;
mod result;
mod shared;

pub use backend::DetectorBackend;
pub use backends::{ScriptedFrame, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Observation};
pub use shared::{load_detector, SharedDetector};
