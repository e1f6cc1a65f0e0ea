use anyhow::Result;

use crate::detect::result::Observation;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one loaded model. `detect` takes `&mut self`, so a backend is
/// not assumed to be safe for concurrent calls; workers share it through
/// `SharedDetector`, which serializes access.
///
/// Implementations must treat the frame as read-only and must not retain it past the
/// `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame and return every observation the model reports.
    ///
    /// Confidence filtering is the classifier's job; backends may still drop
    /// candidates below their own floor (for example before NMS).
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Observation>>;

    /// Optional warm-up hook, run once at load time.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
