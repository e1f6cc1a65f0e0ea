use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::config::{ModelBackendKind, ModelSettings};
use crate::detect::backend::DetectorBackend;
use crate::detect::backends::StubBackend;
use crate::detect::result::Observation;
use crate::frame::Frame;

/// A single loaded detector shared by every camera worker.
///
/// Backends are wrapped in a `Mutex` because `DetectorBackend::detect` takes
/// `&mut self`; concurrent workers queue on the lock and run inference one at a
/// time. Cloning shares the same model instance.
#[derive(Clone)]
pub struct SharedDetector {
    name: &'static str,
    inner: Arc<Mutex<Box<dyn DetectorBackend>>>,
}

impl SharedDetector {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            name: backend.name(),
            inner: Arc::new(Mutex::new(backend)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run detection on one frame, serialized against all other callers.
    ///
    /// A panicking backend is reported as an error for that frame only; the lock is
    /// recovered so other cameras keep running inference.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Observation>> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        panic::catch_unwind(AssertUnwindSafe(|| guard.detect(frame))).map_err(|payload| {
            anyhow!(
                "detector '{}' panicked: {}",
                self.name,
                panic_message(&*payload)
            )
        })?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Load the configured detector backend and warm it up.
///
/// Any error here is a startup failure: the engine cannot run without a model.
pub fn load_detector(settings: &ModelSettings) -> Result<SharedDetector> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend {
        ModelBackendKind::Stub => Box::new(StubBackend::new()),
        ModelBackendKind::Tract => load_tract(settings)?,
    };
    backend.warm_up()?;
    log::info!("detector backend '{}' loaded", backend.name());
    Ok(SharedDetector::from_boxed(backend))
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    use crate::detect::backends::TractBackend;

    let path = settings
        .path
        .as_ref()
        .ok_or_else(|| anyhow!("model.path is required for the tract backend"))?;
    let backend = TractBackend::new(path, settings.input_width, settings.input_height)?
        .with_thresholds(settings.confidence_floor, settings.iou_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    anyhow::bail!("the tract model backend requires the backend-tract feature")
}
