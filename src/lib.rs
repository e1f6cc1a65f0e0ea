//! Sentinel engine
//!
//! Multi-camera detection and alert pipeline. Each camera gets one worker thread that
//! reads frames, samples them, runs the shared detector, classifies findings by
//! severity, suppresses repeats within a cooldown window, and forwards alerts to the
//! backend under the camera's tenant.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames handed from source to detector
//! - `ingest`: video sources (RTSP, synthetic `stub://`)
//! - `detect`: detector backends and the shared, lock-serialized detector
//! - `sampler`: per-camera frame stride
//! - `classify`: severity table and per-frame triage
//! - `cooldown`: per-(tenant, camera, class) alert deduplication
//! - `transport`: backend roster fetch and alert delivery
//! - `worker`: per-camera connect/stream/reconnect loop
//! - `supervisor`: roster to worker threads, shutdown and join
//! - `config`: file + env configuration

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod classify;
pub mod config;
pub mod cooldown;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod sampler;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use classify::{Classifier, Finding, Severity, SeverityTable};
pub use config::EngineConfig;
pub use cooldown::{AlertDeduplicator, Clock, CooldownPolicy, ManualClock, SystemClock};
pub use detect::{load_detector, DetectorBackend, Observation, SharedDetector, StubBackend};
pub use frame::Frame;
pub use ingest::{FrameSource, SourceError, SourceFactory, StreamSourceFactory};
pub use sampler::FrameSampler;
pub use supervisor::{ShutdownSignal, Supervisor};
pub use transport::{AlertDispatcher, AlertPayload, BackendClient, DispatchOutcome, RosterSource};
pub use worker::{CameraWorker, PipelineContext, WorkerReport, WorkerState};

/// Camera identity as issued by the backend.
///
/// The backend may hand out integer ids or UUID strings; the id is echoed back in
/// alerts with the same JSON type it arrived with.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CameraId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraId::Numeric(id) => write!(f, "{}", id),
            CameraId::Text(id) => f.write_str(id),
        }
    }
}

/// One roster entry. Immutable for the lifetime of its worker.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    #[serde(alias = "rtsp_url")]
    pub stream_address: String,
    #[serde(alias = "business_code")]
    pub tenant_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_accepts_backend_field_names() {
        let camera: Camera = serde_json::from_str(
            r#"{"id": 4, "rtsp_url": "rtsp://cam/4", "business_code": "chennai", "schema": "tenant_chennai"}"#,
        )
        .unwrap();
        assert_eq!(camera.id, CameraId::Numeric(4));
        assert_eq!(camera.stream_address, "rtsp://cam/4");
        assert_eq!(camera.tenant_code, "chennai");
    }

    #[test]
    fn camera_accepts_uuid_ids_and_canonical_names() {
        let camera: Camera = serde_json::from_str(
            r#"{"id": "9b1d-77", "stream_address": "stub://x", "tenant_code": "acme"}"#,
        )
        .unwrap();
        assert_eq!(camera.id, CameraId::Text("9b1d-77".to_string()));
        assert_eq!(camera.id.to_string(), "9b1d-77");
    }

    #[test]
    fn camera_id_serializes_with_its_json_type() {
        assert_eq!(serde_json::to_string(&CameraId::Numeric(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&CameraId::Text("a".into())).unwrap(),
            "\"a\""
        );
    }
}
