use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::client::BackendClient;
use super::{ALERT_PATH, TENANT_HEADER};
use crate::classify::{Finding, Severity};
use crate::{Camera, CameraId};

/// Wire record posted to the backend's alert endpoint.
///
/// The tenant is not part of the body; it travels in the `x-business-code` header.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertPayload {
    pub camera_id: CameraId,
    #[serde(rename = "type")]
    pub class_name: String,
    pub confidence: f32,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub severity: Severity,
    #[serde(rename = "people_count", skip_serializing_if = "Option::is_none")]
    pub person_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_sqm: Option<f64>,
}

impl AlertPayload {
    pub fn from_finding(camera: &Camera, finding: &Finding, timestamp: Duration) -> Self {
        Self {
            camera_id: camera.id.clone(),
            class_name: finding.class_name.clone(),
            confidence: finding.confidence,
            timestamp: timestamp.as_secs_f64(),
            severity: finding.severity,
            person_count: Some(finding.person_count),
            area_sqm: Some(finding.area_sqm),
        }
    }
}

/// Why a single alert was not delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchFailure {
    Encode(String),
    Transport(String),
    Status(u16),
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchFailure::Encode(reason) => write!(f, "encode error: {}", reason),
            DispatchFailure::Transport(reason) => write!(f, "transport error: {}", reason),
            DispatchFailure::Status(code) => write!(f, "backend returned HTTP {}", code),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed(DispatchFailure),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

/// Fire-and-forget alert delivery.
///
/// Implementations never panic and never retry; a failure only affects the one
/// alert being sent.
pub trait AlertDispatcher: Send + Sync {
    fn dispatch(&self, camera: &Camera, finding: &Finding, timestamp: Duration) -> DispatchOutcome;
}

impl AlertDispatcher for BackendClient {
    fn dispatch(&self, camera: &Camera, finding: &Finding, timestamp: Duration) -> DispatchOutcome {
        let payload = AlertPayload::from_finding(camera, finding, timestamp);
        let outcome = post_alert(self, camera, &payload);
        match &outcome {
            DispatchOutcome::Delivered => log::info!(
                "[cam {}] alert delivered: {} ({:.2}) tenant={}",
                camera.id,
                payload.class_name,
                payload.confidence,
                camera.tenant_code
            ),
            DispatchOutcome::Failed(failure) => log::warn!(
                "[cam {}] alert dropped: {} ({:.2}): {}",
                camera.id,
                payload.class_name,
                payload.confidence,
                failure
            ),
        }
        outcome
    }
}

fn post_alert(client: &BackendClient, camera: &Camera, payload: &AlertPayload) -> DispatchOutcome {
    let url = match client.endpoint(ALERT_PATH) {
        Ok(url) => url,
        Err(err) => return DispatchOutcome::Failed(DispatchFailure::Transport(err.to_string())),
    };
    let body = match serde_json::to_string(payload) {
        Ok(body) => body,
        Err(err) => return DispatchOutcome::Failed(DispatchFailure::Encode(err.to_string())),
    };
    let result = client
        .agent()
        .post(url.as_str())
        .set(TENANT_HEADER, &camera.tenant_code)
        .set("Content-Type", "application/json")
        .send_string(&body);
    match result {
        Ok(response) if (200..300).contains(&response.status()) => DispatchOutcome::Delivered,
        Ok(response) => DispatchOutcome::Failed(DispatchFailure::Status(response.status())),
        Err(ureq::Error::Status(code, _)) => DispatchOutcome::Failed(DispatchFailure::Status(code)),
        Err(err) => DispatchOutcome::Failed(DispatchFailure::Transport(err.to_string())),
    }
}
