use anyhow::{anyhow, Context, Result};

use super::client::BackendClient;
use super::{INTERNAL_KEY_HEADER, ROSTER_PATH};
use crate::Camera;

/// Source of the camera roster, consulted once at startup.
pub trait RosterSource: Send + Sync {
    fn fetch_cameras(&self) -> Result<Vec<Camera>>;
}

impl RosterSource for BackendClient {
    fn fetch_cameras(&self) -> Result<Vec<Camera>> {
        let url = self.endpoint(ROSTER_PATH)?;
        let response = match self
            .agent()
            .get(url.as_str())
            .set(INTERNAL_KEY_HEADER, self.internal_key())
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(anyhow!("roster request to {} returned HTTP {}", url, code))
            }
            Err(err) => return Err(anyhow!("roster request to {} failed: {}", url, err)),
        };
        let body = response.into_string().context("read roster response")?;
        parse_roster(&body)
    }
}

/// Parse a roster body, skipping malformed entries.
///
/// A body that is not a JSON array is an error; a bad entry only drops that camera.
pub(crate) fn parse_roster(body: &str) -> Result<Vec<Camera>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(body).context("parse roster response")?;
    let mut cameras = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Camera>(entry) {
            Ok(camera) => cameras.push(camera),
            Err(err) => log::warn!("skipping roster entry {}: {}", index, err),
        }
    }
    Ok(cameras)
}

/// Fixed roster, for dry runs and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticRoster(pub Vec<Camera>);

impl RosterSource for StaticRoster {
    fn fetch_cameras(&self) -> Result<Vec<Camera>> {
        Ok(self.0.clone())
    }
}

/// Fetch the roster, degrading any failure to an empty roster with a warning.
pub fn fetch_roster_or_empty(source: &dyn RosterSource) -> Vec<Camera> {
    match source.fetch_cameras() {
        Ok(cameras) if cameras.is_empty() => {
            log::warn!("roster is empty; no cameras to watch");
            cameras
        }
        Ok(cameras) => {
            log::info!("roster fetched: {} camera(s)", cameras.len());
            cameras
        }
        Err(err) => {
            log::warn!("roster fetch failed, starting with no cameras: {:#}", err);
            Vec::new()
        }
    }
}
