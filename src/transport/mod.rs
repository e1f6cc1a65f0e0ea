//! Backend transport.
//!
//! The engine talks to one backend over HTTP:
//! - roster fetch: `GET {base}/internal/cameras` with the shared internal key
//! - alert delivery: `POST {base}/ai/detect` tagged with the camera's tenant header
//!
//! Both calls use one `ureq::Agent` with a bounded timeout so a slow backend cannot
//! stall a camera loop indefinitely.

mod alert;
mod client;
mod roster;

pub use alert::{AlertDispatcher, AlertPayload, DispatchFailure, DispatchOutcome};
pub use client::BackendClient;
pub use roster::{fetch_roster_or_empty, RosterSource, StaticRoster};

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";
pub const TENANT_HEADER: &str = "x-business-code";
pub const ROSTER_PATH: &str = "internal/cameras";
pub const ALERT_PATH: &str = "ai/detect";
