//! Alert deduplication.
//!
//! `AlertDeduplicator` owns the cooldown store: `(tenant, camera, class) -> last alert
//! time`. Camera ids are only unique within a tenant, so the tenant is part of the key.
//! One instance is shared by every worker; the check and the write for a key happen
//! under the same lock, so two simultaneous findings for one key cannot both pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::{Camera, CameraId};

/// Wall-clock source, injectable for tests.
pub trait Clock: Send + Sync {
    /// Time since the Unix epoch.
    fn now(&self) -> Duration;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Manually driven clock with millisecond resolution.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            millis: AtomicU64::new(saturating_millis(start)),
        }
    }

    /// Advance by `by`, saturating at `u64::MAX` milliseconds.
    pub fn advance(&self, by: Duration) {
        let by = saturating_millis(by);
        let _ = self
            .millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(by))
            });
    }

    pub fn set(&self, to: Duration) {
        self.millis.store(saturating_millis(to), Ordering::SeqCst);
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// When an admitted alert starts its cooldown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownPolicy {
    /// The cooldown starts when the alert is admitted, whatever the delivery outcome.
    #[default]
    RecordOnAdmit,
    /// A failed delivery rolls the entry back so the next finding can alert again.
    RecordOnDelivery,
}

/// `(tenant, camera, class)`.
type CooldownKey = (String, CameraId, String);

fn key(camera: &Camera, class_name: &str) -> CooldownKey {
    (
        camera.tenant_code.clone(),
        camera.id.clone(),
        class_name.to_string(),
    )
}

/// Ticket for one admitted alert, used to undo the admission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admission {
    key: CooldownKey,
    admitted_at: Duration,
    previous: Option<Duration>,
}

impl Admission {
    pub fn admitted_at(&self) -> Duration {
        self.admitted_at
    }
}

/// Sliding-window rate limiter per `(tenant, camera, class)` key.
#[derive(Debug)]
pub struct AlertDeduplicator {
    window: Duration,
    entries: Mutex<HashMap<CooldownKey, Duration>>,
}

impl AlertDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or suppress an alert at time `now`.
    ///
    /// Returns true and records `now` when the key has no entry or its entry is at
    /// least one window old. Otherwise returns false and leaves the entry untouched.
    pub fn admit(&self, camera: &Camera, class_name: &str, now: Duration) -> bool {
        self.try_admit(camera, class_name, now).is_some()
    }

    /// Like `admit`, but returns a ticket that can undo the admission.
    pub fn try_admit(
        &self,
        camera: &Camera,
        class_name: &str,
        now: Duration,
    ) -> Option<Admission> {
        let key = key(camera, class_name);
        let mut entries = self.lock();
        let previous = entries.get(&key).copied();
        if let Some(last) = previous {
            // A clock that stepped backwards counts as no time elapsed.
            if now.saturating_sub(last) < self.window {
                return None;
            }
        }
        entries.insert(key.clone(), now);
        Some(Admission {
            key,
            admitted_at: now,
            previous,
        })
    }

    /// Undo an admission, restoring the previous entry.
    ///
    /// A no-op if the entry was overwritten by a later admission.
    pub fn rollback(&self, admission: Admission) {
        let mut entries = self.lock();
        if entries.get(&admission.key) != Some(&admission.admitted_at) {
            return;
        }
        match admission.previous {
            Some(previous) => {
                entries.insert(admission.key, previous);
            }
            None => {
                entries.remove(&admission.key);
            }
        }
    }

    /// Last admitted alert time for a key.
    pub fn last_alert(&self, camera: &Camera, class_name: &str) -> Option<Duration> {
        self.lock().get(&key(camera, class_name)).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every mutation is a single map operation, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<CooldownKey, Duration>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
