use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Observation;
use crate::frame::Frame;

/// One scripted reply from the stub backend.
#[derive(Clone, Debug)]
pub enum ScriptedFrame {
    Observations(Vec<Observation>),
    Error(String),
}

/// Stub backend for testing and dry runs.
///
/// Without a script it reports nothing. With a script it replays the entries in call
/// order and cycles when `repeat` is set; once a non-repeating script is exhausted it
/// reports nothing.
pub struct StubBackend {
    script: VecDeque<ScriptedFrame>,
    repeat: bool,
    calls: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            repeat: false,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn scripted(script: Vec<ScriptedFrame>) -> Self {
        Self {
            script: script.into(),
            ..Self::new()
        }
    }

    /// Cycle through the script forever.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Shared counter of `detect` calls, readable after the backend is boxed.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Observation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(next) = self.script.pop_front() else {
            return Ok(Vec::new());
        };
        if self.repeat {
            self.script.push_back(next.clone());
        }
        match next {
            ScriptedFrame::Observations(observations) => Ok(observations),
            ScriptedFrame::Error(message) => Err(anyhow!(message)),
        }
    }
}
