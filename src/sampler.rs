//! Frame sampling: only one of every `stride` frames reaches the detector.

/// Pure eligibility rule: frame `counter` is sampled iff `counter % stride == 0`.
///
/// A stride of 0 is treated as 1 (every frame); config validation rejects it
/// before it gets here.
pub fn is_eligible(counter: u64, stride: u32) -> bool {
    counter % u64::from(stride.max(1)) == 0
}

/// Per-camera frame counter.
///
/// Created once per worker and kept across reconnects, so the sampling phase carries
/// over when a stream is reopened.
#[derive(Debug)]
pub struct FrameSampler {
    stride: u32,
    counter: u64,
}

impl FrameSampler {
    pub fn new(stride: u32) -> Self {
        Self {
            stride: stride.max(1),
            counter: 0,
        }
    }

    /// Count one incoming frame and report whether it should be inferred.
    pub fn observe(&mut self) -> bool {
        self.counter += 1;
        is_eligible(self.counter, self.stride)
    }

    pub fn frames_seen(&self) -> u64 {
        self.counter
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }
}
