//! Decoded video frames.
//!
//! A `Frame` is produced by a `FrameSource`, borrowed by the detector for one
//! inference call, and dropped at the end of the worker's loop iteration. Frames are
//! never queued or retained by the pipeline.

use std::time::Instant;

/// One decoded RGB frame.
pub struct Frame {
    /// Packed RGB24, row-major, no padding.
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source sequence number, starting at 1 for the first frame after `connect`.
    pub sequence: u64,
    captured_at: Instant,
}

// No Clone: a frame has exactly one owner between read and drop.

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Read-only pixel access for detector backends.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Expected byte length of an RGB24 frame of this size.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
