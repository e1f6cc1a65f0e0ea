//! Video sources.
//!
//! A `FrameSource` is the opaque stream capability behind each camera worker:
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//! - Synthetic `stub://` streams (tests and dry runs)
//!
//! Sources report failures as `SourceError`, never by panicking. The worker decides
//! what to do with each kind; every kind currently leads to a reconnect.
//!
//! Sources own their decoder buffering. The pipeline never queues frames, so a slow
//! detector causes the source to drop frames, not the worker.

pub mod rtsp;

use std::fmt;

use crate::config::StreamSettings;
use crate::frame::Frame;
use crate::Camera;

pub use rtsp::{RtspConfig, RtspSource};

/// Structured failure signal from a video source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceError {
    /// The stream could not be opened or started.
    OpenFailed(String),
    /// The stream ended (EOS or closed connection).
    EndOfStream,
    /// No frame arrived within the read timeout.
    Stalled,
    /// Decoder or transport error while reading.
    Io(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::OpenFailed(_) => "open_failed",
            SourceError::EndOfStream => "end_of_stream",
            SourceError::Stalled => "stalled",
            SourceError::Io(_) => "io",
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::OpenFailed(reason) => write!(f, "stream open failed: {}", reason),
            SourceError::EndOfStream => write!(f, "stream ended"),
            SourceError::Stalled => write!(f, "stream stalled"),
            SourceError::Io(reason) => write!(f, "stream read error: {}", reason),
        }
    }
}

impl std::error::Error for SourceError {}

/// Statistics for a video source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub address: String,
}

/// One open (or openable) video stream.
pub trait FrameSource: Send {
    /// Start the stream. Must be called before `read_frame`.
    fn connect(&mut self) -> Result<(), SourceError>;

    /// Block until the next frame is available or the stream fails.
    fn read_frame(&mut self) -> Result<Frame, SourceError>;

    /// Release the underlying handle. Safe to call more than once.
    fn close(&mut self) {}

    fn stats(&self) -> SourceStats;
}

/// Builds a fresh `FrameSource` for a camera. Called on every (re)connect.
pub trait SourceFactory: Send + Sync {
    fn open(&self, camera: &Camera) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Default factory: picks the source implementation from the stream address.
#[derive(Clone, Debug)]
pub struct StreamSourceFactory {
    settings: StreamSettings,
}

impl StreamSourceFactory {
    pub fn new(settings: StreamSettings) -> Self {
        Self { settings }
    }
}

impl SourceFactory for StreamSourceFactory {
    fn open(&self, camera: &Camera) -> Result<Box<dyn FrameSource>, SourceError> {
        let config = RtspConfig {
            url: camera.stream_address.clone(),
            target_fps: self.settings.target_fps,
            width: self.settings.width,
            height: self.settings.height,
            read_timeout: self.settings.read_timeout,
        };
        let source = RtspSource::new(config)?;
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CameraId;

    #[test]
    fn factory_opens_stub_streams() {
        let factory = StreamSourceFactory::new(StreamSettings {
            target_fps: 0,
            width: 8,
            height: 4,
            ..StreamSettings::default()
        });
        let camera = Camera {
            id: CameraId::Numeric(1),
            stream_address: "stub://lobby".to_string(),
            tenant_code: "acme".to_string(),
        };
        let mut source = factory.open(&camera).expect("stub source");
        source.connect().expect("connect");
        let frame = source.read_frame().expect("frame");
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(source.stats().address, "stub://lobby");
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(SourceError::EndOfStream.kind(), "end_of_stream");
        assert_eq!(SourceError::OpenFailed("x".into()).kind(), "open_failed");
        assert_eq!(SourceError::Stalled.to_string(), "stream stalled");
    }
}
