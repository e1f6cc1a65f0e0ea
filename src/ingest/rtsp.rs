//! RTSP frame source.
//!
//! `RtspSource` ingests frames from IP cameras via RTSP, or from a synthetic
//! generator for `stub://` addresses.
//!
//! The RTSP source is responsible for:
//! - Connecting to camera streams
//! - Decoding video frames to packed RGB at the configured size
//! - Reporting end-of-stream and stalls as `SourceError`
//!
//! Synthetic addresses take an optional `frames` query parameter:
//! `stub://lobby?frames=20` ends the stream after 20 frames per connection.

use std::time::Duration;

use super::{FrameSource, SourceError, SourceStats};
use crate::frame::Frame;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Stream URL (e.g., "rtsp://192.168.1.100:554/stream" or "stub://lobby").
    pub url: String,
    /// Target frame rate. Synthetic streams are paced to it; 0 means unpaced.
    pub target_fps: u32,
    /// Output frame width.
    pub width: u32,
    /// Output frame height.
    pub height: u32,
    /// How long a read may wait for a frame before the stream counts as stalled.
    pub read_timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            width: 640,
            height: 640,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// RTSP frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self, SourceError> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticRtspSource::new(config)?),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                Err(SourceError::OpenFailed(format!(
                    "{} requires the rtsp-gstreamer feature",
                    config.url
                )))
            }
        }
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.close(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
        }
    }
}

fn frame_interval(target_fps: u32) -> Option<Duration> {
    if target_fps == 0 {
        None
    } else {
        Some(Duration::from_millis(1000 / target_fps as u64))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    config: RtspConfig,
    frame_limit: Option<u64>,
    frame_count: u64,
    connected: bool,
    /// Simulated "scene" state so consecutive frames differ.
    scene_state: u8,
}

impl SyntheticRtspSource {
    fn new(config: RtspConfig) -> Result<Self, SourceError> {
        let parsed = url::Url::parse(&config.url)
            .map_err(|e| SourceError::OpenFailed(format!("invalid stub url: {}", e)))?;
        let mut frame_limit = None;
        for (key, value) in parsed.query_pairs() {
            if key == "frames" {
                let limit = value.parse::<u64>().map_err(|_| {
                    SourceError::OpenFailed(format!("invalid frames value '{}'", value))
                })?;
                frame_limit = Some(limit);
            }
        }
        Ok(Self {
            config,
            frame_limit,
            frame_count: 0,
            connected: false,
            scene_state: rand::random(),
        })
    }

    /// Synthetic sources always connect.
    fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        log::info!("RtspSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if !self.connected {
            return Err(SourceError::Io("synthetic source not connected".to_string()));
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Err(SourceError::EndOfStream);
        }
        if let Some(interval) = frame_interval(self.config.target_fps) {
            std::thread::sleep(interval);
        }

        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Ok(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        ))
    }

    /// Most frames are static background; the scene shifts every 50 frames.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width as usize) * (self.config.height as usize) * 3;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            address: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build the pipeline: rtspsrc ! decodebin ! videoconvert ! videoscale ! appsink.
    fn new(config: RtspConfig) -> Result<Self, SourceError> {
        use gstreamer::prelude::*;

        gstreamer::init().map_err(|e| SourceError::OpenFailed(format!("gstreamer init: {}", e)))?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url, config.width, config.height
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .map_err(|e| SourceError::OpenFailed(format!("build RTSP pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| SourceError::OpenFailed("RTSP pipeline is not a Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| SourceError::OpenFailed("appsink element missing".to_string()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| SourceError::OpenFailed("appsink has unexpected type".to_string()))?;

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        use gstreamer::prelude::*;

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| SourceError::OpenFailed(format!("set pipeline Playing: {}", e)))?;
        log::info!("RtspSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        self.poll_bus();
        if let Some(err) = self.last_error.take() {
            return if err == "eos" {
                Err(SourceError::EndOfStream)
            } else {
                Err(SourceError::Io(err))
            };
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.config.read_timeout.as_millis() as u64);
        let sample = match self.appsink.try_pull_sample(timeout) {
            Some(sample) => sample,
            None if self.appsink.is_eos() => return Err(SourceError::EndOfStream),
            None => return Err(SourceError::Stalled),
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Ok(Frame::new(pixels, width, height, self.frame_count))
    }

    fn close(&mut self) {
        use gstreamer::prelude::*;

        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to stop {}: {}", self.config.url, e);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            address: self.config.url.clone(),
        }
    }

    fn poll_bus(&mut self) {
        use gstreamer::prelude::*;

        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("eos".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32), SourceError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| SourceError::Io("RTSP sample missing buffer".to_string()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| SourceError::Io("RTSP sample missing caps".to_string()))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| SourceError::Io(format!("parse RTSP caps: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| SourceError::Io(format!("map RTSP buffer: {}", e)))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| SourceError::Io("RTSP buffer row out of bounds".to_string()))?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(url: &str) -> RtspConfig {
        RtspConfig {
            url: url.to_string(),
            target_fps: 0,
            width: 16,
            height: 8,
            read_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn rtsp_source_produces_frames() -> Result<(), SourceError> {
        let mut source = RtspSource::new(stub_config("stub://test"))?;
        source.connect()?;

        let frame = source.read_frame()?;
        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 8);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.pixels().len(), 16 * 8 * 3);

        Ok(())
    }

    #[test]
    fn stub_stream_ends_after_frame_limit() -> Result<(), SourceError> {
        let mut source = RtspSource::new(stub_config("stub://test?frames=2"))?;
        source.connect()?;
        source.read_frame()?;
        source.read_frame()?;
        assert_eq!(source.read_frame().unwrap_err(), SourceError::EndOfStream);
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn reading_before_connect_fails() {
        let mut source = RtspSource::new(stub_config("stub://test")).unwrap();
        assert!(matches!(source.read_frame(), Err(SourceError::Io(_))));
    }

    #[test]
    fn closed_source_stops_reading() -> Result<(), SourceError> {
        let mut source = RtspSource::new(stub_config("stub://test"))?;
        source.connect()?;
        source.read_frame()?;
        source.close();
        assert!(source.read_frame().is_err());
        Ok(())
    }

    #[test]
    fn invalid_frame_limit_is_rejected() {
        let err = RtspSource::new(stub_config("stub://test?frames=lots")).err();
        assert!(matches!(err, Some(SourceError::OpenFailed(_))));
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn real_rtsp_requires_feature() {
        let err = RtspSource::new(stub_config("rtsp://10.0.0.1/stream")).err();
        assert!(matches!(err, Some(SourceError::OpenFailed(_))));
    }
}
