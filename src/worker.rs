//! Per-camera pipeline loop.
//!
//! A worker owns one camera's stream for its whole life:
//! connect, read, sample, detect, classify, deduplicate, dispatch, and reconnect
//! after any stream failure until shutdown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{Classifier, Finding, SeverityTable};
use crate::config::EngineConfig;
use crate::cooldown::{AlertDeduplicator, Clock, CooldownPolicy, SystemClock};
use crate::detect::SharedDetector;
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceError, SourceFactory};
use crate::sampler::FrameSampler;
use crate::supervisor::ShutdownSignal;
use crate::transport::{AlertDispatcher, DispatchOutcome};
use crate::{Camera, CameraId};

/// Everything a worker shares with the other workers.
#[derive(Clone)]
pub struct PipelineContext {
    pub detector: SharedDetector,
    pub deduplicator: Arc<AlertDeduplicator>,
    pub dispatcher: Arc<dyn AlertDispatcher>,
    pub sources: Arc<dyn SourceFactory>,
    pub clock: Arc<dyn Clock>,
    pub classifier: Classifier,
    pub frame_stride: u32,
    pub reconnect_backoff: Duration,
    pub cooldown_policy: CooldownPolicy,
}

impl PipelineContext {
    pub fn from_config(
        config: &EngineConfig,
        detector: SharedDetector,
        dispatcher: Arc<dyn AlertDispatcher>,
        sources: Arc<dyn SourceFactory>,
    ) -> Self {
        let classifier = Classifier::new(
            SeverityTable::from_settings(&config.classes),
            config.detection.confidence_threshold,
            config.alerts.default_area_sqm,
        );
        Self {
            detector,
            deduplicator: Arc::new(AlertDeduplicator::new(config.alerts.cooldown)),
            dispatcher,
            sources,
            clock: Arc::new(SystemClock),
            classifier,
            frame_stride: config.detection.frame_stride,
            reconnect_backoff: config.stream.reconnect_backoff,
            cooldown_policy: config.alerts.cooldown_policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Connecting => "connecting",
            WorkerState::Streaming => "streaming",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters returned when a worker stops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub camera_id: CameraId,
    pub frames_read: u64,
    pub frames_inferred: u64,
    pub inference_errors: u64,
    pub alerts_sent: u64,
    pub alerts_suppressed: u64,
    pub alerts_failed: u64,
    pub reconnects: u64,
}

impl WorkerReport {
    fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            frames_read: 0,
            frames_inferred: 0,
            inference_errors: 0,
            alerts_sent: 0,
            alerts_suppressed: 0,
            alerts_failed: 0,
            reconnects: 0,
        }
    }
}

pub struct CameraWorker {
    camera: Camera,
    ctx: PipelineContext,
    sampler: FrameSampler,
    state: WorkerState,
    report: WorkerReport,
}

impl CameraWorker {
    pub fn new(camera: Camera, ctx: PipelineContext) -> Self {
        let sampler = FrameSampler::new(ctx.frame_stride);
        let report = WorkerReport::new(camera.id.clone());
        Self {
            camera,
            ctx,
            sampler,
            state: WorkerState::Connecting,
            report,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Run until `shutdown` is triggered. Never returns early on stream failures.
    pub fn run(mut self, shutdown: &ShutdownSignal) -> WorkerReport {
        while !shutdown.is_triggered() {
            let failure = match self.ctx.sources.open(&self.camera) {
                Ok(mut source) => {
                    let failure = match source.connect() {
                        Ok(()) => {
                            self.set_state(WorkerState::Streaming);
                            self.stream(source.as_mut(), shutdown)
                        }
                        Err(err) => Some(err),
                    };
                    source.close();
                    failure
                }
                Err(err) => Some(err),
            };
            let err = match failure {
                Some(err) => err,
                None => break,
            };

            log::warn!(
                "[cam {}] {} ({}); reconnecting in {:?}",
                self.camera.id,
                err,
                err.kind(),
                self.ctx.reconnect_backoff
            );
            self.set_state(WorkerState::Reconnecting);
            self.report.reconnects += 1;
            if !shutdown.sleep(self.ctx.reconnect_backoff) {
                break;
            }
            self.set_state(WorkerState::Connecting);
        }
        self.set_state(WorkerState::Stopped);
        self.report
    }

    /// Read frames until the source fails (returns the failure) or shutdown (None).
    fn stream(&mut self, source: &mut dyn FrameSource, shutdown: &ShutdownSignal) -> Option<SourceError> {
        while !shutdown.is_triggered() {
            match source.read_frame() {
                Ok(frame) => {
                    self.report.frames_read += 1;
                    if self.sampler.observe() {
                        self.process(&frame);
                    }
                }
                Err(err) => return Some(err),
            }
        }
        None
    }

    fn process(&mut self, frame: &Frame) {
        self.report.frames_inferred += 1;
        let observations = match self.ctx.detector.detect(frame) {
            Ok(observations) => observations,
            Err(err) => {
                self.report.inference_errors += 1;
                log::warn!(
                    "[cam {}] inference failed on frame {}: {:#}",
                    self.camera.id,
                    frame.sequence,
                    err
                );
                return;
            }
        };
        log::trace!(
            "[cam {}] frame {}: {} observation(s), {} ms after capture",
            self.camera.id,
            frame.sequence,
            observations.len(),
            frame.age_ms()
        );
        for finding in self.ctx.classifier.classify(&observations) {
            self.raise(&finding);
        }
    }

    fn raise(&mut self, finding: &Finding) {
        let now = self.ctx.clock.now();
        let admission = match self
            .ctx
            .deduplicator
            .try_admit(&self.camera, &finding.class_name, now)
        {
            Some(admission) => admission,
            None => {
                self.report.alerts_suppressed += 1;
                log::debug!(
                    "[cam {}] {} suppressed by cooldown",
                    self.camera.id,
                    finding.class_name
                );
                return;
            }
        };
        match self.ctx.dispatcher.dispatch(&self.camera, finding, now) {
            DispatchOutcome::Delivered => self.report.alerts_sent += 1,
            DispatchOutcome::Failed(_) => {
                self.report.alerts_failed += 1;
                if self.ctx.cooldown_policy == CooldownPolicy::RecordOnDelivery {
                    self.ctx.deduplicator.rollback(admission);
                }
            }
        }
    }

    fn set_state(&mut self, next: WorkerState) {
        if self.state != next {
            log::info!("[cam {}] {} -> {}", self.camera.id, self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::cooldown::ManualClock;
    use crate::detect::{Observation, ScriptedFrame, StubBackend};
    use crate::ingest::SourceStats;
    use crate::transport::DispatchFailure;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Instant;

    const WEAPON: u32 = 1;

    /// Plays `frames` frames, then fails with `error`.
    struct ScriptedSource {
        frames: u64,
        read: u64,
        error: SourceError,
        closed: Arc<Mutex<u32>>,
    }

    impl FrameSource for ScriptedSource {
        fn connect(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame, SourceError> {
            if self.read == self.frames {
                return Err(self.error.clone());
            }
            self.read += 1;
            Ok(Frame::new(vec![0; 12], 2, 2, self.read))
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() += 1;
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.read,
                address: "scripted".to_string(),
            }
        }
    }

    /// Hands out one scripted session per open; triggers shutdown once they run out.
    struct ScriptedFactory {
        sessions: Mutex<VecDeque<(u64, SourceError)>>,
        opened_at: Mutex<Vec<Instant>>,
        closed: Arc<Mutex<u32>>,
        shutdown: ShutdownSignal,
    }

    impl ScriptedFactory {
        fn new(sessions: Vec<(u64, SourceError)>, shutdown: ShutdownSignal) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
                opened_at: Mutex::new(Vec::new()),
                closed: Arc::new(Mutex::new(0)),
                shutdown,
            }
        }
    }

    impl SourceFactory for ScriptedFactory {
        fn open(&self, _camera: &Camera) -> Result<Box<dyn FrameSource>, SourceError> {
            self.opened_at.lock().unwrap().push(Instant::now());
            match self.sessions.lock().unwrap().pop_front() {
                Some((frames, error)) => Ok(Box::new(ScriptedSource {
                    frames,
                    read: 0,
                    error,
                    closed: self.closed.clone(),
                })),
                None => {
                    self.shutdown.trigger();
                    Err(SourceError::OpenFailed("no more sessions".to_string()))
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        fail: bool,
        sent: Mutex<Vec<(String, Duration)>>,
        tenants: Mutex<Vec<String>>,
    }

    impl AlertDispatcher for RecordingDispatcher {
        fn dispatch(&self, camera: &Camera, finding: &Finding, timestamp: Duration) -> DispatchOutcome {
            self.tenants.lock().unwrap().push(camera.tenant_code.clone());
            self.sent
                .lock()
                .unwrap()
                .push((finding.class_name.clone(), timestamp));
            if self.fail {
                DispatchOutcome::Failed(DispatchFailure::Status(503))
            } else {
                DispatchOutcome::Delivered
            }
        }
    }

    fn camera() -> Camera {
        Camera {
            id: CameraId::Numeric(7),
            stream_address: "scripted".to_string(),
            tenant_code: "acme".to_string(),
        }
    }

    fn context(
        backend: StubBackend,
        dispatcher: Arc<RecordingDispatcher>,
        factory: Arc<ScriptedFactory>,
    ) -> PipelineContext {
        let mut config = EngineConfig::default();
        config.stream.reconnect_backoff = Duration::from_millis(20);
        PipelineContext::from_config(&config, SharedDetector::new(backend), dispatcher, factory)
    }

    fn weapon_every_frame() -> StubBackend {
        StubBackend::scripted(vec![ScriptedFrame::Observations(vec![Observation::new(
            WEAPON, 0.9,
        )])])
        .repeating()
    }

    #[test]
    fn ten_frames_with_stride_five_run_inference_twice() {
        let shutdown = ShutdownSignal::new();
        let backend = StubBackend::new();
        let calls = backend.call_counter();
        let factory = Arc::new(ScriptedFactory::new(
            vec![(10, SourceError::EndOfStream)],
            shutdown.clone(),
        ));
        let ctx = context(backend, Arc::default(), factory);
        let report = CameraWorker::new(camera(), ctx).run(&shutdown);
        assert_eq!(report.frames_read, 10);
        assert_eq!(report.frames_inferred, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn read_failure_reconnects_after_backoff_and_resumes() {
        let shutdown = ShutdownSignal::new();
        let factory = Arc::new(ScriptedFactory::new(
            vec![(3, SourceError::Stalled), (4, SourceError::Io("reset".into()))],
            shutdown.clone(),
        ));
        let ctx = context(StubBackend::new(), Arc::default(), factory.clone());
        let report = CameraWorker::new(camera(), ctx).run(&shutdown);

        assert_eq!(report.frames_read, 7);
        assert!(report.reconnects >= 2);
        let opened = factory.opened_at.lock().unwrap();
        assert!(opened.len() >= 2);
        assert!(opened[1] - opened[0] >= Duration::from_millis(20));
        assert_eq!(*factory.closed.lock().unwrap(), 2);
    }

    #[test]
    fn sampling_phase_carries_across_reconnects() {
        let shutdown = ShutdownSignal::new();
        let factory = Arc::new(ScriptedFactory::new(
            vec![(3, SourceError::EndOfStream), (2, SourceError::EndOfStream)],
            shutdown.clone(),
        ));
        let ctx = context(StubBackend::new(), Arc::default(), factory);
        let report = CameraWorker::new(camera(), ctx).run(&shutdown);
        assert_eq!(report.frames_read, 5);
        assert_eq!(report.frames_inferred, 1);
    }

    #[test]
    fn repeated_findings_are_suppressed_inside_cooldown() {
        let shutdown = ShutdownSignal::new();
        let factory = Arc::new(ScriptedFactory::new(
            vec![(25, SourceError::EndOfStream)],
            shutdown.clone(),
        ));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1_000)));
        let ctx = context(weapon_every_frame(), dispatcher.clone(), factory).with_clock(clock);
        let report = CameraWorker::new(camera(), ctx).run(&shutdown);

        assert_eq!(report.frames_inferred, 5);
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(report.alerts_suppressed, 4);
        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(*sent, vec![("weapon".to_string(), Duration::from_secs(1_000))]);
    }

    #[test]
    fn same_camera_id_in_two_tenants_alerts_for_both() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = Arc::new(ManualClock::new(Duration::from_secs(500)));
        let mut shared = None;
        for tenant in ["chennai", "madurai"] {
            let shutdown = ShutdownSignal::new();
            let factory = Arc::new(ScriptedFactory::new(
                vec![(5, SourceError::EndOfStream)],
                shutdown.clone(),
            ));
            let ctx = match &shared {
                None => {
                    let ctx = context(weapon_every_frame(), dispatcher.clone(), factory)
                        .with_clock(clock.clone());
                    shared = Some(ctx.clone());
                    ctx
                }
                Some(first) => PipelineContext {
                    sources: factory,
                    ..PipelineContext::clone(first)
                },
            };
            let camera = Camera {
                id: CameraId::Numeric(1),
                stream_address: "scripted".to_string(),
                tenant_code: tenant.to_string(),
            };
            let report = CameraWorker::new(camera, ctx).run(&shutdown);
            assert_eq!(report.alerts_sent, 1, "{}", tenant);
        }
        assert_eq!(*dispatcher.tenants.lock().unwrap(), vec!["chennai", "madurai"]);
    }

    #[test]
    fn inference_errors_skip_the_frame() {
        let shutdown = ShutdownSignal::new();
        let factory = Arc::new(ScriptedFactory::new(
            vec![(10, SourceError::EndOfStream)],
            shutdown.clone(),
        ));
        let backend = StubBackend::scripted(vec![
            ScriptedFrame::Error("model exploded".to_string()),
            ScriptedFrame::Observations(vec![Observation::new(WEAPON, 0.8)]),
        ]);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let ctx = context(backend, dispatcher.clone(), factory);
        let report = CameraWorker::new(camera(), ctx).run(&shutdown);
        assert_eq!(report.inference_errors, 1);
        assert_eq!(report.alerts_sent, 1);
    }

    #[test]
    fn failed_delivery_rolls_back_under_record_on_delivery() {
        for (policy, expected_attempts) in [
            (CooldownPolicy::RecordOnAdmit, 1),
            (CooldownPolicy::RecordOnDelivery, 3),
        ] {
            let shutdown = ShutdownSignal::new();
            let factory = Arc::new(ScriptedFactory::new(
                vec![(15, SourceError::EndOfStream)],
                shutdown.clone(),
            ));
            let dispatcher = Arc::new(RecordingDispatcher {
                fail: true,
                ..Default::default()
            });
            let clock = Arc::new(ManualClock::new(Duration::from_secs(50)));
            let mut ctx =
                context(weapon_every_frame(), dispatcher.clone(), factory).with_clock(clock);
            ctx.cooldown_policy = policy;
            let report = CameraWorker::new(camera(), ctx).run(&shutdown);
            assert_eq!(report.alerts_failed, expected_attempts, "{:?}", policy);
            assert_eq!(dispatcher.sent.lock().unwrap().len() as u64, expected_attempts);
        }
    }

    #[test]
    fn pre_triggered_shutdown_stops_without_opening() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let factory = Arc::new(ScriptedFactory::new(Vec::new(), shutdown.clone()));
        let ctx = context(StubBackend::new(), Arc::default(), factory.clone());
        let worker = CameraWorker::new(camera(), ctx);
        assert_eq!(worker.state(), WorkerState::Connecting);
        let report = worker.run(&shutdown);
        assert_eq!(report.frames_read, 0);
        assert!(factory.opened_at.lock().unwrap().is_empty());
    }

    #[test]
    fn context_takes_pipeline_settings_from_config() {
        let shutdown = ShutdownSignal::new();
        let factory = Arc::new(ScriptedFactory::new(Vec::new(), shutdown));
        let ctx = context(StubBackend::new(), Arc::default(), factory);
        assert_eq!(ctx.frame_stride, 5);
        assert_eq!(ctx.deduplicator.window(), Duration::from_secs(10));
        assert_eq!(ctx.classifier.table().name(WEAPON), "weapon");
        assert_eq!(ctx.cooldown_policy, CooldownPolicy::RecordOnAdmit);
    }
}
