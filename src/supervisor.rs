//! Worker supervision.
//!
//! The supervisor reads the roster once, starts one named thread per camera, and on
//! shutdown joins every worker so each one releases its stream before the process
//! exits.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::transport::{fetch_roster_or_empty, RosterSource};
use crate::worker::{CameraWorker, PipelineContext, WorkerReport};
use crate::CameraId;

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Process-wide stop flag, cloned into every worker.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices.
    ///
    /// Returns false if shutdown was triggered before the time was up.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }

    /// Block until shutdown is triggered.
    pub fn wait(&self) {
        while !self.is_triggered() {
            std::thread::sleep(SHUTDOWN_POLL);
        }
    }
}

pub struct Supervisor {
    ctx: PipelineContext,
    roster: Arc<dyn RosterSource>,
    shutdown: ShutdownSignal,
    workers: Vec<(CameraId, JoinHandle<WorkerReport>)>,
}

impl Supervisor {
    pub fn new(ctx: PipelineContext, roster: Arc<dyn RosterSource>, shutdown: ShutdownSignal) -> Self {
        Self {
            ctx,
            roster,
            shutdown,
            workers: Vec::new(),
        }
    }

    /// Fetch the roster and spawn one worker per camera.
    ///
    /// A failed or empty roster is not an error; it yields zero workers. Returns the
    /// number of workers started. If a worker thread cannot be spawned, the workers
    /// already running are stopped and joined before the error is returned.
    pub fn start(&mut self) -> Result<usize> {
        self.start_with(spawn_worker_thread)
    }

    fn start_with<F>(&mut self, mut spawn: F) -> Result<usize>
    where
        F: FnMut(CameraWorker, ShutdownSignal) -> io::Result<JoinHandle<WorkerReport>>,
    {
        let cameras = fetch_roster_or_empty(self.roster.as_ref());
        for camera in cameras {
            let id = camera.id.clone();
            let worker = CameraWorker::new(camera, self.ctx.clone());
            match spawn(worker, self.shutdown.clone()) {
                Ok(handle) => {
                    log::info!("[cam {}] worker started", id);
                    self.workers.push((id, handle));
                }
                Err(err) => {
                    log::error!("[cam {}] failed to spawn worker: {}", id, err);
                    self.shutdown.trigger();
                    let stopped = std::mem::take(&mut self.workers);
                    join_workers(stopped);
                    return Err(err)
                        .with_context(|| format!("spawn worker thread for camera {}", id));
                }
            }
        }
        log::info!("supervisor running {} worker(s)", self.workers.len());
        Ok(self.workers.len())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Block until shutdown is triggered, then join every worker.
    pub fn wait_for_shutdown(self) -> Vec<WorkerReport> {
        self.shutdown.wait();
        log::info!("shutdown requested, stopping {} worker(s)", self.workers.len());
        self.join()
    }

    /// `start` followed by `wait_for_shutdown`.
    pub fn run_until_shutdown(mut self) -> Result<Vec<WorkerReport>> {
        self.start()?;
        Ok(self.wait_for_shutdown())
    }

    fn join(self) -> Vec<WorkerReport> {
        join_workers(self.workers)
    }
}

fn spawn_worker_thread(
    worker: CameraWorker,
    shutdown: ShutdownSignal,
) -> io::Result<JoinHandle<WorkerReport>> {
    std::thread::Builder::new()
        .name(format!("cam-{}", worker.camera().id))
        .spawn(move || worker.run(&shutdown))
}

fn join_workers(workers: Vec<(CameraId, JoinHandle<WorkerReport>)>) -> Vec<WorkerReport> {
    let mut reports = Vec::with_capacity(workers.len());
    for (id, handle) in workers {
        match handle.join() {
            Ok(report) => reports.push(report),
            Err(_) => log::error!("[cam {}] worker thread panicked", id),
        }
    }
    reports
}
