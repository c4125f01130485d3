//! Capture controller: a single worker thread owns the camera and runs the
//! capture → detect → measure → publish sequence, one run at a time.
//!
//! Callers hold a cloneable [`CaptureController`] and talk to the worker
//! through a command channel. The run gate is an atomic state word, so a
//! trigger either wins the `Idle → Capturing` transition or is rejected
//! without side effects.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use chrono::Local;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use image::RgbImage;
use rebar_core::{MeasurementEngine, ResultStore, overlay, telemetry};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};
use video_ingest::{CameraSource, CaptureError};

use crate::{
    archive::ResultArchive,
    detection::{DetectionOutcome, DetectionPipeline},
    settings::DeviceSettings,
    tier_file::TierFileWatcher,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Idle = 0,
    Capturing = 1,
    Analyzing = 2,
    Error = 3,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Capturing,
            2 => Self::Analyzing,
            3 => Self::Error,
            _ => Self::Idle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Analyzing => "analyzing",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("capture already in progress")]
    AlreadyInProgress,
    #[error("capture worker is not running")]
    WorkerStopped,
}

/// How a capture run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Published {
        timestamp: String,
        segments: usize,
        total_volume_cc: f64,
    },
    NoPrimaryObject {
        timestamp: String,
    },
    NoSegments {
        timestamp: String,
    },
    Failed {
        reason: String,
    },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::NoPrimaryObject { .. } => "no_rebar",
            Self::NoSegments { .. } => "no_sections",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub camera_index: u32,
    pub warmup_frames: u32,
    pub warmup_delay: Duration,
    /// Pause between releasing and reopening the camera after a read failure.
    pub reopen_delay: Duration,
    pub preview_quality: u8,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            camera_index: 0,
            warmup_frames: 5,
            warmup_delay: Duration::from_millis(100),
            reopen_delay: Duration::from_secs(1),
            preview_quality: 80,
        }
    }
}

/// Everything the worker needs besides the camera.
pub struct WorkerParts {
    pub pipeline: DetectionPipeline,
    pub engine: Arc<MeasurementEngine>,
    pub store: Arc<ResultStore>,
    pub settings: Arc<DeviceSettings>,
    pub archive: Box<dyn ResultArchive>,
    pub tier_watcher: Option<TierFileWatcher>,
}

enum Command {
    Capture { reply: Sender<RunOutcome> },
    Preview { reply: Sender<Option<Vec<u8>>> },
    Reinitialize { camera_index: u32 },
    Shutdown,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    paused: AtomicBool,
    camera_available: AtomicBool,
}

impl Shared {
    fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: CaptureState) {
        self.state.store(state as u8, Ordering::SeqCst);
        metrics::gauge!("rebar_capture_state").set(state as u8 as f64);
    }
}

/// Handle used by the API and CLI to drive the capture worker.
#[derive(Clone)]
pub struct CaptureController {
    shared: Arc<Shared>,
    commands: Sender<Command>,
}

impl CaptureController {
    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    pub fn camera_available(&self) -> bool {
        self.shared.camera_available.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Start a run if none is in flight. The receiver yields the outcome once
    /// the worker is back to `Idle`.
    pub fn trigger(&self) -> Result<Receiver<RunOutcome>, TriggerError> {
        if self
            .shared
            .state
            .compare_exchange(
                CaptureState::Idle as u8,
                CaptureState::Capturing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            debug!("capture rejected: {}", self.state().label());
            metrics::counter!("rebar_capture_rejected_total").increment(1);
            return Err(TriggerError::AlreadyInProgress);
        }

        let (reply, outcome) = bounded(1);
        if self.commands.send(Command::Capture { reply }).is_err() {
            self.shared.set_state(CaptureState::Idle);
            return Err(TriggerError::WorkerStopped);
        }
        Ok(outcome)
    }

    pub fn trigger_and_wait(&self) -> Result<RunOutcome, TriggerError> {
        self.trigger()?
            .recv()
            .map_err(|_| TriggerError::WorkerStopped)
    }

    /// Release and reopen the camera on `camera_index` before any later run.
    pub fn reinitialize(&self, camera_index: u32) -> Result<(), TriggerError> {
        self.commands
            .send(Command::Reinitialize { camera_index })
            .map_err(|_| TriggerError::WorkerStopped)
    }

    /// A live JPEG frame, or `None` while a run is active, a result is on
    /// display, or the camera cannot deliver.
    pub fn preview_frame(&self) -> Option<Vec<u8>> {
        if self.state() != CaptureState::Idle || self.is_paused() {
            return None;
        }
        let (reply, frame) = bounded(1);
        self.commands.send(Command::Preview { reply }).ok()?;
        frame.recv().ok().flatten()
    }

    pub fn resume_preview(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            info!("preview resumed");
        }
    }
}

/// Join handle for the worker thread.
pub struct WorkerHandle {
    commands: Sender<Command>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Ask the worker to finish its queue, release the camera and exit.
    pub fn stop(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture worker panicked during shutdown");
            }
        }
    }
}

/// Spawn the worker that owns `camera` and return the controller handle.
pub fn spawn_capture_worker<C>(
    camera: C,
    parts: WorkerParts,
    options: ControllerOptions,
) -> Result<(CaptureController, WorkerHandle)>
where
    C: CameraSource + 'static,
{
    let shared = Arc::new(Shared {
        state: AtomicU8::new(CaptureState::Idle as u8),
        paused: AtomicBool::new(false),
        camera_available: AtomicBool::new(false),
    });
    let (commands, inbox) = unbounded();

    let worker = CaptureWorker {
        camera,
        camera_index: options.camera_index,
        parts,
        shared: shared.clone(),
        options,
    };
    let handle = telemetry::spawn_thread("capture-worker", move || worker.run(inbox))
        .map_err(|err| anyhow!("failed to spawn capture worker: {err}"))?;

    Ok((
        CaptureController {
            shared,
            commands: commands.clone(),
        },
        WorkerHandle {
            commands,
            handle: Some(handle),
        },
    ))
}

struct CaptureWorker<C> {
    camera: C,
    camera_index: u32,
    parts: WorkerParts,
    shared: Arc<Shared>,
    options: ControllerOptions,
}

impl<C: CameraSource> CaptureWorker<C> {
    fn run(mut self, inbox: Receiver<Command>) {
        if let Err(err) = self.open_camera() {
            warn!("camera #{} unavailable at startup: {err}", self.camera_index);
        }

        for command in inbox.iter() {
            match command {
                Command::Capture { reply } => {
                    let outcome = self.capture();
                    self.shared.set_state(CaptureState::Idle);
                    let _ = reply.send(outcome);
                }
                Command::Preview { reply } => {
                    let _ = reply.send(self.preview());
                }
                Command::Reinitialize { camera_index } => {
                    info!("switching camera #{} -> #{camera_index}", self.camera_index);
                    self.camera_index = camera_index;
                    self.close_camera();
                    if let Err(err) = self.open_camera() {
                        warn!("camera #{camera_index} failed to open: {err}");
                    }
                }
                Command::Shutdown => break,
            }
        }

        self.close_camera();
        debug!("capture worker stopped");
    }

    fn open_camera(&mut self) -> Result<(), CaptureError> {
        let result = self.camera.open(self.camera_index);
        self.shared
            .camera_available
            .store(self.camera.is_opened(), Ordering::SeqCst);
        result
    }

    fn close_camera(&mut self) {
        self.camera.release();
        self.shared.camera_available.store(false, Ordering::SeqCst);
    }

    fn capture(&mut self) -> RunOutcome {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S-%3f").to_string();
        let span = info_span!("capture.run", timestamp = %timestamp, camera = self.camera_index);
        let _span_guard = span.enter();
        let started = Instant::now();

        let frame = match self.acquire_frame() {
            Ok(frame) => frame,
            Err(err) => {
                error!("capture failed: {err}");
                self.shared.set_state(CaptureState::Error);
                self.recover_camera();
                return self.finish(RunOutcome::Failed {
                    reason: err.to_string(),
                });
            }
        };
        metrics::histogram!("rebar_stage_latency_seconds", "stage" => "capture")
            .record(started.elapsed().as_secs_f64());

        self.shared.set_state(CaptureState::Analyzing);
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.analyze(&timestamp, frame))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                error!("analysis failed: {err:#}");
                self.shared.set_state(CaptureState::Error);
                RunOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
            Err(_) => {
                error!("analysis panicked");
                self.shared.set_state(CaptureState::Error);
                RunOutcome::Failed {
                    reason: "analysis panicked".to_string(),
                }
            }
        };
        metrics::histogram!("rebar_stage_latency_seconds", "stage" => "run")
            .record(started.elapsed().as_secs_f64());
        self.finish(outcome)
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        metrics::counter!("rebar_capture_runs_total", "outcome" => outcome.label()).increment(1);
        info!(outcome = outcome.label(), "capture run finished");
        outcome
    }

    fn acquire_frame(&mut self) -> Result<RgbImage, CaptureError> {
        if !self.camera.is_opened() {
            self.open_camera()?;
        }
        for _ in 0..self.options.warmup_frames {
            let _ = self.camera.read();
            thread::sleep(self.options.warmup_delay);
        }
        self.camera.read()?.to_rgb_image()
    }

    /// Release and reopen once; a second failure is left for the next run.
    fn recover_camera(&mut self) {
        warn!("restarting camera #{}", self.camera_index);
        self.close_camera();
        thread::sleep(self.options.reopen_delay);
        match self.open_camera() {
            Ok(()) => info!("camera restarted"),
            Err(err) => error!("camera restart failed: {err}"),
        }
    }

    fn analyze(&mut self, timestamp: &str, frame: RgbImage) -> Result<RunOutcome> {
        if let Some(watcher) = self.parts.tier_watcher.as_mut() {
            watcher.refresh();
        }
        if let Err(err) = self.parts.archive.save_original(timestamp, &frame) {
            warn!("failed to archive original frame: {err}");
        }

        let threshold = self.parts.settings.current().detection_threshold;
        let detections = self.parts.pipeline.run(&frame, threshold)?;

        let outcome = match detections.outcome {
            DetectionOutcome::NoPrimaryObject => {
                if let Err(err) = self.parts.archive.save_no_detection(timestamp, &detections.frame) {
                    warn!("failed to archive frame: {err}");
                }
                RunOutcome::NoPrimaryObject {
                    timestamp: timestamp.to_string(),
                }
            }
            DetectionOutcome::NoSegments { primary } => {
                let annotated = overlay::annotate_primary(&detections.frame, &primary);
                if let Err(err) = self.parts.archive.save_primary(timestamp, &annotated) {
                    warn!("failed to archive rebar image: {err}");
                }
                RunOutcome::NoSegments {
                    timestamp: timestamp.to_string(),
                }
            }
            DetectionOutcome::Segments { primary, segments } => {
                let annotated = overlay::annotate_primary(&detections.frame, &primary);
                if let Err(err) = self.parts.archive.save_primary(timestamp, &annotated) {
                    warn!("failed to archive rebar image: {err}");
                }

                let started = Instant::now();
                let snapshot =
                    self.parts
                        .engine
                        .analyze(timestamp, &detections.frame, Some(&primary), &segments);
                metrics::histogram!("rebar_stage_latency_seconds", "stage" => "measure")
                    .record(started.elapsed().as_secs_f64());
                if let Err(err) = self.parts.archive.save_result(&snapshot) {
                    warn!("failed to archive results: {err}");
                }

                let segments = snapshot.segments().len();
                let total_volume_cc = snapshot.total_volume_cc();
                let generation = self.parts.store.publish(snapshot);
                info!(generation, segments, total_volume_cc, "results published");
                RunOutcome::Published {
                    timestamp: timestamp.to_string(),
                    segments,
                    total_volume_cc,
                }
            }
        };

        self.shared.paused.store(true, Ordering::SeqCst);
        Ok(outcome)
    }

    fn preview(&mut self) -> Option<Vec<u8>> {
        if self.shared.state() != CaptureState::Idle || self.shared.paused.load(Ordering::SeqCst) {
            return None;
        }
        if !self.camera.is_opened() && self.open_camera().is_err() {
            return None;
        }
        let frame = match self.camera.read().and_then(|frame| frame.to_rgb_image()) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("preview frame unavailable: {err}");
                return None;
            }
        };
        match overlay::encode_jpeg(&frame, self.options.preview_quality) {
            Ok(jpeg) => Some(jpeg),
            Err(err) => {
                warn!("preview encode failed: {err}");
                None
            }
        }
    }
}
