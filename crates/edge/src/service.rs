//! Process wiring: build every component from an `EdgeConfig`, start the
//! capture worker and the API server, and wait for Ctrl+C.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use rebar_core::{
    InstanceModel, MeasurementEngine, ResultStore, telemetry, wire::LatestResponse,
};
use tracing::{info, warn};
use video_ingest::{CameraSource, StillImageSource};

use crate::{
    api::EdgeApi,
    archive::{self, DiscardArchive, FsArchive, ResultArchive},
    config::EdgeConfig,
    controller::{ControllerOptions, RunOutcome, WorkerParts, spawn_capture_worker},
    detection::DetectionPipeline,
    server::spawn_api_server,
    settings::DeviceSettings,
    tier_file::{self, TierFileWatcher},
};

/// Run the edge analyzer until Ctrl+C, or for a single capture with `--once`.
pub fn run(config: EdgeConfig) -> Result<()> {
    if let Err(err) = telemetry::init_subscriber(config.log_filter.as_deref()) {
        eprintln!("tracing subscriber already installed: {err}");
    }
    let _ = telemetry::init_metrics_recorder();

    let span = tracing::info_span!(
        "edge.service",
        bind = %config.bind,
        once = config.once,
        use_cpu = config.use_cpu,
    );
    let _span_guard = span.enter();

    let tiers = tier_file::load_or_create(&config.tiers_path)?;
    info!(
        "loaded {} cement ratio tiers from {}",
        tiers.tiers().len(),
        config.tiers_path.display()
    );
    let engine = Arc::new(MeasurementEngine::new(
        tiers,
        config.calibration,
        config.jpeg_quality,
    ));
    let settings = Arc::new(DeviceSettings::load_or_create(&config.settings_path));
    let store = Arc::new(ResultStore::new());

    let (primary, segments) = build_models(&config)?;
    let pipeline = DetectionPipeline::new(
        primary,
        segments,
        config.segment_threshold,
        config.max_dimension,
    );

    let parts = WorkerParts {
        pipeline,
        engine: engine.clone(),
        store: store.clone(),
        settings: settings.clone(),
        archive: build_archive(&config),
        tier_watcher: Some(TierFileWatcher::new(&config.tiers_path, engine)),
    };
    let options = ControllerOptions {
        camera_index: settings.current().camera_index,
        warmup_frames: config.warmup_frames,
        warmup_delay: config.warmup_delay,
        preview_quality: config.jpeg_quality,
        ..ControllerOptions::default()
    };
    let (controller, worker) = spawn_capture_worker(build_camera(&config)?, parts, options)?;

    if config.once {
        let outcome = controller
            .trigger_and_wait()
            .context("capture worker rejected the run")?;
        worker.stop();
        return report_once(outcome, &store);
    }

    let api = EdgeApi::new(controller, store, settings);
    let server = match spawn_api_server(api, config.bind) {
        Ok(server) => server,
        Err(err) => {
            worker.stop();
            return Err(err);
        }
    };

    let shutdown = install_shutdown_flag();
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    server.stop();
    worker.stop();
    Ok(())
}

fn install_shutdown_flag() -> Arc<AtomicBool> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
    shutdown
}

fn report_once(outcome: RunOutcome, store: &ResultStore) -> Result<()> {
    match outcome {
        RunOutcome::Published { .. } => {
            let latest = LatestResponse::from_published(store.read().as_ref());
            println!("{}", serde_json::to_string_pretty(&latest)?);
            Ok(())
        }
        RunOutcome::NoPrimaryObject { timestamp } => {
            println!("{timestamp}: no rebar detected");
            Ok(())
        }
        RunOutcome::NoSegments { timestamp } => {
            println!("{timestamp}: rebar detected but no sections found");
            Ok(())
        }
        RunOutcome::Failed { reason } => bail!("capture failed: {reason}"),
    }
}

fn build_archive(config: &EdgeConfig) -> Box<dyn ResultArchive> {
    let Some(root) = &config.results_dir else {
        info!("result archiving disabled");
        return Box::new(DiscardArchive);
    };
    if let Err(err) = archive::ensure_root(root) {
        warn!("cannot create results directory {}: {err}", root.display());
    }
    Box::new(FsArchive::new(root, config.jpeg_quality))
}

fn build_camera(config: &EdgeConfig) -> Result<Box<dyn CameraSource>> {
    if let Some(path) = &config.still_image {
        info!("using still image {} as camera", path.display());
        return Ok(Box::new(StillImageSource::new(path)));
    }
    open_device_camera(config)
}

#[cfg(feature = "opencv")]
fn open_device_camera(config: &EdgeConfig) -> Result<Box<dyn CameraSource>> {
    Ok(Box::new(video_ingest::OpenCvCamera::new(config.capture_size)))
}

#[cfg(not(feature = "opencv"))]
fn open_device_camera(_config: &EdgeConfig) -> Result<Box<dyn CameraSource>> {
    bail!("built without the `opencv` feature; pass --still-image to run without a camera")
}

#[cfg(feature = "with-tch")]
fn build_models(config: &EdgeConfig) -> Result<(Box<dyn InstanceModel>, Box<dyn InstanceModel>)> {
    use rebar_core::detector::TorchInstanceModel;

    let primary = TorchInstanceModel::load("rebar", &config.primary_model, config.use_cpu)
        .context("failed to load rebar model")?;
    let segments = TorchInstanceModel::load("section", &config.segment_model, config.use_cpu)
        .context("failed to load section model")?;
    info!(
        "models loaded: {} and {}",
        config.primary_model.display(),
        config.segment_model.display()
    );
    Ok((Box::new(primary), Box::new(segments)))
}

#[cfg(not(feature = "with-tch"))]
fn build_models(_config: &EdgeConfig) -> Result<(Box<dyn InstanceModel>, Box<dyn InstanceModel>)> {
    bail!("built without the `with-tch` feature; no detection backend available")
}
