mod config;
mod error;
mod metrics;
mod model_download;
mod pipeline;
mod types;

use std::{env, path::PathBuf, process};

use anyhow::{Context, Result};
use crossbeam_channel::bounded;

use config::{Config, DEFAULT_CONFIG_PATH};
use metrics::StageMetrics;
use model_download::{ModelKind, ensure_model_ready};
use pipeline::camera::FrameSource;
use pipeline::{
    DeviceSink, OrtOrientationClassifier, OrtSegmenter, Pipeline, Projection, SpriteRenderer,
    load_background,
};

fn main() {
    env_logger::init();

    if let Err(err) = run() {
        log::error!("{err:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load_or_default(&config_path)?;
    config.validate()?;

    // Open the device first so a missing loopback module fails before any
    // model is loaded.
    let sink = DeviceSink::open(&config.device_path, config.width, config.height)?;

    let background = load_background(&config.background_path, config.width, config.height)?;
    let source = open_source(&config)?;

    ensure_model_ready(
        ModelKind::Segmenter,
        &config.segmenter_model_path,
        config.segmenter_model_url.as_deref(),
    )?;
    ensure_model_ready(
        ModelKind::OrientationClassifier,
        &config.orientation_model_path,
        config.orientation_model_url.as_deref(),
    )?;
    let segmenter = OrtSegmenter::new(&config.segmenter_model_path, &config)?;
    let classifier = OrtOrientationClassifier::new(&config.orientation_model_path)?;

    let (render_w, render_h) = config.render_size();
    let renderer = SpriteRenderer::load(
        &config.overlay_path,
        render_w,
        render_h,
        Projection::from_config(&config),
    )?;

    let mut pipeline = Pipeline::new(
        &config,
        background,
        source,
        Box::new(segmenter),
        Box::new(classifier),
        Box::new(renderer),
        Box::new(sink),
        StageMetrics::new(config.profiling_max_samples),
    )?;

    // `shutdown_tx` stays alive here so the receiver never sees a disconnect
    // if the handler could not be installed.
    let (shutdown_tx, shutdown_rx) = bounded(1);
    let handler_tx = shutdown_tx.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = handler_tx.try_send(());
    }) {
        log::warn!("failed to install Ctrl+C handler: {err}");
    }

    pipeline.warm_up()?;
    let result = pipeline.run(shutdown_rx).context("pipeline stopped");
    drop(shutdown_tx);
    result
}

#[cfg(feature = "camera-nokhwa")]
fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    let camera = pipeline::CameraSource::open(config.camera_index, config.width, config.height)?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn open_source(_config: &Config) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("built without camera support; enable the camera-nokhwa feature")
}
