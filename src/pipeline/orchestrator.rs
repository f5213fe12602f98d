use std::{
    any::Any,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, TryRecvError};

use super::camera::FrameSource;
use super::compositor::{BackgroundCompositor, MaskKernel, compose_overlay};
use super::device::FrameSink;
use super::inference::{OrientationClassifier, OverlayRenderer, Segmentation, Segmenter};
use super::orientation::{self, FaceFeatures, Projection};
use super::packer;
use super::resize;
use super::smoother::{MarkerSmoother, OrientationSmoother};
use crate::config::Config;
use crate::error::PipelineError;
use crate::metrics::{Stage, StageMetrics};
use crate::types::{FloatFrame, Mask, Overlay, PoseMarker};

/// Frames in a row that may fail before the loop gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Result of one per-frame branch as seen by the join step.
#[derive(Debug)]
pub enum BranchOutcome<T> {
    Ready(T),
    /// Nothing to produce this frame; not an error.
    Absent,
    Failed(anyhow::Error),
}

impl<T> From<Result<Option<T>>> for BranchOutcome<T> {
    fn from(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => BranchOutcome::Ready(value),
            Ok(None) => BranchOutcome::Absent,
            Err(err) => BranchOutcome::Failed(err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub index: u64,
    pub overlay_applied: bool,
}

/// Everything the overlay branch touches. Owned by the pipeline and lent to
/// the branch thread for the duration of one frame.
struct OverlayStage {
    markers: MarkerSmoother,
    orientation: OrientationSmoother,
    classifier: Box<dyn OrientationClassifier>,
    renderer: Box<dyn OverlayRenderer>,
    projection: Projection,
    width: u32,
    height: u32,
}

impl OverlayStage {
    fn run(&mut self, marker: Option<PoseMarker>) -> BranchOutcome<Overlay> {
        self.render(marker).into()
    }

    fn render(&mut self, marker: Option<PoseMarker>) -> Result<Option<Overlay>> {
        let Some(marker) = marker else {
            return Ok(None);
        };
        let smoothed = self.markers.add_sample(marker);
        let (Some(features), Some(nose)) = (
            FaceFeatures::from_marker(&smoothed, self.width, self.height),
            smoothed.nose,
        ) else {
            return Ok(None);
        };

        let logits = self
            .classifier
            .classify(&features)
            .context("orientation classifier failed")?;
        let raw = orientation::decode(&logits, nose, &self.projection)?;
        let sample = self.orientation.add_sample(raw);

        let overlay = self
            .renderer
            .render(&sample)
            .context("overlay renderer failed")?;
        if (overlay.width, overlay.height) == (self.width, self.height) {
            return Ok(Some(overlay));
        }
        let rgba = resize::resize_rgba(
            overlay.rgba,
            overlay.width,
            overlay.height,
            self.width,
            self.height,
        )?;
        Ok(Some(Overlay::new(self.width, self.height, rgba)?))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Frame-synchronous driver: capture, segment, run both composite branches,
/// pack and write. The next capture starts only after the write returns.
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    segmenter: Box<dyn Segmenter>,
    sink: Box<dyn FrameSink>,
    compositor: BackgroundCompositor,
    overlay: OverlayStage,
    metrics: StageMetrics,
    packed: Vec<u8>,
    width: u32,
    height: u32,
    retry_limit: u32,
    retry_backoff: Duration,
    report_interval: u64,
    frame_index: u64,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        background: FloatFrame,
        source: Box<dyn FrameSource>,
        segmenter: Box<dyn Segmenter>,
        classifier: Box<dyn OrientationClassifier>,
        renderer: Box<dyn OverlayRenderer>,
        sink: Box<dyn FrameSink>,
        metrics: StageMetrics,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let (width, height) = (config.width, config.height);
        if (background.width, background.height) != (width, height) {
            return Err(PipelineError::configuration(format!(
                "background is {}x{} but output is {width}x{height}",
                background.width, background.height
            )));
        }
        let packed_len = packer::packed_len(width, height);
        if sink.image_size() != packed_len {
            return Err(PipelineError::configuration(format!(
                "sink expects {} bytes per frame, pipeline produces {packed_len}",
                sink.image_size()
            )));
        }

        Ok(Self {
            source,
            segmenter,
            sink,
            compositor: BackgroundCompositor::new(
                background,
                MaskKernel::new(config.dilation, config.blur),
            ),
            overlay: OverlayStage {
                markers: MarkerSmoother::new(config.moving_avg_ratio, width, height),
                orientation: OrientationSmoother::new(config.moving_avg_ratio),
                classifier,
                renderer,
                projection: Projection::from_config(config),
                width,
                height,
            },
            metrics,
            packed: vec![0; packed_len],
            width,
            height,
            retry_limit: config.device_retry_limit,
            retry_backoff: Duration::from_millis(config.device_retry_backoff_ms),
            report_interval: config.report_interval,
            frame_index: 0,
        })
    }

    /// Push the background through the segmenter once so model setup does
    /// not stall the first real frame.
    pub fn warm_up(&mut self) -> Result<()> {
        let frame = self.compositor.background().to_frame();
        let start = Instant::now();
        self.segmenter
            .warm_up(&frame)
            .context("segmenter warm-up failed")?;
        log::info!("segmenter warmed up in {:?}", start.elapsed());
        Ok(())
    }

    /// One full capture to write cycle.
    pub fn step(&mut self) -> Result<FrameReport> {
        let frame_start = Instant::now();

        let start = Instant::now();
        let frame = self.source.capture().context("camera capture failed")?;
        self.metrics.record(Stage::Capture, start.elapsed());
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(anyhow!(
                "captured frame is {}x{}, expected {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        let segmentation = self
            .metrics
            .time(Stage::Segmentation, || self.segmenter.segment(&frame))
            .unwrap_or_else(|err| {
                log::warn!("segmentation failed, keeping the whole frame: {err:#}");
                Segmentation {
                    mask: Mask::foreground_everywhere(frame.width, frame.height),
                    marker: None,
                }
            });

        let compositor = &self.compositor;
        let overlay_stage = &mut self.overlay;
        let marker = segmentation.marker;
        let ((blended, composite_time), (outcome, render_time)) = thread::scope(|scope| {
            let handle = scope.spawn(move || {
                let start = Instant::now();
                let outcome = overlay_stage.run(marker);
                (outcome, start.elapsed())
            });

            let start = Instant::now();
            let blended = compositor.compose(&frame, &segmentation.mask);
            let composite_time = start.elapsed();

            let overlay = handle.join().unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref()).to_owned();
                (
                    BranchOutcome::Failed(anyhow!("overlay branch panicked: {message}")),
                    Duration::ZERO,
                )
            });
            ((blended, composite_time), overlay)
        });
        self.metrics.record(Stage::BackgroundComposite, composite_time);
        let blended = blended?;

        let overlay = match outcome {
            BranchOutcome::Ready(overlay) => {
                self.metrics.record(Stage::OverlayRender, render_time);
                Some(overlay)
            }
            BranchOutcome::Absent => None,
            BranchOutcome::Failed(err) => {
                log::warn!("overlay skipped for frame {}: {err:#}", self.frame_index);
                None
            }
        };
        let overlay_applied = overlay.is_some();

        let output = self
            .metrics
            .time(Stage::OverlayComposite, || {
                compose_overlay(blended, overlay.as_ref())
            })?
            .to_frame();
        self.metrics
            .time(Stage::Pack, || packer::pack_into(&output, &mut self.packed))?;

        let start = Instant::now();
        self.write_with_retry()?;
        self.metrics.record(Stage::DeviceWrite, start.elapsed());

        self.metrics.record(Stage::FrameTotal, frame_start.elapsed());
        let report = FrameReport {
            index: self.frame_index,
            overlay_applied,
        };
        self.frame_index += 1;
        Ok(report)
    }

    fn write_with_retry(&mut self) -> Result<(), PipelineError> {
        let mut attempt = 0;
        loop {
            let err = match self.sink.write_frame(&self.packed) {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if !err.is_recoverable() || attempt >= self.retry_limit {
                return Err(err);
            }
            attempt += 1;
            log::warn!(
                "{err}; reopening device (attempt {attempt}/{})",
                self.retry_limit
            );
            thread::sleep(self.retry_backoff);
            if let Err(reopen_err) = self.sink.reopen() {
                log::warn!("device reopen failed: {reopen_err}");
            }
        }
    }

    /// Loop until `shutdown` fires or a fatal error occurs. The sink is
    /// closed on every way out.
    pub fn run(&mut self, shutdown: Receiver<()>) -> Result<()> {
        log::info!("pipeline started at {}x{}", self.width, self.height);
        let result = self.run_loop(&shutdown);
        let closed = self.sink.close();
        log::info!("pipeline stopped after {} frames", self.frame_index);
        self.metrics.log_summary();
        result?;
        closed?;
        Ok(())
    }

    fn run_loop(&mut self, shutdown: &Receiver<()>) -> Result<()> {
        let mut consecutive_failures = 0;
        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => {}
            }

            match self.step() {
                Ok(report) => {
                    consecutive_failures = 0;
                    if self.report_interval > 0 && (report.index + 1) % self.report_interval == 0 {
                        self.metrics.log_summary();
                    }
                }
                Err(err) if err.downcast_ref::<PipelineError>().is_some() => return Err(err),
                Err(err) => {
                    consecutive_failures += 1;
                    log::warn!("frame {} dropped: {err:#}", self.frame_index);
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(err.context(format!(
                            "{consecutive_failures} consecutive frames failed"
                        )));
                    }
                }
            }
        }
    }
}
