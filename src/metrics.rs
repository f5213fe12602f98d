use std::{
    collections::{BTreeMap, VecDeque},
    time::{Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Capture,
    Segmentation,
    BackgroundComposite,
    OverlayRender,
    OverlayComposite,
    Pack,
    DeviceWrite,
    FrameTotal,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Capture => "camera capture",
            Stage::Segmentation => "segmentation",
            Stage::BackgroundComposite => "background composite",
            Stage::OverlayRender => "overlay render",
            Stage::OverlayComposite => "overlay composite",
            Stage::Pack => "yuyv pack",
            Stage::DeviceWrite => "device write",
            Stage::FrameTotal => "frame total",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageSummary {
    pub stage: Stage,
    pub samples: usize,
    pub average_ms: f64,
    pub stdev_ms: f64,
}

/// Rolling per-stage timings, keeping at most `max_samples` per stage.
#[derive(Debug)]
pub struct StageMetrics {
    max_samples: usize,
    stages: BTreeMap<Stage, VecDeque<Duration>>,
}

impl StageMetrics {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(1),
            stages: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        let samples = self.stages.entry(stage).or_default();
        samples.push_back(elapsed);
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
    }

    pub fn time<T>(&mut self, stage: Stage, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(stage, start.elapsed());
        out
    }

    pub fn summary(&self) -> Vec<StageSummary> {
        self.stages
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(&stage, samples)| {
                let count = samples.len() as f64;
                let (sum, squared_sum) = samples.iter().fold((0.0, 0.0), |(s, sq), d| {
                    let ms = d.as_secs_f64() * 1_000.0;
                    (s + ms, sq + ms * ms)
                });
                let average_ms = sum / count;
                let variance = (squared_sum / count - average_ms * average_ms).max(0.0);
                StageSummary {
                    stage,
                    samples: samples.len(),
                    average_ms,
                    stdev_ms: variance.sqrt(),
                }
            })
            .collect()
    }

    pub fn log_summary(&self) {
        for row in self.summary() {
            log::info!(
                "{:<22} avg {:>8.2} ms  stdev {:>7.2} ms  (n={})",
                row.stage.label(),
                row.average_ms,
                row.stdev_ms,
                row.samples
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_window_is_bounded() {
        let mut metrics = StageMetrics::new(3);
        for ms in [100, 1, 2, 3] {
            metrics.record(Stage::Pack, Duration::from_millis(ms));
        }
        let summary = metrics.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].samples, 3);
        assert!(approx_eq(summary[0].average_ms, 2.0, 1e-9));
    }

    #[test]
    fn test_average_and_stdev() {
        let mut metrics = StageMetrics::new(10);
        metrics.record(Stage::DeviceWrite, Duration::from_millis(2));
        metrics.record(Stage::DeviceWrite, Duration::from_millis(4));
        let row = &metrics.summary()[0];
        assert!(approx_eq(row.average_ms, 3.0, 1e-9));
        assert!(approx_eq(row.stdev_ms, 1.0, 1e-6));
    }

    #[test]
    fn test_summary_is_ordered_by_stage() {
        let mut metrics = StageMetrics::new(4);
        metrics.record(Stage::FrameTotal, Duration::from_millis(1));
        metrics.record(Stage::Capture, Duration::from_millis(1));
        let value = metrics.time(Stage::Pack, || 7);
        assert_eq!(value, 7);
        let stages: Vec<Stage> = metrics.summary().iter().map(|row| row.stage).collect();
        assert_eq!(stages, vec![Stage::Capture, Stage::Pack, Stage::FrameTotal]);
    }
}
