use crate::types::{Keypoint, OrientationSample, PoseMarker};

/// Values that can be folded into an exponential moving average.
pub trait Blend: Copy {
    /// `ratio * self + (1 - ratio) * prev`, field by field.
    fn blend(&self, prev: &Self, ratio: f32) -> Self;
}

fn ema(latest: f32, prev: f32, ratio: f32) -> f32 {
    latest * ratio + prev * (1.0 - ratio)
}

impl Blend for OrientationSample {
    fn blend(&self, prev: &Self, ratio: f32) -> Self {
        OrientationSample {
            a: ema(self.a, prev.a, ratio),
            b: ema(self.b, prev.b, ratio),
            c: ema(self.c, prev.c, ratio),
            x: ema(self.x, prev.x, ratio),
            y: ema(self.y, prev.y, ratio),
            z: ema(self.z, prev.z, ratio),
        }
    }
}

impl Blend for Keypoint {
    fn blend(&self, prev: &Self, ratio: f32) -> Self {
        Keypoint {
            score: self.score,
            x: ema(self.x, prev.x, ratio),
            y: ema(self.y, prev.y, ratio),
        }
    }
}

impl Blend for PoseMarker {
    /// Parts missing from `self` carry the previous value over untouched.
    fn blend(&self, prev: &Self, ratio: f32) -> Self {
        self.zip_with(prev, |latest, prev| match (latest, prev) {
            (Some(latest), Some(prev)) => Some(latest.blend(&prev, ratio)),
            (Some(latest), None) => Some(latest),
            (None, prev) => prev,
        })
    }
}

/// Exponential smoothing with a pass-through first sample.
#[derive(Debug)]
pub struct TemporalSmoother<T> {
    ratio: f32,
    state: Option<T>,
}

impl<T: Blend> TemporalSmoother<T> {
    pub fn new(ratio: f32) -> Self {
        Self { ratio, state: None }
    }

    pub fn add_sample(&mut self, raw: T) -> T {
        let smoothed = match &self.state {
            Some(prev) => raw.blend(prev, self.ratio),
            None => raw,
        };
        self.state = Some(smoothed);
        smoothed
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&T> {
        self.state.as_ref()
    }
}

pub type OrientationSmoother = TemporalSmoother<OrientationSample>;

/// Smooths face landmarks, discarding any landmark that falls outside the
/// frame so a single bad detection keeps the previous smoothed position.
#[derive(Debug)]
pub struct MarkerSmoother {
    inner: TemporalSmoother<PoseMarker>,
    width: u32,
    height: u32,
}

impl MarkerSmoother {
    pub fn new(ratio: f32, width: u32, height: u32) -> Self {
        Self {
            inner: TemporalSmoother::new(ratio),
            width,
            height,
        }
    }

    pub fn add_sample(&mut self, raw: PoseMarker) -> PoseMarker {
        let (width, height) = (self.width, self.height);
        let in_frame = raw.zip_with(&PoseMarker::default(), |kp, _| {
            kp.filter(|kp| kp.in_bounds(width, height))
        });
        self.inner.add_sample(in_frame)
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&PoseMarker> {
        self.inner.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn marker_at(x: f32, y: f32) -> PoseMarker {
        let kp = Some(Keypoint::new(0.9, x, y));
        PoseMarker {
            nose: kp,
            left_eye: kp,
            right_eye: kp,
            left_ear: kp,
            right_ear: kp,
        }
    }

    fn sample(v: f32) -> OrientationSample {
        OrientationSample {
            a: v,
            b: 2.0 * v,
            c: -v,
            x: v + 1.0,
            y: v - 1.0,
            z: 0.5 * v,
        }
    }

    #[test]
    fn test_first_sample_passthrough() {
        let mut s = OrientationSmoother::new(0.3);
        let raw = sample(7.0);
        assert_eq!(s.add_sample(raw), raw);

        let mut m = MarkerSmoother::new(0.3, 100, 100);
        let raw = marker_at(10.0, 20.0);
        assert_eq!(m.add_sample(raw), raw);
    }

    #[test]
    fn test_orientation_ema() {
        let mut s = OrientationSmoother::new(0.25);
        s.add_sample(sample(0.0));
        let result = s.add_sample(sample(4.0));
        assert!(approx_eq(result.a, 1.0, 1e-6));
        assert!(approx_eq(result.b, 2.0, 1e-6));
        assert!(approx_eq(result.c, -1.0, 1e-6));
        assert!(approx_eq(result.x, 0.25 * 5.0 + 0.75 * 1.0, 1e-6));
        assert!(approx_eq(result.y, 0.25 * 3.0 + 0.75 * -1.0, 1e-6));
        assert!(approx_eq(result.z, 0.5, 1e-6));
    }

    #[test]
    fn test_ratio_one_follows_latest() {
        let mut s = OrientationSmoother::new(1.0);
        s.add_sample(sample(3.0));
        assert_eq!(s.add_sample(sample(9.0)), sample(9.0));
    }

    #[test]
    fn test_out_of_bounds_keypoint_keeps_previous_value() {
        let mut m = MarkerSmoother::new(0.5, 100, 50);
        let first = m.add_sample(marker_at(10.0, 10.0));

        let mut raw = marker_at(20.0, 30.0);
        raw.left_ear = Some(Keypoint::new(0.9, 150.0, 10.0));
        raw.right_eye = Some(Keypoint::new(0.9, 20.0, -1.0));
        let result = m.add_sample(raw);

        assert_eq!(result.left_ear, first.left_ear);
        assert_eq!(result.right_eye, first.right_eye);

        let nose = result.nose.unwrap();
        assert!(approx_eq(nose.x, 15.0, 1e-6));
        assert!(approx_eq(nose.y, 20.0, 1e-6));
        let left_eye = result.left_eye.unwrap();
        assert!(approx_eq(left_eye.x, 15.0, 1e-6));
    }

    #[test]
    fn test_out_of_bounds_state_is_bitwise_unchanged() {
        let mut m = MarkerSmoother::new(0.1, 64, 48);
        m.add_sample(marker_at(1.3, 2.7));
        let before = m.add_sample(marker_at(33.3, 17.1)).nose.unwrap();

        for _ in 0..10 {
            let mut raw = marker_at(5.0, 5.0);
            raw.nose = Some(Keypoint::new(0.9, 64.0, 5.0));
            m.add_sample(raw);
        }
        let after = m.current().unwrap().nose.unwrap();
        assert_eq!(after.x.to_bits(), before.x.to_bits());
        assert_eq!(after.y.to_bits(), before.y.to_bits());
    }

    #[test]
    fn test_missing_keypoints_propagate_prior_state() {
        let mut m = MarkerSmoother::new(0.5, 100, 100);
        let first = m.add_sample(marker_at(40.0, 40.0));
        let result = m.add_sample(PoseMarker::default());
        assert_eq!(result, first);
    }

    #[test]
    fn test_out_of_bounds_without_history_is_absent() {
        let mut m = MarkerSmoother::new(0.5, 10, 10);
        let mut raw = marker_at(5.0, 5.0);
        raw.nose = Some(Keypoint::new(0.9, -3.0, 5.0));
        let result = m.add_sample(raw);
        assert!(result.nose.is_none());
        assert!(result.left_eye.is_some());

        let later = m.add_sample(marker_at(6.0, 6.0));
        assert_eq!(later.nose, Some(Keypoint::new(0.9, 6.0, 6.0)));
    }

    #[test]
    fn test_converges_to_fixed_position() {
        let mut m = MarkerSmoother::new(0.1, 128, 72);
        m.add_sample(marker_at(64.05, 36.05));
        let mut result = PoseMarker::default();
        for _ in 0..50 {
            result = m.add_sample(marker_at(64.0, 36.0));
        }
        for kp in [result.nose, result.left_eye, result.right_ear] {
            let kp = kp.unwrap();
            assert!(approx_eq(kp.x, 64.0, 1e-3));
            assert!(approx_eq(kp.y, 36.0, 1e-3));
        }
    }

    #[test]
    fn test_no_state_before_first_sample() {
        let mut s = OrientationSmoother::new(0.1);
        assert!(s.current().is_none());
        assert_eq!(s.add_sample(sample(5.0)), sample(5.0));
        assert_eq!(s.current(), Some(&sample(5.0)));
    }
}
