use vitals_common::config::EstimatorConfig;
use vitals_common::sample::Sample;

const RATIO_EPSILON: f64 = 1e-6;

/// Placeholder SpO2 heuristic: a linear map of the red/blue mean ratio.
///
/// A single RGB camera has no red/infrared pair, so this is not a calibrated
/// oximetry measurement. Only its bounds are meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spo2Estimator {
    intercept: f64,
    slope: f64,
    min_pct: f64,
    max_pct: f64,
}

impl Spo2Estimator {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            intercept: config.spo2_intercept,
            slope: config.spo2_slope,
            min_pct: config.spo2_min_pct,
            max_pct: config.spo2_max_pct,
        }
    }

    pub fn estimate(&self, samples: &[Sample]) -> f64 {
        let (avg_r, avg_b) = channel_means(samples);
        self.from_means(avg_r, avg_b)
    }

    pub fn from_means(&self, avg_r: f64, avg_b: f64) -> f64 {
        let ratio = avg_r / (avg_b + RATIO_EPSILON);
        let spo2 = self.intercept - self.slope * ratio;
        if spo2.is_finite() {
            spo2.clamp(self.min_pct, self.max_pct)
        } else {
            self.min_pct
        }
    }
}

/// Mean red and blue over the window; zeros for an empty window.
fn channel_means(samples: &[Sample]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let (r, b) = samples
        .iter()
        .fold((0.0, 0.0), |(r, b), s| (r + s.r, b + s.b));
    (r / n, b / n)
}
