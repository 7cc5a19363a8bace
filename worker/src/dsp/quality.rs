use tracing::debug;
use vitals_common::config::QualityConfig;
use vitals_common::sample::Sample;

use super::preprocess::{green_channel, mean};

/// Component scores behind `confidence_pct`, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScore {
    /// How plausible the green channel's raw variation is for a pulse signal.
    pub variance: f64,
    /// Consistency of the intervals between detected beats.
    pub regularity: f64,
    /// Captured samples relative to the session target.
    pub coverage: f64,
    pub confidence_pct: f64,
}

/// Confidence from raw-buffer variance, beat regularity and window coverage.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, samples: &[Sample], peaks: &[usize], target_count: usize) -> QualityScore {
        let variation = coefficient_of_variation(&green_channel(samples));
        let variance = self.variance_score(variation);
        let regularity = beat_regularity(peaks);
        let coverage = if target_count == 0 {
            1.0
        } else {
            (samples.len() as f64 / target_count as f64).min(1.0)
        };

        // Regularity can only scale confidence down to 40%; variance and coverage can zero it.
        let confidence = 100.0 * variance * (0.4 + 0.6 * regularity) * coverage;
        let confidence_pct = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };

        debug!(
            variation,
            variance, regularity, coverage, confidence_pct, "quality score"
        );
        QualityScore {
            variance,
            regularity,
            coverage,
            confidence_pct,
        }
    }

    /// 0 outside `[min_variation, max_variation]`, 1 inside the optimal band,
    /// log-linear ramps in between.
    fn variance_score(&self, variation: f64) -> f64 {
        let q = &self.config;
        if !variation.is_finite() || variation <= q.min_variation || variation >= q.max_variation {
            return 0.0;
        }
        if variation < q.optimal_variation_low {
            log_ramp(variation, q.min_variation, q.optimal_variation_low)
        } else if variation <= q.optimal_variation_high {
            1.0
        } else {
            1.0 - log_ramp(variation, q.optimal_variation_high, q.max_variation)
        }
    }
}

fn log_ramp(x: f64, lo: f64, hi: f64) -> f64 {
    ((x.ln() - lo.ln()) / (hi.ln() - lo.ln())).clamp(0.0, 1.0)
}

/// Standard deviation over mean; NaN when the mean is not positive.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if values.is_empty() || !(m > 0.0) {
        return f64::NAN;
    }
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / m
}

/// `1 − CV` of the inter-peak intervals; 0 with fewer than two intervals.
pub fn beat_regularity(peaks: &[usize]) -> f64 {
    if peaks.len() < 3 {
        return 0.0;
    }
    let intervals: Vec<f64> = peaks.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    let cv = coefficient_of_variation(&intervals);
    if cv.is_finite() {
        (1.0 - cv).clamp(0.0, 1.0)
    } else {
        0.0
    }
}
