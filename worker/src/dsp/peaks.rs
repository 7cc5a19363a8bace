use tracing::debug;
use vitals_common::config::PeakConfig;

/// Finds beats (or breaths) as thresholded strict local maxima.
///
/// A sample is a peak when it exceeds `max(signal) * threshold_ratio`, is
/// strictly greater than every sample within `neighborhood` on both sides, and
/// lies at least `refractory` samples after the previously accepted peak. When
/// two candidates fall inside one refractory window the earlier one is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakDetector {
    threshold_ratio: f64,
    neighborhood: usize,
    refractory: usize,
}

impl PeakDetector {
    pub fn new(threshold_ratio: f64, neighborhood: usize, refractory: usize) -> Self {
        Self {
            threshold_ratio,
            neighborhood: neighborhood.max(1),
            refractory,
        }
    }

    /// Detector whose refractory window matches the fastest plausible rate.
    pub fn for_max_rate(config: &PeakConfig, sample_rate_hz: f64, max_rate_bpm: f64) -> Self {
        let refractory = if sample_rate_hz > 0.0 && max_rate_bpm > 0.0 {
            (sample_rate_hz * 60.0 / max_rate_bpm).floor() as usize
        } else {
            0
        };
        Self::new(config.threshold_ratio, config.neighborhood, refractory)
    }

    pub fn refractory(&self) -> usize {
        self.refractory
    }

    /// Ordered indices of the detected peaks.
    pub fn detect(&self, signal: &[f64]) -> Vec<usize> {
        let r = self.neighborhood;
        if signal.len() < 2 * r + 1 {
            return Vec::new();
        }
        let max = signal
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !(max > 0.0) {
            return Vec::new();
        }
        let threshold = max * self.threshold_ratio;

        let mut peaks: Vec<usize> = Vec::new();
        let mut rejected = 0usize;
        for i in r..signal.len() - r {
            let v = signal[i];
            if !(v > threshold) {
                continue;
            }
            let dominates = signal[i - r..i].iter().all(|&n| v > n)
                && signal[i + 1..=i + r].iter().all(|&n| v > n);
            if !dominates {
                continue;
            }
            match peaks.last() {
                Some(&prev) if i - prev < self.refractory => rejected += 1,
                _ => peaks.push(i),
            }
        }

        debug!(
            peaks = peaks.len(),
            rejected,
            threshold,
            refractory = self.refractory,
            "peak detection"
        );
        peaks
    }
}
