use tracing::debug;
use vitals_common::config::EstimatorConfig;
use vitals_common::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateOutcome {
    /// Computed from at least two peaks and already inside the reportable range.
    Measured,
    /// Computed, then clamped; `raw_bpm` is the unclamped value.
    Clamped { raw_bpm: f64 },
    /// Too few peaks (or no elapsed time); the configured default was reported.
    Defaulted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimate {
    pub bpm: f64,
    pub outcome: RateOutcome,
}

/// Converts a peak train into a per-minute rate with a safety clamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimator {
    default_bpm: f64,
    min_bpm: f64,
    max_bpm: f64,
}

impl RateEstimator {
    pub fn new(default_bpm: f64, min_bpm: f64, max_bpm: f64) -> Self {
        Self {
            default_bpm,
            min_bpm,
            max_bpm,
        }
    }

    pub fn heart_rate(config: &EstimatorConfig) -> Self {
        Self::new(
            config.default_heart_rate_bpm,
            config.heart_rate_min_bpm,
            config.heart_rate_max_bpm,
        )
    }

    pub fn respiration(config: &EstimatorConfig) -> Self {
        Self::new(
            config.default_respiration_bpm,
            config.respiration_min_bpm,
            config.respiration_max_bpm,
        )
    }

    /// `60 × (peaks − 1) / span_secs`, clamped. Fewer than two peaks or a
    /// non-positive span yields the default.
    pub fn from_count(&self, peaks: usize, span_secs: f64) -> RateEstimate {
        if peaks < 2 || !(span_secs > 0.0) || !span_secs.is_finite() {
            return RateEstimate {
                bpm: self.default_bpm.clamp(self.min_bpm, self.max_bpm),
                outcome: RateOutcome::Defaulted,
            };
        }
        let raw_bpm = 60.0 * (peaks - 1) as f64 / span_secs;
        let bpm = raw_bpm.clamp(self.min_bpm, self.max_bpm);
        let outcome = if bpm == raw_bpm {
            RateOutcome::Measured
        } else {
            RateOutcome::Clamped { raw_bpm }
        };
        RateEstimate { bpm, outcome }
    }

    /// Rate from peak indices into `samples`, timed by the samples' timestamps.
    pub fn from_peaks(&self, peaks: &[usize], samples: &[Sample], sample_rate_hz: f64) -> RateEstimate {
        let span_secs = peak_span_secs(peaks, samples, sample_rate_hz);
        let estimate = self.from_count(peaks.len(), span_secs);
        debug!(
            peaks = peaks.len(),
            span_secs,
            bpm = estimate.bpm,
            outcome = ?estimate.outcome,
            "rate estimate"
        );
        estimate
    }
}

/// Seconds between the first and last peak. Uses sample timestamps when they
/// increase across the span, otherwise the index distance at `sample_rate_hz`.
pub fn peak_span_secs(peaks: &[usize], samples: &[Sample], sample_rate_hz: f64) -> f64 {
    let (Some(&first), Some(&last)) = (peaks.first(), peaks.last()) else {
        return 0.0;
    };
    if let (Some(a), Some(b)) = (samples.get(first), samples.get(last)) {
        if b.timestamp > a.timestamp {
            return (b.timestamp - a.timestamp) as f64 / 1000.0;
        }
    }
    if sample_rate_hz > 0.0 {
        last.saturating_sub(first) as f64 / sample_rate_hz
    } else {
        0.0
    }
}
