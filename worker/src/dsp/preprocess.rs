use std::ops::Deref;

use tracing::{debug, warn};
use vitals_common::config::{DetrendMode, FilterConfig};
use vitals_common::sample::Sample;

use super::biquad::Bandpass;

/// Frequency band a signal is filtered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// Pulse, 0.7–4.0 Hz by default.
    Cardiac,
    /// Breathing, 0.13–0.67 Hz by default.
    Respiration,
}

/// One scalar per input sample, ready for peak detection.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredSignal {
    values: Vec<f64>,
    sample_rate_hz: f64,
    bandpassed: bool,
}

impl FilteredSignal {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Sample rate the filter was designed for.
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// False when the window was too short (or the band unrealizable) and only
    /// detrending was applied.
    pub fn is_bandpassed(&self) -> bool {
        self.bandpassed
    }
}

impl Deref for FilteredSignal {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.values
    }
}

/// Turns raw color samples into a band-limited pulse or breathing waveform.
///
/// Green channel → detrend → centered moving average → zero-phase Butterworth
/// bandpass. Windows shorter than `min_samples` come back detrended only.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: FilterConfig,
}

impl Preprocessor {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn process(&self, samples: &[Sample], band: Band, nominal_rate_hz: f64) -> FilteredSignal {
        let sample_rate_hz = effective_sample_rate(samples, nominal_rate_hz);
        let mut values = green_channel(samples);
        match self.config.detrend {
            DetrendMode::Mean => detrend_mean(&mut values),
            DetrendMode::Linear => detrend_linear(&mut values),
        }

        if samples.len() < self.config.min_samples {
            debug!(
                samples = samples.len(),
                min_samples = self.config.min_samples,
                ?band,
                "window too short, skipping smoothing and bandpass"
            );
            return FilteredSignal {
                values,
                sample_rate_hz,
                bandpassed: false,
            };
        }

        let smoothed = moving_average(&values, self.config.smoothing_radius);
        let (low_hz, high_hz) = self.band_edges(band);
        match Bandpass::butterworth(low_hz, high_hz, sample_rate_hz) {
            Some(bandpass) => {
                debug!(?band, low_hz, high_hz, sample_rate_hz, samples = samples.len(), "bandpass");
                FilteredSignal {
                    values: bandpass.filtfilt(&smoothed),
                    sample_rate_hz,
                    bandpassed: true,
                }
            }
            None => {
                warn!(
                    ?band,
                    low_hz, high_hz, sample_rate_hz, "band not realizable at this sample rate, using smoothed signal"
                );
                FilteredSignal {
                    values: smoothed,
                    sample_rate_hz,
                    bandpassed: false,
                }
            }
        }
    }

    fn band_edges(&self, band: Band) -> (f64, f64) {
        match band {
            Band::Cardiac => (self.config.cardiac_low_hz, self.config.cardiac_high_hz),
            Band::Respiration => (
                self.config.respiration_low_hz,
                self.config.respiration_high_hz,
            ),
        }
    }
}

pub fn green_channel(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|s| s.g).collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Subtract the arithmetic mean in place.
pub fn detrend_mean(values: &mut [f64]) {
    let m = mean(values);
    values.iter_mut().for_each(|v| *v -= m);
}

/// Subtract the least-squares line through `(index, value)` in place.
pub fn detrend_linear(values: &mut [f64]) {
    let n = values.len();
    if n < 2 {
        detrend_mean(values);
        return;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    for (i, v) in values.iter_mut().enumerate() {
        *v -= y_mean + slope * (i as f64 - x_mean);
    }
}

/// Centered moving average. Near the edges the window is truncated to the
/// samples that exist.
pub fn moving_average(values: &[f64], radius: usize) -> Vec<f64> {
    if radius == 0 || values.len() < 2 {
        return values.to_vec();
    }
    // prefix[i] = sum of values[..i]
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    for v in values {
        prefix.push(prefix[prefix.len() - 1] + v);
    }
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Frame rate implied by the sample timestamps, or `nominal_hz` when the
/// timestamps are missing, non-monotonic, or disagree with it by more than 2x.
pub fn effective_sample_rate(samples: &[Sample], nominal_hz: f64) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return nominal_hz;
    };
    if samples.len() < 2 || last.timestamp <= first.timestamp {
        return nominal_hz;
    }
    let span_secs = (last.timestamp - first.timestamp) as f64 / 1000.0;
    let measured = (samples.len() - 1) as f64 / span_secs;
    if measured >= nominal_hz / 2.0 && measured <= nominal_hz * 2.0 {
        measured
    } else {
        debug!(measured, nominal_hz, "timestamps disagree with nominal frame rate, ignoring them");
        nominal_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::tone;

    fn flat(n: usize, g: f64) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(100.0, g, 80.0, 1_000 + i as u64 * 33))
            .collect()
    }

    #[test]
    fn mean_detrend_zeroes_mean() {
        let mut values = vec![10.0, 12.0, 14.0, 16.0];
        detrend_mean(&mut values);
        assert!(mean(&values).abs() < 1e-12);
        assert_eq!(values, vec![-3.0, -1.0, 1.0, 3.0]);
    }

    #[test]
    fn linear_detrend_removes_ramp() {
        let mut values: Vec<f64> = (0..50).map(|i| 5.0 + 0.3 * i as f64).collect();
        detrend_linear(&mut values);
        assert!(values.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn moving_average_truncates_edges() {
        let out = moving_average(&[0.0, 3.0, 6.0, 9.0], 1);
        assert_eq!(out, vec![1.5, 3.0, 6.0, 7.5]);
        assert_eq!(moving_average(&[1.0, 2.0], 0), vec![1.0, 2.0]);
    }

    #[test]
    fn short_window_returns_detrended_only() {
        let pre = Preprocessor::new(FilterConfig::default());
        let samples: Vec<Sample> = [100.0, 102.0, 98.0, 101.0, 99.0]
            .iter()
            .enumerate()
            .map(|(i, &g)| Sample::new(0.0, g, 0.0, i as u64 * 33))
            .collect();
        let out = pre.process(&samples, Band::Cardiac, 30.0);
        assert!(!out.is_bandpassed());
        assert_eq!(out.values(), &[0.0, 2.0, -2.0, 1.0, -1.0]);
    }

    #[test]
    fn empty_window_is_tolerated() {
        let pre = Preprocessor::new(FilterConfig::default());
        let out = pre.process(&[], Band::Respiration, 30.0);
        assert!(out.is_empty());
        assert_eq!(out.sample_rate_hz(), 30.0);
    }

    #[test]
    fn cardiac_band_keeps_pulse_and_drops_offset() {
        let pre = Preprocessor::new(FilterConfig::default());
        let samples = tone(75.0, 10.0, 30.0, 2.0);
        let out = pre.process(&samples, Band::Cardiac, 30.0);
        assert!(out.is_bandpassed());
        assert_eq!(out.len(), samples.len());
        assert!(mean(&out).abs() < 0.1);
        let peak = out.iter().cloned().fold(f64::MIN, f64::max);
        assert!(peak > 1.0 && peak < 2.5, "peak amplitude {peak}");
    }

    #[test]
    fn flat_input_filters_to_zero() {
        let pre = Preprocessor::new(FilterConfig::default());
        let out = pre.process(&flat(120, 90.0), Band::Cardiac, 30.0);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn sample_rate_from_timestamps() {
        let samples = tone(72.0, 10.0, 25.0, 1.0);
        let rate = effective_sample_rate(&samples, 30.0);
        assert!((rate - 25.0).abs() < 0.1, "rate {rate}");

        // Clock far off the nominal rate: trust the configuration.
        let stalled: Vec<Sample> = (0..100).map(|i| Sample::new(0.0, 0.0, 0.0, i)).collect();
        assert_eq!(effective_sample_rate(&stalled, 30.0), 30.0);
        assert_eq!(effective_sample_rate(&flat(1, 1.0), 30.0), 30.0);
    }
}
