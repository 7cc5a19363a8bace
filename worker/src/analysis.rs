use tracing::{info, warn};
use vitals_common::config::{Config, PeakConfig};
use vitals_common::sample::{AnalysisNote, Sample, VitalSignsResult};

use crate::dsp::{
    Band, PeakDetector, Preprocessor, QualityScorer, RateEstimate, RateEstimator, RateOutcome,
    Spo2Estimator,
};

/// Runs every estimator over one captured window and assembles the result.
#[derive(Debug, Clone)]
pub struct VitalsPipeline {
    preprocessor: Preprocessor,
    peaks: PeakConfig,
    heart: RateEstimator,
    respiration: RateEstimator,
    spo2: Spo2Estimator,
    quality: QualityScorer,
    min_samples: usize,
}

impl VitalsPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            preprocessor: Preprocessor::new(config.filter.clone()),
            peaks: config.peaks.clone(),
            heart: RateEstimator::heart_rate(&config.estimator),
            respiration: RateEstimator::respiration(&config.estimator),
            spo2: Spo2Estimator::new(&config.estimator),
            quality: QualityScorer::new(config.quality.clone()),
            min_samples: config.filter.min_samples,
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Never fails: short or noisy windows produce defaulted, clamped values
    /// and say so in `notes`.
    pub fn analyze(
        &self,
        samples: &[Sample],
        sample_rate_hz: f64,
        target_count: usize,
    ) -> VitalSignsResult {
        let mut notes = Vec::new();
        if samples.len() < self.min_samples {
            warn!(
                samples = samples.len(),
                min_samples = self.min_samples,
                "insufficient data, reporting defaults"
            );
            notes.push(AnalysisNote::InsufficientData);
        }

        let cardiac = self.preprocessor.process(samples, Band::Cardiac, sample_rate_hz);
        if !cardiac.is_bandpassed() {
            notes.push(AnalysisNote::Unfiltered);
        }
        let cardiac_peaks = PeakDetector::for_max_rate(
            &self.peaks,
            cardiac.sample_rate_hz(),
            self.peaks.max_plausible_heart_rate_bpm,
        )
        .detect(&cardiac);
        let heart = self
            .heart
            .from_peaks(&cardiac_peaks, samples, cardiac.sample_rate_hz());
        note_rate(
            &mut notes,
            heart,
            AnalysisNote::HeartRateDefaulted,
            AnalysisNote::HeartRateClamped,
        );

        let breathing = self
            .preprocessor
            .process(samples, Band::Respiration, sample_rate_hz);
        let breath_peaks = PeakDetector::for_max_rate(
            &self.peaks,
            breathing.sample_rate_hz(),
            self.peaks.max_plausible_respiration_bpm,
        )
        .detect(&breathing);
        let respiration = self
            .respiration
            .from_peaks(&breath_peaks, samples, breathing.sample_rate_hz());
        note_rate(
            &mut notes,
            respiration,
            AnalysisNote::RespirationDefaulted,
            AnalysisNote::RespirationClamped,
        );

        let spo2_pct = self.spo2.estimate(samples);
        notes.push(AnalysisNote::Spo2Heuristic);

        let quality = self.quality.score(samples, &cardiac_peaks, target_count);

        let result = VitalSignsResult {
            heart_rate_bpm: heart.bpm,
            respiration_rate_bpm: respiration.bpm,
            spo2_pct,
            confidence_pct: quality.confidence_pct,
            sample_count: u32::try_from(samples.len()).unwrap_or(u32::MAX),
            computed_at: chrono::Utc::now().timestamp_millis().max(0) as u64,
            notes,
        };
        info!(
            heart_rate_bpm = format!("{:.1}", result.heart_rate_bpm),
            respiration_rate_bpm = format!("{:.1}", result.respiration_rate_bpm),
            spo2_pct = format!("{:.1}", result.spo2_pct),
            confidence_pct = format!("{:.0}", result.confidence_pct),
            samples = result.sample_count,
            cardiac_peaks = cardiac_peaks.len(),
            breath_peaks = breath_peaks.len(),
            "vital signs computed"
        );
        result
    }
}

fn note_rate(
    notes: &mut Vec<AnalysisNote>,
    estimate: RateEstimate,
    defaulted: AnalysisNote,
    clamped: AnalysisNote,
) {
    match estimate.outcome {
        RateOutcome::Measured => {}
        RateOutcome::Defaulted => notes.push(defaulted),
        RateOutcome::Clamped { .. } => notes.push(clamped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{noisy_tone, tone};
    use vitals_common::config::DetrendMode;

    fn pipeline() -> VitalsPipeline {
        VitalsPipeline::new(&Config::default())
    }

    #[test]
    fn recovers_75_bpm_tone() {
        let samples = tone(75.0, 10.0, 30.0, 2.0);
        let result = pipeline().analyze(&samples, 30.0, 300);
        assert!(
            (result.heart_rate_bpm - 75.0).abs() <= 5.0,
            "heart rate {}",
            result.heart_rate_bpm
        );
        assert_eq!(result.sample_count, 300);
        assert!(!result.has_note(AnalysisNote::HeartRateDefaulted));
    }

    #[test]
    fn recovers_tone_under_noise() {
        let samples = noisy_tone(90.0, 10.0, 30.0, 2.0, 0.4);
        let result = pipeline().analyze(&samples, 30.0, 300);
        assert!(
            (result.heart_rate_bpm - 90.0).abs() <= 5.0,
            "heart rate {}",
            result.heart_rate_bpm
        );
    }

    #[test]
    fn outputs_stay_in_bounds() {
        for bpm in [40.0, 60.0, 100.0, 170.0, 220.0] {
            let result = pipeline().analyze(&tone(bpm, 10.0, 30.0, 2.0), 30.0, 300);
            assert!((50.0..=150.0).contains(&result.heart_rate_bpm), "{bpm}: {result:?}");
            assert!((8.0..=40.0).contains(&result.respiration_rate_bpm));
            assert!((85.0..=100.0).contains(&result.spo2_pct));
            assert!((0.0..=100.0).contains(&result.confidence_pct));
        }
    }

    #[test]
    fn short_window_defaults_without_failing() {
        let samples = tone(72.0, 5.0 / 30.0, 30.0, 2.0);
        assert_eq!(samples.len(), 5);
        let result = pipeline().analyze(&samples, 30.0, 300);
        assert_eq!(result.heart_rate_bpm, 72.0);
        assert_eq!(result.respiration_rate_bpm, 16.0);
        assert!(result.has_note(AnalysisNote::InsufficientData));
        assert!(result.has_note(AnalysisNote::Unfiltered));
        assert!(result.has_note(AnalysisNote::HeartRateDefaulted));
        assert!(result.confidence_pct.is_finite());
    }

    #[test]
    fn empty_window_defaults() {
        let result = pipeline().analyze(&[], 30.0, 300);
        assert_eq!(result.heart_rate_bpm, 72.0);
        assert_eq!(result.sample_count, 0);
        assert_eq!(result.confidence_pct, 0.0);
        assert!((85.0..=100.0).contains(&result.spo2_pct));
    }

    #[test]
    fn linear_detrend_recovers_tone_on_ramp() {
        let mut config = Config::default();
        config.filter.detrend = DetrendMode::Linear;
        let pipeline = VitalsPipeline::new(&config);

        // Illumination drifting up 12 units over the capture.
        let mut samples = tone(72.0, 10.0, 30.0, 2.0);
        for (i, s) in samples.iter_mut().enumerate() {
            s.g += 0.04 * i as f64;
        }
        let result = pipeline.analyze(&samples, 30.0, 300);
        assert!(
            (67.0..=77.0).contains(&result.heart_rate_bpm),
            "heart rate {}",
            result.heart_rate_bpm
        );
        assert!(!result.has_note(AnalysisNote::HeartRateDefaulted));
        assert!(!result.has_note(AnalysisNote::Unfiltered));
    }

    #[test]
    fn spo2_always_labelled() {
        let result = pipeline().analyze(&tone(72.0, 10.0, 30.0, 2.0), 30.0, 300);
        assert!(result.has_note(AnalysisNote::Spo2Heuristic));
    }

    #[test]
    fn respiration_from_its_own_band() {
        // 15 breaths/min riding under a 72 BPM pulse.
        let mut samples = tone(72.0, 20.0, 30.0, 1.0);
        for (i, s) in samples.iter_mut().enumerate() {
            let t = i as f64 / 30.0;
            s.g += 3.0 * (2.0 * std::f64::consts::PI * 0.25 * t).sin();
        }
        let result = pipeline().analyze(&samples, 30.0, 600);
        assert!(
            (result.respiration_rate_bpm - 15.0).abs() <= 3.0,
            "respiration {}",
            result.respiration_rate_bpm
        );
        assert!(
            (result.heart_rate_bpm - 72.0).abs() <= 5.0,
            "heart rate {}",
            result.heart_rate_bpm
        );
    }
}
