use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub peaks: PeakConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Nominal camera frame rate.
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,
    /// Capture length used when `initialize` does not name one.
    #[serde(default = "default_duration")]
    pub duration_secs: f64,
    /// Upper bound accepted from `initialize`.
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: f64,
    /// Upper bound on the frame rate, from config or `initialize`.
    #[serde(default = "default_max_sample_rate")]
    pub max_sample_rate_hz: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetrendMode {
    /// Subtract the window mean.
    Mean,
    /// Subtract a least-squares line.
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_detrend")]
    pub detrend: DetrendMode,
    /// Half-width of the centered moving average, in samples.
    #[serde(default = "default_smoothing_radius")]
    pub smoothing_radius: usize,
    /// Windows shorter than this skip smoothing and bandpass.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_cardiac_low")]
    pub cardiac_low_hz: f64,
    #[serde(default = "default_cardiac_high")]
    pub cardiac_high_hz: f64,
    #[serde(default = "default_respiration_low")]
    pub respiration_low_hz: f64,
    #[serde(default = "default_respiration_high")]
    pub respiration_high_hz: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeakConfig {
    /// A peak must exceed `max(signal) * threshold_ratio`.
    #[serde(default = "default_threshold_ratio")]
    pub threshold_ratio: f64,
    /// Samples on each side a peak must strictly dominate.
    #[serde(default = "default_neighborhood")]
    pub neighborhood: usize,
    /// Fastest pulse the refractory window allows.
    #[serde(default = "default_max_plausible_heart_rate")]
    pub max_plausible_heart_rate_bpm: f64,
    /// Fastest breathing the refractory window allows.
    #[serde(default = "default_max_plausible_respiration")]
    pub max_plausible_respiration_bpm: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default = "default_heart_rate")]
    pub default_heart_rate_bpm: f64,
    #[serde(default = "default_heart_rate_min")]
    pub heart_rate_min_bpm: f64,
    #[serde(default = "default_heart_rate_max")]
    pub heart_rate_max_bpm: f64,
    #[serde(default = "default_respiration")]
    pub default_respiration_bpm: f64,
    #[serde(default = "default_respiration_min")]
    pub respiration_min_bpm: f64,
    #[serde(default = "default_respiration_max")]
    pub respiration_max_bpm: f64,
    /// Placeholder linear calibration: `spo2 = intercept - slope * (r / b)`.
    #[serde(default = "default_spo2_intercept")]
    pub spo2_intercept: f64,
    #[serde(default = "default_spo2_slope")]
    pub spo2_slope: f64,
    #[serde(default = "default_spo2_min")]
    pub spo2_min_pct: f64,
    #[serde(default = "default_spo2_max")]
    pub spo2_max_pct: f64,
}

/// Bounds on the green channel's coefficient of variation (std / mean).
#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_variation")]
    pub min_variation: f64,
    #[serde(default = "default_optimal_low")]
    pub optimal_variation_low: f64,
    #[serde(default = "default_optimal_high")]
    pub optimal_variation_high: f64,
    #[serde(default = "default_max_variation")]
    pub max_variation: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Emit a capture progress notification every N accepted frames.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_frames: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            duration_secs: default_duration(),
            max_duration_secs: default_max_duration(),
            max_sample_rate_hz: default_max_sample_rate(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            detrend: default_detrend(),
            smoothing_radius: default_smoothing_radius(),
            min_samples: default_min_samples(),
            cardiac_low_hz: default_cardiac_low(),
            cardiac_high_hz: default_cardiac_high(),
            respiration_low_hz: default_respiration_low(),
            respiration_high_hz: default_respiration_high(),
        }
    }
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            threshold_ratio: default_threshold_ratio(),
            neighborhood: default_neighborhood(),
            max_plausible_heart_rate_bpm: default_max_plausible_heart_rate(),
            max_plausible_respiration_bpm: default_max_plausible_respiration(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            default_heart_rate_bpm: default_heart_rate(),
            heart_rate_min_bpm: default_heart_rate_min(),
            heart_rate_max_bpm: default_heart_rate_max(),
            default_respiration_bpm: default_respiration(),
            respiration_min_bpm: default_respiration_min(),
            respiration_max_bpm: default_respiration_max(),
            spo2_intercept: default_spo2_intercept(),
            spo2_slope: default_spo2_slope(),
            spo2_min_pct: default_spo2_min(),
            spo2_max_pct: default_spo2_max(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_variation: default_min_variation(),
            optimal_variation_low: default_optimal_low(),
            optimal_variation_high: default_optimal_high(),
            max_variation: default_max_variation(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            queue_capacity: default_queue_capacity(),
            progress_interval_frames: default_progress_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CaptureConfig {
    /// Number of samples that closes a capture of `duration_secs` at `sample_rate_hz`.
    pub fn target_count(&self, duration_secs: f64, sample_rate_hz: f64) -> usize {
        ((duration_secs * sample_rate_hz).round() as usize).max(1)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.capture;
        if !(c.max_sample_rate_hz > 0.0 && c.max_sample_rate_hz.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "capture.max_sample_rate_hz must be positive and finite, got {}",
                c.max_sample_rate_hz
            )));
        }
        if !(c.sample_rate_hz > 0.0 && c.sample_rate_hz <= c.max_sample_rate_hz) {
            return Err(ConfigError::Invalid(format!(
                "capture.sample_rate_hz must be in (0, {}], got {}",
                c.max_sample_rate_hz, c.sample_rate_hz
            )));
        }
        if !c.max_duration_secs.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "capture.max_duration_secs must be finite, got {}",
                c.max_duration_secs
            )));
        }
        if !(c.duration_secs > 0.0) || c.duration_secs > c.max_duration_secs {
            return Err(ConfigError::Invalid(format!(
                "capture.duration_secs must be in (0, {}], got {}",
                c.max_duration_secs, c.duration_secs
            )));
        }

        let f = &self.filter;
        check_band("cardiac", f.cardiac_low_hz, f.cardiac_high_hz)?;
        check_band("respiration", f.respiration_low_hz, f.respiration_high_hz)?;

        let p = &self.peaks;
        if !(p.threshold_ratio >= 0.0 && p.threshold_ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "peaks.threshold_ratio must be in [0, 1), got {}",
                p.threshold_ratio
            )));
        }
        if p.neighborhood == 0 {
            return Err(ConfigError::Invalid("peaks.neighborhood must be at least 1".into()));
        }

        let e = &self.estimator;
        check_range("heart rate", e.heart_rate_min_bpm, e.heart_rate_max_bpm)?;
        check_range("respiration", e.respiration_min_bpm, e.respiration_max_bpm)?;
        check_range("spo2", e.spo2_min_pct, e.spo2_max_pct)?;

        let q = &self.quality;
        if !(q.min_variation < q.optimal_variation_low
            && q.optimal_variation_low <= q.optimal_variation_high
            && q.optimal_variation_high < q.max_variation)
        {
            return Err(ConfigError::Invalid(
                "quality variation bounds must be increasing".into(),
            ));
        }

        if self.worker.request_timeout_secs == 0 || self.worker.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "worker.request_timeout_secs and worker.queue_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn check_band(name: &str, low: f64, high: f64) -> Result<(), ConfigError> {
    if low > 0.0 && low < high {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} band must satisfy 0 < low < high, got {low}..{high}"
        )))
    }
}

fn check_range(name: &str, min: f64, max: f64) -> Result<(), ConfigError> {
    if min.is_finite() && max.is_finite() && min < max {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} clamp range must satisfy min < max, got {min}..{max}"
        )))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_sample_rate() -> f64 {
    30.0
}
fn default_duration() -> f64 {
    10.0
}
fn default_max_duration() -> f64 {
    30.0
}
fn default_max_sample_rate() -> f64 {
    30.0
}
fn default_detrend() -> DetrendMode {
    DetrendMode::Mean
}
fn default_smoothing_radius() -> usize {
    2
}
fn default_min_samples() -> usize {
    10
}
fn default_cardiac_low() -> f64 {
    0.7
}
fn default_cardiac_high() -> f64 {
    4.0
}
fn default_respiration_low() -> f64 {
    0.13
}
fn default_respiration_high() -> f64 {
    0.67
}
fn default_threshold_ratio() -> f64 {
    0.35
}
fn default_neighborhood() -> usize {
    2
}
fn default_max_plausible_heart_rate() -> f64 {
    180.0
}
fn default_max_plausible_respiration() -> f64 {
    40.0
}
fn default_heart_rate() -> f64 {
    72.0
}
fn default_heart_rate_min() -> f64 {
    50.0
}
fn default_heart_rate_max() -> f64 {
    150.0
}
fn default_respiration() -> f64 {
    16.0
}
fn default_respiration_min() -> f64 {
    8.0
}
fn default_respiration_max() -> f64 {
    40.0
}
fn default_spo2_intercept() -> f64 {
    110.0
}
fn default_spo2_slope() -> f64 {
    25.0
}
fn default_spo2_min() -> f64 {
    85.0
}
fn default_spo2_max() -> f64 {
    100.0
}
fn default_min_variation() -> f64 {
    1e-4
}
fn default_optimal_low() -> f64 {
    1e-3
}
fn default_optimal_high() -> f64 {
    0.02
}
fn default_max_variation() -> f64 {
    0.1
}
fn default_request_timeout() -> u64 {
    60
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_progress_interval() -> u32 {
    30
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.capture.sample_rate_hz, 30.0);
        assert_eq!(config.filter.detrend, DetrendMode::Mean);
        assert_eq!(config.estimator.default_heart_rate_bpm, 72.0);
        assert_eq!(config.worker.request_timeout_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [filter]
            detrend = "linear"
            smoothing_radius = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.filter.detrend, DetrendMode::Linear);
        assert_eq!(config.filter.smoothing_radius, 3);
        assert_eq!(config.filter.min_samples, 10);
    }

    #[test]
    fn inverted_band_rejected() {
        let mut config = Config::default();
        config.filter.cardiac_low_hz = 5.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duration_above_max_rejected() {
        let mut config = Config::default();
        config.capture.duration_secs = 45.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unbounded_sample_rate_rejected() {
        for rate in [f64::INFINITY, f64::NAN, 1e18, 31.0] {
            let mut config = Config::default();
            config.capture.sample_rate_hz = rate;
            assert!(config.validate().is_err(), "rate {rate} accepted");
        }
        let mut config = Config::default();
        config.capture.max_sample_rate_hz = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn target_count_rounds() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.target_count(10.0, 30.0), 300);
        assert_eq!(capture.target_count(30.0, 30.0), 900);
        assert_eq!(capture.target_count(0.0, 30.0), 1);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/vitals.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/vitals.toml"));
    }
}
