use serde::{Deserialize, Serialize};

/// Mean color of the detected skin region for one camera frame.
///
/// `timestamp` is the capture time in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub timestamp: u64,
}

impl Sample {
    pub fn new(r: f64, g: f64, b: f64, timestamp: u64) -> Self {
        Self { r, g, b, timestamp }
    }

    /// Returns true if all three channels are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite()
    }
}

/// Qualifiers attached to a result so callers can tell measured values from
/// fallbacks and placeholder heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisNote {
    /// Fewer samples than the filter minimum were captured.
    InsufficientData,
    /// The window was too short to bandpass; rates come from the raw detrended signal.
    Unfiltered,
    /// Fewer than two heartbeats were found; the default heart rate was reported.
    HeartRateDefaulted,
    /// The measured heart rate fell outside the reportable range and was clamped.
    HeartRateClamped,
    /// Fewer than two breaths were found; the default respiration rate was reported.
    RespirationDefaulted,
    /// The measured respiration rate was clamped.
    RespirationClamped,
    /// SpO2 comes from an uncalibrated single-camera color ratio.
    Spo2Heuristic,
}

/// Vital-sign estimates for one completed capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalSignsResult {
    pub heart_rate_bpm: f64,
    pub respiration_rate_bpm: f64,
    pub spo2_pct: f64,
    pub confidence_pct: f64,
    pub sample_count: u32,
    /// Unix milliseconds at which the analysis finished.
    pub computed_at: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<AnalysisNote>,
}

impl VitalSignsResult {
    pub fn has_note(&self, note: AnalysisNote) -> bool {
        self.notes.contains(&note)
    }
}
