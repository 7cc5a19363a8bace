//! Numeric core: filtering, peak detection and the per-signal estimators.
//!
//! Everything here is synchronous and never touches session state.

pub mod biquad;
pub mod peaks;
pub mod preprocess;
pub mod quality;
pub mod rate;
pub mod spo2;

pub use biquad::{Bandpass, Biquad};
pub use peaks::PeakDetector;
pub use preprocess::{Band, FilteredSignal, Preprocessor};
pub use quality::{QualityScore, QualityScorer};
pub use rate::{RateEstimate, RateEstimator, RateOutcome};
pub use spo2::Spo2Estimator;
