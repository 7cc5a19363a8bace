//! Camera-based (rPPG) vital-signs worker.
//!
//! Per-frame mean skin colors go into a bounded window owned by a capture
//! session; once the capture closes the window is filtered and turned into
//! heart rate, respiration rate, an SpO2 placeholder and a confidence score.
//! Everything runs inside one actor task reached through [`WorkerHandle`].

pub mod actor;
pub mod analysis;
pub mod bridge;
pub mod buffer;
pub mod dsp;
pub mod error;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use actor::{spawn, PendingReply, WorkerHandle};
pub use analysis::VitalsPipeline;
pub use bridge::Bridge;
pub use buffer::SignalWindow;
pub use error::WorkerError;
pub use session::{AnalysisJob, PushOutcome, SessionManager};
