use std::time::Duration;

use vitals_common::protocol::SessionPhase;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkerError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("insufficient data: got {got} samples, need at least {required}")]
    InsufficientData { got: usize, required: usize },
    #[error("session already active")]
    SessionAlreadyActive,
    #[error("request timed out after {0:?}; reset the worker before reuse")]
    Timeout(Duration),
    #[error("processing failure: {0}")]
    ProcessingFailure(String),
    #[error("cannot {operation} while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },
    #[error("invalid sample: {0}")]
    InvalidSample(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("analysis cancelled by reset")]
    Cancelled,
    #[error("worker is not running")]
    WorkerClosed,
}

impl WorkerError {
    /// Errors after which the worker must be reset before it accepts a new session.
    pub fn requires_reset(&self) -> bool {
        matches!(self, WorkerError::Timeout(_) | WorkerError::ProcessingFailure(_))
    }
}
