use std::sync::Arc;

use tracing::{debug, error, info, warn};
use vitals_common::config::Config;
use vitals_common::protocol::{FrameAck, FrameInput, InitializeParams, ResetAck, SessionInfo, SessionPhase};
use vitals_common::sample::{Sample, VitalSignsResult};

use crate::analysis::VitalsPipeline;
use crate::buffer::SignalWindow;
use crate::error::WorkerError;

/// One capture from `initialize` until its result, error or reset.
struct CaptureSession {
    id: u64,
    phase: SessionPhase,
    window: SignalWindow,
    target_count: usize,
    sample_rate_hz: f64,
    duration_secs: f64,
    /// Frames that arrived after the capture closed.
    dropped_frames: u32,
    /// Set once an analysis job has been handed out for this capture.
    analysis_started: bool,
}

impl CaptureSession {
    fn frame_count(&self) -> u32 {
        u32::try_from(self.window.len()).unwrap_or(u32::MAX)
    }

    fn ack(&self, accepted: bool) -> FrameAck {
        FrameAck {
            accepted,
            frame_count: self.frame_count(),
            phase: self.phase,
        }
    }
}

/// What happened to one `processFrame`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub ack: FrameAck,
    /// True only for the frame that filled the window.
    pub capture_complete: bool,
    pub target_count: usize,
}

/// A snapshot of a closed capture, ready to run off the actor.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    session_id: u64,
    samples: Vec<Sample>,
    sample_rate_hz: f64,
    target_count: usize,
    pipeline: Arc<VitalsPipeline>,
}

impl AnalysisJob {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Fewer samples than the pipeline needs to filter; the result will be defaulted.
    pub fn is_insufficient(&self) -> bool {
        self.samples.len() < self.pipeline.min_samples()
    }

    pub fn run(self) -> VitalSignsResult {
        self.pipeline
            .analyze(&self.samples, self.sample_rate_hz, self.target_count)
    }
}

/// Owns the (at most one) capture session and enforces its lifecycle.
///
/// `Idle → Preparing → Capturing → Analyzing → Complete → Idle`. A stream
/// failure or failed analysis leaves the manager faulted (`Error`) until
/// `reset`.
pub struct SessionManager {
    config: Config,
    pipeline: Arc<VitalsPipeline>,
    session: Option<CaptureSession>,
    /// Reason for the last unrecoverable fault.
    fault: Option<String>,
    next_session_id: u64,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let pipeline = Arc::new(VitalsPipeline::new(&config));
        Self {
            config,
            pipeline,
            session: None,
            fault: None,
            next_session_id: 1,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.session, &self.fault) {
            (Some(session), _) => session.phase,
            (None, Some(_)) => SessionPhase::Error,
            (None, None) => SessionPhase::Idle,
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.session.as_ref().map_or(0, CaptureSession::frame_count)
    }

    pub fn start(&mut self, params: InitializeParams) -> Result<SessionInfo, WorkerError> {
        if let Some(reason) = &self.fault {
            warn!(reason = %reason, "initialize rejected, worker needs a reset");
            return Err(WorkerError::InvalidState {
                operation: "initialize",
                phase: SessionPhase::Error,
            });
        }
        if self.phase().is_active() {
            return Err(WorkerError::SessionAlreadyActive);
        }

        let capture = &self.config.capture;
        let duration_secs = params.duration_secs.unwrap_or(capture.duration_secs);
        if !(duration_secs > 0.0 && duration_secs <= capture.max_duration_secs) {
            return Err(WorkerError::InvalidRequest(format!(
                "duration_secs must be in (0, {}], got {duration_secs}",
                capture.max_duration_secs
            )));
        }
        let sample_rate_hz = params.sample_rate_hz.unwrap_or(capture.sample_rate_hz);
        if !(sample_rate_hz > 0.0 && sample_rate_hz <= capture.max_sample_rate_hz) {
            return Err(WorkerError::InvalidRequest(format!(
                "sample_rate_hz must be in (0, {}], got {sample_rate_hz}",
                capture.max_sample_rate_hz
            )));
        }
        let target_count = capture.target_count(duration_secs, sample_rate_hz);

        let id = self.next_session_id;
        self.next_session_id += 1;
        self.session = Some(CaptureSession {
            id,
            phase: SessionPhase::Preparing,
            window: SignalWindow::with_capacity(target_count),
            target_count,
            sample_rate_hz,
            duration_secs,
            dropped_frames: 0,
            analysis_started: false,
        });
        info!(
            session_id = id,
            duration_secs, sample_rate_hz, target_count, "IDLE→PREPARING: session started"
        );

        Ok(SessionInfo {
            session_id: id,
            sample_rate_hz,
            duration_secs,
            target_count: u32::try_from(target_count).unwrap_or(u32::MAX),
        })
    }

    pub fn push(&mut self, frame: FrameInput) -> Result<PushOutcome, WorkerError> {
        let phase = self.phase();
        let Some(session) = self.session.as_mut() else {
            return Err(WorkerError::InvalidState {
                operation: "process frame",
                phase,
            });
        };
        let target_count = session.target_count;

        let sample = match frame {
            FrameInput::StreamFailure { reason } => {
                error!(session_id = session.id, reason = %reason, "frame source failed, session aborted");
                self.fail(reason.clone());
                return Err(WorkerError::ProcessingFailure(format!("frame source failed: {reason}")));
            }
            FrameInput::NoFace { timestamp } => {
                if session.phase == SessionPhase::Analyzing {
                    session.dropped_frames += 1;
                    return Ok(PushOutcome {
                        ack: session.ack(false),
                        capture_complete: false,
                        target_count,
                    });
                }
                warn!(
                    session_id = session.id,
                    timestamp,
                    frames = session.window.len(),
                    "no face in frame, session ended"
                );
                self.session = None;
                return Err(WorkerError::NoFaceDetected);
            }
            FrameInput::Sample(sample) => sample,
        };

        if !sample.is_finite() {
            return Err(WorkerError::InvalidSample(format!(
                "non-finite color values at timestamp {}",
                sample.timestamp
            )));
        }

        match session.phase {
            SessionPhase::Preparing => {
                session.phase = SessionPhase::Capturing;
                info!(session_id = session.id, ts = sample.timestamp, "PREPARING→CAPTURING: first sample");
            }
            SessionPhase::Capturing => {}
            _ => {
                session.dropped_frames += 1;
                debug!(
                    session_id = session.id,
                    dropped = session.dropped_frames,
                    "frame after capture closed, dropped"
                );
                return Ok(PushOutcome {
                    ack: session.ack(false),
                    capture_complete: false,
                    target_count,
                });
            }
        }

        if session.window.push(sample).is_some() {
            debug!(session_id = session.id, "window full, oldest sample evicted");
        }
        let capture_complete = session.window.len() >= target_count;
        if capture_complete {
            session.phase = SessionPhase::Analyzing;
            info!(
                session_id = session.id,
                frames = session.window.len(),
                "CAPTURING→ANALYZING: target reached"
            );
        }

        Ok(PushOutcome {
            ack: session.ack(true),
            capture_complete,
            target_count,
        })
    }

    /// Close the capture early. No-op once the capture is already closed.
    pub fn stop(&mut self) -> Result<usize, WorkerError> {
        let phase = self.phase();
        let Some(session) = self.session.as_mut() else {
            return Err(WorkerError::InvalidState {
                operation: "stop capture",
                phase,
            });
        };
        match session.phase {
            SessionPhase::Capturing => {
                session.phase = SessionPhase::Analyzing;
                info!(
                    session_id = session.id,
                    frames = session.window.len(),
                    target = session.target_count,
                    "CAPTURING→ANALYZING: capture stopped early"
                );
                Ok(session.window.len())
            }
            SessionPhase::Analyzing => Ok(session.window.len()),
            other => Err(WorkerError::InvalidState {
                operation: "stop capture",
                phase: other,
            }),
        }
    }

    /// Close the capture (if still open) and hand out its samples for analysis.
    pub fn begin_analysis(&mut self) -> Result<AnalysisJob, WorkerError> {
        let phase = self.phase();
        match phase {
            SessionPhase::Preparing => {
                return Err(WorkerError::InsufficientData {
                    got: 0,
                    required: self.pipeline.min_samples(),
                })
            }
            SessionPhase::Capturing => {
                self.stop()?;
            }
            SessionPhase::Analyzing => {}
            _ => {
                return Err(WorkerError::InvalidState {
                    operation: "calculate vital signs",
                    phase,
                })
            }
        }

        let pipeline = Arc::clone(&self.pipeline);
        let Some(session) = self.session.as_mut() else {
            return Err(WorkerError::InvalidState {
                operation: "calculate vital signs",
                phase,
            });
        };
        if session.analysis_started {
            return Err(WorkerError::InvalidState {
                operation: "calculate vital signs twice",
                phase,
            });
        }
        session.analysis_started = true;
        debug!(
            session_id = session.id,
            samples = session.window.len(),
            duration_secs = session.duration_secs,
            "analysis job created"
        );

        Ok(AnalysisJob {
            session_id: session.id,
            samples: session.window.snapshot(),
            sample_rate_hz: session.sample_rate_hz,
            target_count: session.target_count,
            pipeline,
        })
    }

    /// Record the outcome of a job from `begin_analysis`.
    ///
    /// A job whose session was reset in the meantime is reported as cancelled.
    pub fn finish_analysis(
        &mut self,
        session_id: u64,
        outcome: Result<VitalSignsResult, String>,
    ) -> Result<VitalSignsResult, WorkerError> {
        let current = self.session.as_ref().map(|s| s.id);
        if current != Some(session_id) {
            debug!(session_id, ?current, "analysis outcome for a discarded session");
            return Err(WorkerError::Cancelled);
        }

        match outcome {
            Ok(result) => {
                if let Some(session) = self.session.take() {
                    info!(
                        session_id,
                        dropped_frames = session.dropped_frames,
                        "ANALYZING→COMPLETE: session finished"
                    );
                }
                Ok(result)
            }
            Err(reason) => {
                error!(session_id, reason = %reason, "analysis failed");
                self.fail(reason.clone());
                Err(WorkerError::ProcessingFailure(reason))
            }
        }
    }

    /// Run the analysis inline. The actor uses `begin_analysis`/`finish_analysis`
    /// around a blocking task instead.
    pub fn calculate(&mut self) -> Result<VitalSignsResult, WorkerError> {
        let job = self.begin_analysis()?;
        let session_id = job.session_id();
        let result = job.run();
        self.finish_analysis(session_id, Ok(result))
    }

    /// Drop any session and clear a fault. Safe to call in every phase.
    pub fn reset(&mut self) -> ResetAck {
        let previous_phase = self.phase();
        let discarded_samples = self.frame_count();
        if let Some(session) = self.session.take() {
            info!(
                session_id = session.id,
                phase = %previous_phase,
                discarded_samples,
                "session cancelled"
            );
        }
        if self.fault.take().is_some() {
            info!("fault cleared by reset");
        }
        ResetAck {
            previous_phase,
            discarded_samples,
        }
    }

    /// Abandon the current session and hold the manager in `Error` until reset.
    fn fail(&mut self, reason: String) {
        self.session = None;
        self.fault = Some(reason);
    }
}
