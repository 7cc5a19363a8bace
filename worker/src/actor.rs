//! The worker task and the handle callers talk to it through.
//!
//! All session state lives inside one tokio task; callers only ever send it
//! [`Command`]s. Requests are answered through a `oneshot` per request, and
//! progress notifications go out on a separate unbounded channel tagged with
//! the id of the request that caused them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use vitals_common::config::Config;
use vitals_common::protocol::{
    Command, CommandKind, FrameAck, FrameInput, InitializeParams, Progress, ProgressEnvelope,
    ProgressPhase, Reply, ResetAck, SessionInfo, SessionPhase,
};
use vitals_common::sample::VitalSignsResult;

use crate::error::WorkerError;
use crate::session::SessionManager;

type ReplySender = oneshot::Sender<Result<Reply, WorkerError>>;

struct Envelope {
    id: u64,
    command: Command,
    /// `None` for fire-and-forget submissions.
    reply: Option<ReplySender>,
}

/// Start the worker task. Must be called from inside a tokio runtime.
///
/// The task exits once every [`WorkerHandle`] clone is dropped.
pub fn spawn(config: Config) -> (WorkerHandle, mpsc::UnboundedReceiver<ProgressEnvelope>) {
    let (tx, inbox) = mpsc::channel(config.worker.queue_capacity.max(1));
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let timeout = Duration::from_secs(config.worker.request_timeout_secs);
    let progress_interval = config.worker.progress_interval_frames;

    let actor = Actor {
        sessions: SessionManager::new(config),
        inbox,
        progress: progress_tx,
        progress_interval,
    };
    tokio::spawn(actor.run());

    let handle = WorkerHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
        timeout,
    };
    (handle, progress_rx)
}

/// Cloneable sender side of the worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Envelope>,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl WorkerHandle {
    /// Override the per-request timeout for this handle.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fresh correlation id for requests that do not bring their own.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a request under a caller-chosen id. Requests are handled in the
    /// order they are queued; the returned [`PendingReply`] resolves it.
    pub async fn enqueue(&self, id: u64, command: Command) -> Result<PendingReply, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Envelope {
            id,
            command,
            reply: Some(reply_tx),
        })
        .await?;
        Ok(PendingReply {
            id,
            rx: reply_rx,
            timeout: self.timeout,
        })
    }

    /// Queue a request and wait for its reply.
    pub async fn request(&self, command: Command) -> Result<Reply, WorkerError> {
        self.enqueue(self.next_id(), command).await?.wait().await
    }

    /// Queue a frame without waiting for its acknowledgement. Failures are logged
    /// by the worker. Returns the id the frame was queued under.
    pub async fn submit_frame(&self, frame: FrameInput) -> Result<u64, WorkerError> {
        let id = self.next_id();
        self.send(Envelope {
            id,
            command: Command::ProcessFrame(frame),
            reply: None,
        })
        .await?;
        Ok(id)
    }

    pub async fn initialize(&self, params: InitializeParams) -> Result<SessionInfo, WorkerError> {
        match self.request(Command::Initialize(params)).await? {
            Reply::Session(info) => Ok(info),
            other => Err(unexpected(CommandKind::Initialize, &other)),
        }
    }

    pub async fn process_frame(&self, frame: FrameInput) -> Result<FrameAck, WorkerError> {
        match self.request(Command::ProcessFrame(frame)).await? {
            Reply::Frame(ack) => Ok(ack),
            other => Err(unexpected(CommandKind::ProcessFrame, &other)),
        }
    }

    pub async fn calculate_vital_signs(&self) -> Result<VitalSignsResult, WorkerError> {
        match self.request(Command::CalculateVitalSigns).await? {
            Reply::VitalSigns(result) => Ok(result),
            other => Err(unexpected(CommandKind::CalculateVitalSigns, &other)),
        }
    }

    pub async fn reset(&self) -> Result<ResetAck, WorkerError> {
        match self.request(Command::Reset).await? {
            Reply::Reset(ack) => Ok(ack),
            other => Err(unexpected(CommandKind::Reset, &other)),
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<(), WorkerError> {
        self.tx
            .send_timeout(envelope, self.timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => WorkerError::Timeout(self.timeout),
                SendTimeoutError::Closed(_) => WorkerError::WorkerClosed,
            })
    }
}

fn unexpected(kind: CommandKind, reply: &Reply) -> WorkerError {
    WorkerError::ProcessingFailure(format!("unexpected reply to {}: {reply:?}", kind.as_str()))
}

/// A queued request whose reply has not arrived yet.
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Result<Reply, WorkerError>>,
    timeout: Duration,
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait up to the request timeout. After a `Timeout` the worker must be
    /// reset before it is reused.
    pub async fn wait(self) -> Result<Reply, WorkerError> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WorkerError::WorkerClosed),
            Err(_) => {
                warn!(id = self.id, timeout = ?self.timeout, "request timed out");
                Err(WorkerError::Timeout(self.timeout))
            }
        }
    }
}

struct Actor {
    sessions: SessionManager,
    inbox: mpsc::Receiver<Envelope>,
    progress: mpsc::UnboundedSender<ProgressEnvelope>,
    progress_interval: u32,
}

impl Actor {
    async fn run(mut self) {
        info!("vitals worker started");
        while let Some(envelope) = self.inbox.recv().await {
            let Envelope { id, command, reply } = envelope;
            match command {
                Command::CalculateVitalSigns => self.calculate(id, reply).await,
                other => {
                    let kind = other.kind();
                    let outcome = self.apply(id, other);
                    respond(id, kind, reply, outcome);
                }
            }
        }
        info!("all worker handles dropped, vitals worker stopped");
    }

    /// Every command except `calculateVitalSigns`, which needs the event loop.
    fn apply(&mut self, id: u64, command: Command) -> Result<Reply, WorkerError> {
        match command {
            Command::Initialize(params) => {
                let info = self.sessions.start(params)?;
                self.emit(
                    id,
                    ProgressPhase::Initialized,
                    Some(0),
                    format!("session {} waiting for {} frames", info.session_id, info.target_count),
                );
                Ok(Reply::Session(info))
            }
            Command::ProcessFrame(frame) => {
                let outcome = self.sessions.push(frame)?;
                let count = outcome.ack.frame_count;
                if outcome.ack.accepted
                    && self.progress_interval > 0
                    && count % self.progress_interval == 0
                    && !outcome.capture_complete
                {
                    self.emit(
                        id,
                        ProgressPhase::Capturing,
                        Some(count),
                        format!("{count}/{} frames", outcome.target_count),
                    );
                }
                if outcome.capture_complete {
                    self.emit(
                        id,
                        ProgressPhase::CaptureComplete,
                        Some(count),
                        "capture complete",
                    );
                }
                Ok(Reply::Frame(outcome.ack))
            }
            Command::Reset => Ok(Reply::Reset(self.sessions.reset())),
            Command::CalculateVitalSigns => Err(WorkerError::InvalidState {
                operation: "calculate vital signs",
                phase: self.sessions.phase(),
            }),
        }
    }

    /// Run the analysis on a blocking thread while still serving the queue.
    /// Queued messages are served before a finished analysis is collected, so
    /// a `reset` queued behind `calculateVitalSigns` always cancels it.
    async fn calculate(&mut self, id: u64, reply: Option<ReplySender>) {
        let job = match self.sessions.begin_analysis() {
            Ok(job) => job,
            Err(e) => {
                respond(id, CommandKind::CalculateVitalSigns, reply, Err(e));
                return;
            }
        };
        let session_id = job.session_id();
        let count = u32::try_from(job.sample_count()).unwrap_or(u32::MAX);
        self.emit(
            id,
            ProgressPhase::Analyzing,
            Some(count),
            format!("analyzing {count} samples"),
        );
        if job.is_insufficient() {
            self.emit(
                id,
                ProgressPhase::InsufficientData,
                Some(count),
                format!("only {count} samples captured, reporting defaults"),
            );
        }

        let mut task = tokio::task::spawn_blocking(move || job.run());
        let mut inbox_open = true;
        let mut pending_reset: Option<(u64, Option<ReplySender>)> = None;

        let outcome = loop {
            tokio::select! {
                biased;

                next = self.inbox.recv(), if inbox_open => {
                    let Some(Envelope { id: next_id, command, reply: next_reply }) = next else {
                        inbox_open = false;
                        continue;
                    };
                    match command {
                        Command::Reset => {
                            task.abort();
                            info!(session_id, "analysis aborted by reset");
                            pending_reset = Some((next_id, next_reply));
                            break Err(WorkerError::Cancelled);
                        }
                        Command::CalculateVitalSigns => respond(
                            next_id,
                            CommandKind::CalculateVitalSigns,
                            next_reply,
                            Err(WorkerError::InvalidState {
                                operation: "calculate vital signs twice",
                                phase: SessionPhase::Analyzing,
                            }),
                        ),
                        other => {
                            let kind = other.kind();
                            let outcome = self.apply(next_id, other);
                            respond(next_id, kind, next_reply, outcome);
                        }
                    }
                }
                joined = &mut task => {
                    let outcome = joined.map_err(|e| format!("analysis task failed: {e}"));
                    break self.sessions.finish_analysis(session_id, outcome);
                }
            }
        };

        if let Ok(result) = &outcome {
            self.emit(
                id,
                ProgressPhase::Complete,
                Some(result.sample_count),
                "vital signs ready",
            );
        }
        respond(
            id,
            CommandKind::CalculateVitalSigns,
            reply,
            outcome.map(Reply::VitalSigns),
        );

        if let Some((reset_id, reset_reply)) = pending_reset {
            let ack = self.sessions.reset();
            respond(reset_id, CommandKind::Reset, reset_reply, Ok(Reply::Reset(ack)));
        }
    }

    fn emit(&self, id: u64, phase: ProgressPhase, frame_count: Option<u32>, message: impl Into<String>) {
        let progress = ProgressEnvelope {
            id,
            progress: Progress {
                phase,
                frame_count,
                message: message.into(),
            },
        };
        // Nobody listening for progress is fine.
        let _ = self.progress.send(progress);
    }
}

fn respond(
    id: u64,
    kind: CommandKind,
    reply: Option<ReplySender>,
    outcome: Result<Reply, WorkerError>,
) {
    if let Err(e) = &outcome {
        warn!(id, command = kind.as_str(), error = %e, "request failed");
    }
    match reply {
        Some(tx) => {
            if tx.send(outcome).is_err() {
                debug!(id, command = kind.as_str(), "caller stopped waiting, reply dropped");
            }
        }
        None => debug!(id, command = kind.as_str(), "fire-and-forget request handled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::tone;
    use vitals_common::sample::Sample;

    fn ten_seconds() -> InitializeParams {
        InitializeParams {
            duration_secs: Some(10.0),
            sample_rate_hz: Some(30.0),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEnvelope>) -> Vec<ProgressEnvelope> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn end_to_end_72_bpm() {
        let (worker, mut progress) = spawn(Config::default());
        let info = worker.initialize(ten_seconds()).await.unwrap();
        assert_eq!(info.target_count, 300);

        for sample in tone(72.0, 10.0, 30.0, 2.0) {
            worker.submit_frame(FrameInput::Sample(sample)).await.unwrap();
        }
        let result = worker.calculate_vital_signs().await.unwrap();
        assert!(
            (67.0..=77.0).contains(&result.heart_rate_bpm),
            "heart rate {}",
            result.heart_rate_bpm
        );
        assert!(result.confidence_pct > 0.0);
        assert!((85.0..=100.0).contains(&result.spo2_pct));

        let phases: Vec<ProgressPhase> = drain(&mut progress)
            .into_iter()
            .map(|p| p.progress.phase)
            .collect();
        assert_eq!(phases.first(), Some(&ProgressPhase::Initialized));
        assert_eq!(
            phases.iter().filter(|p| **p == ProgressPhase::Capturing).count(),
            9
        );
        assert!(phases.contains(&ProgressPhase::CaptureComplete));
        assert_eq!(
            &phases[phases.len() - 2..],
            &[ProgressPhase::Analyzing, ProgressPhase::Complete]
        );
    }

    #[tokio::test]
    async fn frame_acks_are_ordered() {
        let (worker, _progress) = spawn(Config::default());
        worker.initialize(ten_seconds()).await.unwrap();
        for (i, sample) in tone(72.0, 1.0, 30.0, 2.0).into_iter().enumerate() {
            let ack = worker.process_frame(FrameInput::Sample(sample)).await.unwrap();
            assert!(ack.accepted);
            assert_eq!(ack.frame_count as usize, i + 1);
            assert_eq!(ack.phase, SessionPhase::Capturing);
        }
    }

    #[tokio::test]
    async fn five_samples_report_insufficient_data() {
        let (worker, mut progress) = spawn(Config::default());
        worker.initialize(ten_seconds()).await.unwrap();
        for sample in tone(72.0, 5.0 / 30.0, 30.0, 2.0) {
            worker.process_frame(FrameInput::Sample(sample)).await.unwrap();
        }
        let result = worker.calculate_vital_signs().await.unwrap();
        assert_eq!(result.heart_rate_bpm, 72.0);
        assert_eq!(result.sample_count, 5);
        assert!(drain(&mut progress)
            .iter()
            .any(|p| p.progress.phase == ProgressPhase::InsufficientData));
    }

    #[tokio::test]
    async fn errors_reach_the_caller() {
        let (worker, _progress) = spawn(Config::default());
        assert!(matches!(
            worker.calculate_vital_signs().await,
            Err(WorkerError::InvalidState {
                phase: SessionPhase::Idle,
                ..
            })
        ));
        worker.initialize(ten_seconds()).await.unwrap();
        assert_eq!(
            worker.initialize(ten_seconds()).await,
            Err(WorkerError::SessionAlreadyActive)
        );
        assert_eq!(
            worker
                .process_frame(FrameInput::NoFace { timestamp: 1 })
                .await,
            Err(WorkerError::NoFaceDetected)
        );
        worker.initialize(ten_seconds()).await.unwrap();
    }

    #[tokio::test]
    async fn oversized_capture_rejected_and_worker_survives() {
        let (worker, _progress) = spawn(Config::default());
        let err = worker
            .initialize(InitializeParams {
                duration_secs: Some(30.0),
                sample_rate_hz: Some(1e18),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidRequest(_)));
        assert_eq!(
            worker.reset().await.unwrap().previous_phase,
            SessionPhase::Idle
        );
        worker.initialize(ten_seconds()).await.unwrap();
    }

    #[tokio::test]
    async fn reset_cancels_running_analysis() {
        let (worker, _progress) = spawn(Config::default());
        worker.initialize(ten_seconds()).await.unwrap();
        for sample in tone(72.0, 10.0, 30.0, 2.0) {
            worker.submit_frame(FrameInput::Sample(sample)).await.unwrap();
        }

        // Both queued before the worker picks up the calculation.
        let calc = worker
            .enqueue(100, Command::CalculateVitalSigns)
            .await
            .unwrap();
        let reset = worker.enqueue(101, Command::Reset).await.unwrap();

        assert_eq!(calc.wait().await, Err(WorkerError::Cancelled));
        match reset.wait().await.unwrap() {
            Reply::Reset(ack) => {
                assert_eq!(ack.previous_phase, SessionPhase::Analyzing);
                assert_eq!(ack.discarded_samples, 300);
            }
            other => panic!("unexpected reply {other:?}"),
        }

        // Worker is reusable afterwards.
        worker.initialize(ten_seconds()).await.unwrap();
    }

    #[tokio::test]
    async fn second_calculation_rejected_while_running() {
        let (worker, _progress) = spawn(Config::default());
        worker.initialize(ten_seconds()).await.unwrap();
        for sample in tone(72.0, 10.0, 30.0, 2.0) {
            worker.submit_frame(FrameInput::Sample(sample)).await.unwrap();
        }
        let first = worker.enqueue(200, Command::CalculateVitalSigns).await.unwrap();
        let second = worker.enqueue(201, Command::CalculateVitalSigns).await.unwrap();

        assert!(matches!(
            second.wait().await,
            Err(WorkerError::InvalidState {
                phase: SessionPhase::Analyzing,
                ..
            })
        ));
        assert!(matches!(first.wait().await, Ok(Reply::VitalSigns(_))));
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let (worker, _progress) = spawn(Config::default());
        let first = worker.reset().await.unwrap();
        let second = worker.reset().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.previous_phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        // A queue nobody reads stands in for a stuck worker.
        let (tx, _inbox) = mpsc::channel(4);
        let worker = WorkerHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            timeout: Duration::from_secs(60),
        }
        .with_timeout(Duration::from_millis(50));

        let err = worker.reset().await.unwrap_err();
        assert_eq!(err, WorkerError::Timeout(Duration::from_millis(50)));
        assert!(err.requires_reset());
    }

    #[tokio::test]
    async fn closed_worker_reported() {
        let (tx, inbox) = mpsc::channel(4);
        drop(inbox);
        let worker = WorkerHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(
            worker
                .submit_frame(FrameInput::Sample(Sample::new(1.0, 1.0, 1.0, 0)))
                .await,
            Err(WorkerError::WorkerClosed)
        );
    }
}
