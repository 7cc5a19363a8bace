//! Wire format of the worker boundary.
//!
//! Every message is one JSON object. Requests:
//!
//! ```text
//! { "id": 7, "command": "processFrame", "data": { "r": 141.2, "g": 96.8, "b": 83.0, "timestamp": 1708300000033 } }
//! ```
//!
//! Responses resolve a request, progress notifications do not:
//!
//! ```text
//! { "id": 7, "success": true, "result": { "accepted": true, "frame_count": 2, "phase": "capturing" } }
//! { "id": 3, "progress": { "phase": "capturing", "frame_count": 30, "message": "30/300 frames" } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sample::{Sample, VitalSignsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    Initialize,
    ProcessFrame,
    CalculateVitalSigns,
    Reset,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Initialize => "initialize",
            CommandKind::ProcessFrame => "processFrame",
            CommandKind::CalculateVitalSigns => "calculateVitalSigns",
            CommandKind::Reset => "reset",
        }
    }
}

/// A request as it appears on the wire, before its payload is typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Typed request payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize(InitializeParams),
    ProcessFrame(FrameInput),
    CalculateVitalSigns,
    Reset,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Initialize(_) => CommandKind::Initialize,
            Command::ProcessFrame(_) => CommandKind::ProcessFrame,
            Command::CalculateVitalSigns => CommandKind::CalculateVitalSigns,
            Command::Reset => CommandKind::Reset,
        }
    }
}

/// Optional overrides for a new capture session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<f64>,
}

/// What the frame source reports for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameInput {
    Sample(Sample),
    /// The face detector found no face in this frame.
    NoFace { timestamp: u64 },
    /// The camera stream failed mid-capture.
    StreamFailure { reason: String },
}

#[derive(Deserialize)]
struct RawFrame {
    r: Option<f64>,
    g: Option<f64>,
    b: Option<f64>,
    timestamp: Option<u64>,
    #[serde(default)]
    no_face: bool,
    stream_error: Option<String>,
}

impl TryFrom<RawFrame> for FrameInput {
    type Error = String;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        if let Some(reason) = raw.stream_error {
            return Ok(FrameInput::StreamFailure { reason });
        }
        if raw.no_face {
            return Ok(FrameInput::NoFace {
                timestamp: raw.timestamp.unwrap_or_default(),
            });
        }
        match (raw.r, raw.g, raw.b, raw.timestamp) {
            (Some(r), Some(g), Some(b), Some(timestamp)) => {
                Ok(FrameInput::Sample(Sample::new(r, g, b, timestamp)))
            }
            _ => Err("frame needs r, g, b and timestamp".into()),
        }
    }
}

impl RequestEnvelope {
    /// Decode one JSON request line.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line).map_err(|e| ProtocolError::Json {
            id: peek_id(line),
            reason: e.to_string(),
        })
    }

    /// Type the payload according to `command`.
    pub fn into_command(self) -> Result<Command, ProtocolError> {
        let kind = self.command;
        let invalid = |reason: String| ProtocolError::InvalidPayload {
            id: self.id,
            command: kind.as_str(),
            reason,
        };
        match kind {
            CommandKind::Initialize => {
                if self.data.is_null() {
                    return Ok(Command::Initialize(InitializeParams::default()));
                }
                serde_json::from_value(self.data.clone())
                    .map(Command::Initialize)
                    .map_err(|e| invalid(e.to_string()))
            }
            CommandKind::ProcessFrame => {
                if self.data.is_null() {
                    return Err(ProtocolError::MissingData {
                        id: self.id,
                        command: kind.as_str(),
                    });
                }
                let raw: RawFrame =
                    serde_json::from_value(self.data.clone()).map_err(|e| invalid(e.to_string()))?;
                FrameInput::try_from(raw)
                    .map(Command::ProcessFrame)
                    .map_err(invalid)
            }
            CommandKind::CalculateVitalSigns => Ok(Command::CalculateVitalSigns),
            CommandKind::Reset => Ok(Command::Reset),
        }
    }
}

fn peek_id(line: &str) -> Option<u64> {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
}

/// Lifecycle phase of the worker's capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Preparing,
    Capturing,
    Analyzing,
    Complete,
    Error,
    Cancelled,
}

impl SessionPhase {
    /// Preparing, Capturing or Analyzing.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionPhase::Preparing | SessionPhase::Capturing | SessionPhase::Analyzing
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Preparing => "preparing",
            SessionPhase::Capturing => "capturing",
            SessionPhase::Analyzing => "analyzing",
            SessionPhase::Complete => "complete",
            SessionPhase::Error => "error",
            SessionPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Reply to `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: u64,
    pub sample_rate_hz: f64,
    pub duration_secs: f64,
    pub target_count: u32,
}

/// Reply to `processFrame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAck {
    /// False when the frame arrived after the capture closed.
    pub accepted: bool,
    pub frame_count: u32,
    pub phase: SessionPhase,
}

/// Reply to `reset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetAck {
    pub previous_phase: SessionPhase,
    pub discarded_samples: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Session(SessionInfo),
    Frame(FrameAck),
    VitalSigns(VitalSignsResult),
    Reset(ResetAck),
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(id: u64, result: Reply) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Initialized,
    Capturing,
    CaptureComplete,
    Analyzing,
    InsufficientData,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: ProgressPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u32>,
    pub message: String,
}

/// Out-of-band notification tied to the request that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    pub id: u64,
    pub progress: Progress,
}

/// Anything the worker writes back across the boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Response(ResponseEnvelope),
    Progress(ProgressEnvelope),
}

impl Outbound {
    /// Serialize as a single JSON line (no trailing newline).
    pub fn encode(&self) -> String {
        // Only string keys and finite-or-null floats are produced, so this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"encode failed: {e}"}}"#)
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: {reason}")]
    Json { id: Option<u64>, reason: String },
    #[error("{command} requires a data payload")]
    MissingData { id: u64, command: &'static str },
    #[error("invalid {command} payload: {reason}")]
    InvalidPayload {
        id: u64,
        command: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    /// Correlation id of the offending request, when it could be read.
    pub fn id(&self) -> Option<u64> {
        match self {
            ProtocolError::Json { id, .. } => *id,
            ProtocolError::MissingData { id, .. } | ProtocolError::InvalidPayload { id, .. } => {
                Some(*id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> Result<Command, ProtocolError> {
        RequestEnvelope::decode(line)?.into_command()
    }

    #[test]
    fn decode_sample_frame() {
        let cmd = decode(
            r#"{"id":4,"command":"processFrame","data":{"r":140.5,"g":98.25,"b":80.0,"timestamp":1708300000033}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::ProcessFrame(FrameInput::Sample(Sample::new(
                140.5,
                98.25,
                80.0,
                1708300000033
            )))
        );
    }

    #[test]
    fn decode_no_face_and_stream_error() {
        let no_face =
            decode(r#"{"id":5,"command":"processFrame","data":{"no_face":true,"timestamp":9}}"#)
                .unwrap();
        assert_eq!(no_face, Command::ProcessFrame(FrameInput::NoFace { timestamp: 9 }));

        let failure = decode(
            r#"{"id":6,"command":"processFrame","data":{"stream_error":"camera unplugged"}}"#,
        )
        .unwrap();
        assert_eq!(
            failure,
            Command::ProcessFrame(FrameInput::StreamFailure {
                reason: "camera unplugged".into()
            })
        );
    }

    #[test]
    fn initialize_without_data_uses_defaults() {
        let cmd = decode(r#"{"id":1,"command":"initialize"}"#).unwrap();
        assert_eq!(cmd, Command::Initialize(InitializeParams::default()));

        let cmd = decode(r#"{"id":1,"command":"initialize","data":{"duration_secs":20}}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Initialize(InitializeParams {
                duration_secs: Some(20.0),
                sample_rate_hz: None,
            })
        );
    }

    #[test]
    fn incomplete_frame_is_invalid_payload() {
        let err = decode(r#"{"id":8,"command":"processFrame","data":{"r":1.0,"g":2.0}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { id: 8, .. }));

        let err = decode(r#"{"id":9,"command":"processFrame"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingData { id: 9, .. }));
    }

    #[test]
    fn unknown_command_keeps_id() {
        let err = decode(r#"{"id":12,"command":"selfDestruct"}"#).unwrap_err();
        assert_eq!(err.id(), Some(12));

        let err = decode("not json").unwrap_err();
        assert_eq!(err.id(), None);
    }

    #[test]
    fn response_shapes() {
        let ok = Outbound::Response(ResponseEnvelope::ok(
            3,
            Reply::Frame(FrameAck {
                accepted: true,
                frame_count: 2,
                phase: SessionPhase::Capturing,
            }),
        ));
        let json: Value = serde_json::from_str(&ok.encode()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["result"]["phase"], "capturing");
        assert!(json.get("error").is_none());

        let err = Outbound::Response(ResponseEnvelope::err(4, "session already active"));
        let json: Value = serde_json::from_str(&err.encode()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "session already active");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn progress_shape() {
        let msg = Outbound::Progress(ProgressEnvelope {
            id: 2,
            progress: Progress {
                phase: ProgressPhase::CaptureComplete,
                frame_count: Some(300),
                message: "capture complete".into(),
            },
        });
        let json: Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(json["id"], 2);
        assert_eq!(json["progress"]["phase"], "capture_complete");
        assert_eq!(json["progress"]["frame_count"], 300);
    }

    #[test]
    fn active_phases() {
        assert!(SessionPhase::Capturing.is_active());
        assert!(SessionPhase::Analyzing.is_active());
        assert!(!SessionPhase::Idle.is_active());
        assert!(!SessionPhase::Error.is_active());
        assert_eq!(SessionPhase::Cancelled.to_string(), "cancelled");
    }
}
