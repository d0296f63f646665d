//! Control-plane message model and lifecycle state machine types
//!
//! Commands arrive as structured records on the command subscriber
//! socket. OS signals are bridged into the same control channel, so the
//! state machine is the single consumer of one unified event stream —
//! no application logic runs on a signal stack and no process-wide
//! singleton is needed.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;

/// Header `type` code of command messages.
pub const TYPE_COMMAND: u8 = 0;
/// Header `type` code of worker-configuration messages.
pub const TYPE_CONFIG: u8 = 3;

/// Header of a control message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlHeader {
    #[serde(rename = "type")]
    pub kind: u8,
    pub subtype: String,
    #[serde(default)]
    pub time: Option<f64>,
    pub pidtarget: String,
    pub pidsource: String,
    #[serde(default)]
    pub priority: Option<String>,
}

/// One control message: header plus an optional body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    pub header: ControlHeader,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl ControlMessage {
    /// Build a command message (type 0) with the given subtype.
    pub fn command(subtype: &str, pidtarget: &str, pidsource: &str) -> Self {
        Self {
            header: ControlHeader {
                kind: TYPE_COMMAND,
                subtype: subtype.to_string(),
                time: None,
                pidtarget: pidtarget.to_string(),
                pidsource: pidsource.to_string(),
                priority: None,
            },
            body: None,
        }
    }

    /// Build a worker-configuration message (type 3).
    pub fn config(body: serde_json::Value, pidtarget: &str, pidsource: &str) -> Self {
        Self {
            header: ControlHeader {
                kind: TYPE_CONFIG,
                subtype: "config".to_string(),
                time: None,
                pidtarget: pidtarget.to_string(),
                pidsource: pidsource.to_string(),
                priority: None,
            },
            body: Some(body),
        }
    }

    /// Parse a control message off the wire.
    pub fn parse(payload: &[u8]) -> Result<ControlMessage> {
        serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Decode(format!("bad control message: {e}")))
    }

    /// True when this message is addressed to the given supervisor.
    pub fn targets(&self, name: &str) -> bool {
        let target = self.header.pidtarget.as_str();
        target == name || target == "all" || target == "*"
    }
}

/// Recognized command subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
    StartProcessing,
    StopProcessing,
    StartData,
    StopData,
    Reset,
    Shutdown,
    CleanedShutdown,
    GetStatus,
}

impl CommandKind {
    /// Map a wire subtype to a command; unknown subtypes yield `None`
    /// and are ignored by the state machine.
    pub fn from_subtype(subtype: &str) -> Option<CommandKind> {
        match subtype {
            "start" => Some(CommandKind::Start),
            "stop" => Some(CommandKind::Stop),
            "startprocessing" => Some(CommandKind::StartProcessing),
            "stopprocessing" => Some(CommandKind::StopProcessing),
            "startdata" => Some(CommandKind::StartData),
            "stopdata" => Some(CommandKind::StopData),
            "reset" => Some(CommandKind::Reset),
            "shutdown" => Some(CommandKind::Shutdown),
            "cleanedshutdown" => Some(CommandKind::CleanedShutdown),
            "getstatus" => Some(CommandKind::GetStatus),
            _ => None,
        }
    }
}

/// Events consumed by the supervisor state machine: control messages
/// and bridged OS signals.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// A message received on the command socket (or injected)
    Message(ControlMessage),
    /// SIGTERM: clean shutdown
    Terminate,
    /// SIGINT or any other trapped signal: immediate shutdown
    Interrupt,
}

/// Supervisor lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Initialised = 0,
    Waiting = 1,
    Processing = 2,
    EndingProcessing = 3,
    Shutdown = 4,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Initialised => "Initialised",
            Status::Waiting => "Waiting",
            Status::Processing => "Processing",
            Status::EndingProcessing => "EndingProcessing",
            Status::Shutdown => "Shutdown",
        }
    }

    fn from_u8(value: u8) -> Status {
        match value {
            0 => Status::Initialised,
            1 => Status::Waiting,
            2 => Status::Processing,
            3 => Status::EndingProcessing,
            _ => Status::Shutdown,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free status cell readable from any task. Writes happen only in
/// the state machine and the shutdown path.
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Bridge OS signals into the control channel. SIGTERM maps to a clean
/// shutdown; SIGINT and SIGHUP map to an immediate shutdown.
#[cfg(unix)]
pub fn spawn_signal_bridge(tx: mpsc::Sender<ControlEvent>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())
        .map_err(|e| PipelineError::Transport(format!("signal handler setup failed: {e}")))?;
    let mut int = signal(SignalKind::interrupt())
        .map_err(|e| PipelineError::Transport(format!("signal handler setup failed: {e}")))?;
    let mut hup = signal(SignalKind::hangup())
        .map_err(|e| PipelineError::Transport(format!("signal handler setup failed: {e}")))?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = term.recv() => ControlEvent::Terminate,
                _ = int.recv() => ControlEvent::Interrupt,
                _ = hup.recv() => ControlEvent::Interrupt,
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_signal_bridge(_tx: mpsc::Sender<ControlEvent>) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_message_shape() {
        let message = ControlMessage::command("start", "ADP1", "operator");
        assert_eq!(message.header.kind, TYPE_COMMAND);
        assert_eq!(message.header.subtype, "start");
        assert_eq!(message.header.pidtarget, "ADP1");
        assert_eq!(message.header.pidsource, "operator");
        assert!(message.body.is_none());
    }

    #[test]
    fn test_config_message_carries_body() {
        let body = serde_json::json!({"threshold": 5});
        let message = ControlMessage::config(body.clone(), "all", "operator");
        assert_eq!(message.header.kind, TYPE_CONFIG);
        assert_eq!(message.body, Some(body));
    }

    #[test]
    fn test_parse_roundtrip() {
        let message = ControlMessage::command("reset", "*", "op");
        let wire = serde_json::to_vec(&message).unwrap();
        assert_eq!(ControlMessage::parse(&wire).unwrap(), message);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = ControlMessage::parse(b"{nope").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_parse_accepts_minimal_header() {
        let wire = br#"{"header":{"type":0,"subtype":"stop","pidtarget":"all","pidsource":"x"}}"#;
        let message = ControlMessage::parse(wire).unwrap();
        assert_eq!(message.header.subtype, "stop");
        assert!(message.header.time.is_none());
        assert!(message.header.priority.is_none());
    }

    #[test]
    fn test_targets() {
        let message = ControlMessage::command("start", "ADP1", "op");
        assert!(message.targets("ADP1"));
        assert!(!message.targets("ADP2"));
        assert!(ControlMessage::command("start", "all", "op").targets("ADP2"));
        assert!(ControlMessage::command("start", "*", "op").targets("ADP2"));
    }

    #[test]
    fn test_command_kind_from_subtype() {
        assert_eq!(CommandKind::from_subtype("start"), Some(CommandKind::Start));
        assert_eq!(CommandKind::from_subtype("stop"), Some(CommandKind::Stop));
        assert_eq!(
            CommandKind::from_subtype("startprocessing"),
            Some(CommandKind::StartProcessing)
        );
        assert_eq!(
            CommandKind::from_subtype("stopprocessing"),
            Some(CommandKind::StopProcessing)
        );
        assert_eq!(
            CommandKind::from_subtype("startdata"),
            Some(CommandKind::StartData)
        );
        assert_eq!(
            CommandKind::from_subtype("stopdata"),
            Some(CommandKind::StopData)
        );
        assert_eq!(CommandKind::from_subtype("reset"), Some(CommandKind::Reset));
        assert_eq!(
            CommandKind::from_subtype("shutdown"),
            Some(CommandKind::Shutdown)
        );
        assert_eq!(
            CommandKind::from_subtype("cleanedshutdown"),
            Some(CommandKind::CleanedShutdown)
        );
        assert_eq!(
            CommandKind::from_subtype("getstatus"),
            Some(CommandKind::GetStatus)
        );
    }

    #[test]
    fn test_command_kind_unknown_subtype() {
        assert_eq!(CommandKind::from_subtype("foo"), None);
        assert_eq!(CommandKind::from_subtype(""), None);
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(Status::Initialised.as_str(), "Initialised");
        assert_eq!(Status::Waiting.as_str(), "Waiting");
        assert_eq!(Status::Processing.as_str(), "Processing");
        assert_eq!(Status::EndingProcessing.as_str(), "EndingProcessing");
        assert_eq!(Status::Shutdown.as_str(), "Shutdown");
    }

    #[test]
    fn test_status_cell() {
        let cell = StatusCell::new(Status::Initialised);
        assert_eq!(cell.get(), Status::Initialised);
        cell.set(Status::Processing);
        assert_eq!(cell.get(), Status::Processing);
        cell.set(Status::Shutdown);
        assert_eq!(cell.get(), Status::Shutdown);
    }

    #[tokio::test]
    async fn test_signal_bridge_setup() {
        let (tx, _rx) = mpsc::channel(4);
        spawn_signal_bridge(tx).unwrap();
    }
}
