//! Monitoring channel: alarms, logs, info and status snapshots
//!
//! All telemetry leaves the process through one push socket. A single
//! owner task serializes and sends; [`MonitoringEmitter`] is the
//! cloneable handle the rest of the pipeline fires messages into.
//! Emission is best-effort: when the channel is saturated the message is
//! dropped with a warning rather than stalling the data path.

use crate::transport;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Header `type` code of alarm messages.
pub const TYPE_ALARM: u8 = 2;
/// Header `type` code of log messages.
pub const TYPE_LOG: u8 = 4;
/// Header `type` code of info messages.
pub const TYPE_INFO: u8 = 5;

/// Messages buffered towards the monitoring socket owner.
const EMITTER_DEPTH: usize = 256;

/// Common header of every monitoring message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringHeader {
    #[serde(rename = "type")]
    pub kind: u8,
    pub subtype: String,
    /// Epoch seconds
    pub time: f64,
    pub pidsource: String,
    pub pidtarget: String,
    pub priority: String,
}

/// One monitoring message: header plus a message-specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringMessage {
    pub header: MonitoringHeader,
    pub body: serde_json::Value,
}

fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl MonitoringMessage {
    fn new(
        kind: u8,
        subtype: &str,
        body: serde_json::Value,
        pidsource: &str,
        pidtarget: &str,
        priority: &str,
    ) -> Self {
        Self {
            header: MonitoringHeader {
                kind,
                subtype: subtype.to_string(),
                time: epoch_seconds(),
                pidsource: pidsource.to_string(),
                pidtarget: pidtarget.to_string(),
                priority: priority.to_string(),
            },
            body,
        }
    }

    fn level_body(level: i32, code: i32, message: &str) -> serde_json::Value {
        json!({ "level": level, "code": code, "message": message })
    }

    /// Alarm message (type 2), broadcast to every observer.
    pub fn alarm(level: i32, message: &str, pidsource: &str, code: i32, priority: &str) -> Self {
        Self::new(
            TYPE_ALARM,
            "alarm",
            Self::level_body(level, code, message),
            pidsource,
            "*",
            priority,
        )
    }

    /// Log message (type 4), broadcast to every observer.
    pub fn log(level: i32, message: &str, pidsource: &str, code: i32, priority: &str) -> Self {
        Self::new(
            TYPE_LOG,
            "log",
            Self::level_body(level, code, message),
            pidsource,
            "*",
            priority,
        )
    }

    /// Info message (type 5), broadcast to every observer.
    pub fn info(level: i32, message: &str, pidsource: &str, code: i32, priority: &str) -> Self {
        Self::new(
            TYPE_INFO,
            "info",
            Self::level_body(level, code, message),
            pidsource,
            "*",
            priority,
        )
    }

    /// Status snapshot (type 5, subtype `status`) addressed to the
    /// requester of a `getstatus` command.
    pub fn status(snapshot: serde_json::Value, pidsource: &str, pidtarget: &str) -> Self {
        Self::new(TYPE_INFO, "status", snapshot, pidsource, pidtarget, "Low")
    }
}

/// Cloneable handle emitting monitoring messages.
#[derive(Clone)]
pub struct MonitoringEmitter {
    tx: mpsc::Sender<MonitoringMessage>,
}

impl MonitoringEmitter {
    /// Spawn the socket owner task and return the emitter handle.
    pub fn start(sender: transport::Sender, cancel: &CancellationToken) -> MonitoringEmitter {
        let (tx, mut rx) = mpsc::channel::<MonitoringMessage>(EMITTER_DEPTH);
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => match serde_json::to_vec(&message) {
                            Ok(payload) => {
                                if let Err(e) = sender.send(Bytes::from(payload)).await {
                                    error!("monitoring send failed: {e}");
                                }
                            }
                            Err(e) => error!("monitoring message not serializable: {e}"),
                        },
                        None => break,
                    },
                }
            }
        });
        MonitoringEmitter { tx }
    }

    /// Emitter whose messages go nowhere. Used by tests and by the
    /// pieces constructed before the monitoring socket exists.
    pub fn disconnected() -> MonitoringEmitter {
        let (tx, mut rx) = mpsc::channel::<MonitoringMessage>(EMITTER_DEPTH);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        MonitoringEmitter { tx }
    }

    /// Fire one message, dropping it when the channel is saturated.
    pub fn emit(&self, message: MonitoringMessage) {
        if let Err(e) = self.tx.try_send(message) {
            warn!("monitoring message dropped: {e}");
        }
    }

    pub fn send_alarm(&self, level: i32, message: &str, pidsource: &str, code: i32, priority: &str) {
        self.emit(MonitoringMessage::alarm(level, message, pidsource, code, priority));
    }

    pub fn send_log(&self, level: i32, message: &str, pidsource: &str, code: i32, priority: &str) {
        self.emit(MonitoringMessage::log(level, message, pidsource, code, priority));
    }

    pub fn send_info(&self, level: i32, message: &str, pidsource: &str, code: i32, priority: &str) {
        self.emit(MonitoringMessage::info(level, message, pidsource, code, priority));
    }

    pub fn send_status(&self, snapshot: serde_json::Value, pidsource: &str, pidtarget: &str) {
        self.emit(MonitoringMessage::status(snapshot, pidsource, pidtarget));
    }
}

/// Input-queue depth thresholds that raise alarms from a manager's
/// monitoring probe. A threshold is reported once per crossing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmThresholds {
    /// Depth that raises a level-1 (warning) alarm
    pub warning: Option<usize>,
    /// Depth that raises a level-2 (critical) alarm
    pub critical: Option<usize>,
}

impl AlarmThresholds {
    /// Alarm level for the given queue depth: 2 critical, 1 warning,
    /// 0 nominal.
    pub fn level_for(&self, depth: usize) -> i32 {
        match (self.critical, self.warning) {
            (Some(critical), _) if depth >= critical => 2,
            (_, Some(warning)) if depth >= warning => 1,
            _ => 0,
        }
    }

    /// True when no thresholds are configured.
    pub fn is_disabled(&self) -> bool {
        self.warning.is_none() && self.critical.is_none()
    }
}
