//! Supervisor and manager configuration types
//!
//! Configuration is a JSON named-section document: one top-level object
//! keyed by supervisor name, each section carrying the transport
//! endpoints, dataflow selection, and the per-manager worker descriptors.
//! It is read once at construction and immutable thereafter.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape of the payloads moving through a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataflowType {
    /// Raw bytes parsed into structured records
    Binary,
    /// UTF-8 text
    #[serde(rename = "string")]
    Text,
    /// Filenames whose contents are newline-separated records
    Filename,
}

/// Transport pattern of a socket pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    /// Pull side binds, push side connects
    PushPull,
    /// Publisher binds, subscribers connect with an empty topic filter
    PubSub,
    /// No ingress sockets; items are injected programmatically
    Custom,
}

/// Endpoint spelling that disables an egress lane.
pub const DISABLED_ENDPOINT: &str = "none";

/// Per-manager configuration: egress lanes and the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    /// Manager kind label (used in its global name)
    pub name: String,
    /// Transport pattern of the result sockets
    pub result_socket_type: SocketMode,
    /// Encoding applied by the result pump
    pub result_dataflow_type: DataflowType,
    /// Low-priority egress endpoint, or `"none"` to disable the lane
    pub result_lp_socket: String,
    /// High-priority egress endpoint, or `"none"` to disable the lane
    pub result_hp_socket: String,
    /// Fixed worker pool size
    pub num_workers: usize,
    /// Registered processor name instantiated for each worker
    pub worker_class: String,
    /// Input-queue depth that triggers a warning alarm
    #[serde(default)]
    pub alarm_warning_depth: Option<usize>,
    /// Input-queue depth that triggers a critical alarm
    #[serde(default)]
    pub alarm_critical_depth: Option<usize>,
}

impl ManagerConfig {
    /// True when the given lane has an egress endpoint configured.
    pub fn lane_enabled(&self, high_priority: bool) -> bool {
        let endpoint = if high_priority {
            &self.result_hp_socket
        } else {
            &self.result_lp_socket
        };
        endpoint != DISABLED_ENDPOINT
    }
}

fn default_logs_path() -> String {
    "logs".to_string()
}

/// One supervisor section of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Supervisor name (the section key; filled in by the loader)
    #[serde(default)]
    pub name: String,
    /// Worker execution model label (informational)
    pub processing_type: String,
    /// Shape of ingress payloads
    pub dataflow_type: DataflowType,
    /// Transport pattern of the ingress sockets
    pub datasocket_type: SocketMode,
    /// Low-priority ingress endpoint
    pub data_lp_socket: String,
    /// High-priority ingress endpoint
    pub data_hp_socket: String,
    /// Command subscriber endpoint
    pub command_socket: String,
    /// Monitoring push endpoint
    pub monitoring_socket: String,
    /// Directory receiving `Supervisor-<name>.log`
    #[serde(default = "default_logs_path")]
    pub logs_path: String,
    /// Worker managers, all of which receive every ingress item
    pub managers: Vec<ManagerConfig>,
}

impl SupervisorConfig {
    /// Validate the section after loading.
    pub fn validate(&self) -> Result<()> {
        if self.managers.is_empty() {
            return Err(PipelineError::Config(format!(
                "supervisor {}: at least one manager is required",
                self.name
            )));
        }
        for manager in &self.managers {
            if manager.num_workers == 0 {
                return Err(PipelineError::Config(format!(
                    "manager {}: num_workers must be at least 1",
                    manager.name
                )));
            }
        }
        Ok(())
    }
}

/// Load the named section from a configuration document on disk.
pub fn load_config(path: impl AsRef<Path>, name: &str) -> Result<SupervisorConfig> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    parse_config(&raw, name)
}

/// Parse the named section from configuration document text.
pub fn parse_config(raw: &str, name: &str) -> Result<SupervisorConfig> {
    let document: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| PipelineError::Config(format!("configuration is not valid JSON: {e}")))?;
    let section = document
        .get(name)
        .ok_or_else(|| PipelineError::Config(format!("no configuration section named {name}")))?;
    let mut config: SupervisorConfig = serde_json::from_value(section.clone())
        .map_err(|e| PipelineError::Config(format!("section {name}: {e}")))?;
    config.name = name.to_string();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> String {
        r#"{
            "ADP1": {
                "processing_type": "thread",
                "dataflow_type": "string",
                "datasocket_type": "pushpull",
                "data_lp_socket": "tcp://127.0.0.1:5555",
                "data_hp_socket": "tcp://127.0.0.1:5556",
                "command_socket": "tcp://127.0.0.1:5557",
                "monitoring_socket": "tcp://127.0.0.1:5558",
                "logs_path": "/tmp/adp-logs",
                "managers": [
                    {
                        "name": "Generic",
                        "result_socket_type": "pushpull",
                        "result_dataflow_type": "string",
                        "result_lp_socket": "tcp://127.0.0.1:5559",
                        "result_hp_socket": "none",
                        "num_workers": 4,
                        "worker_class": "echo"
                    }
                ]
            }
        }"#
        .to_string()
    }

    #[test]
    fn test_parse_named_section() {
        let config = parse_config(&sample_document(), "ADP1").unwrap();
        assert_eq!(config.name, "ADP1");
        assert_eq!(config.dataflow_type, DataflowType::Text);
        assert_eq!(config.datasocket_type, SocketMode::PushPull);
        assert_eq!(config.logs_path, "/tmp/adp-logs");
        assert_eq!(config.managers.len(), 1);
        assert_eq!(config.managers[0].num_workers, 4);
        assert_eq!(config.managers[0].worker_class, "echo");
    }

    #[test]
    fn test_parse_missing_section() {
        let err = parse_config(&sample_document(), "ADP2").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("ADP2"));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = parse_config("{oops", "ADP1").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_dataflow_type_wire_spelling() {
        assert_eq!(
            serde_json::from_str::<DataflowType>("\"string\"").unwrap(),
            DataflowType::Text
        );
        assert_eq!(
            serde_json::from_str::<DataflowType>("\"binary\"").unwrap(),
            DataflowType::Binary
        );
        assert_eq!(
            serde_json::from_str::<DataflowType>("\"filename\"").unwrap(),
            DataflowType::Filename
        );
    }

    #[test]
    fn test_socket_mode_wire_spelling() {
        assert_eq!(
            serde_json::from_str::<SocketMode>("\"pushpull\"").unwrap(),
            SocketMode::PushPull
        );
        assert_eq!(
            serde_json::from_str::<SocketMode>("\"pubsub\"").unwrap(),
            SocketMode::PubSub
        );
        assert_eq!(
            serde_json::from_str::<SocketMode>("\"custom\"").unwrap(),
            SocketMode::Custom
        );
    }

    #[test]
    fn test_lane_enabled() {
        let config = parse_config(&sample_document(), "ADP1").unwrap();
        let manager = &config.managers[0];
        assert!(manager.lane_enabled(false));
        assert!(!manager.lane_enabled(true));
    }

    #[test]
    fn test_validate_rejects_empty_managers() {
        let mut document: serde_json::Value =
            serde_json::from_str(&sample_document()).unwrap();
        document["ADP1"]["managers"] = serde_json::json!([]);
        let err = parse_config(&document.to_string(), "ADP1").unwrap_err();
        assert!(err.to_string().contains("at least one manager"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut document: serde_json::Value =
            serde_json::from_str(&sample_document()).unwrap();
        document["ADP1"]["managers"][0]["num_workers"] = serde_json::json!(0);
        let err = parse_config(&document.to_string(), "ADP1").unwrap_err();
        assert!(err.to_string().contains("num_workers"));
    }

    #[test]
    fn test_logs_path_defaults() {
        let mut document: serde_json::Value =
            serde_json::from_str(&sample_document()).unwrap();
        document["ADP1"]
            .as_object_mut()
            .unwrap()
            .remove("logs_path");
        let config = parse_config(&document.to_string(), "ADP1").unwrap();
        assert_eq!(config.logs_path, "logs");
    }

    #[test]
    fn test_load_config_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, sample_document()).unwrap();
        let config = load_config(&path, "ADP1").unwrap();
        assert_eq!(config.name, "ADP1");
    }

    #[test]
    fn test_config_roundtrip() {
        let config = parse_config(&sample_document(), "ADP1").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SupervisorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
