//! Data items flowing through the pipeline
//!
//! An [`Item`] is the opaque payload moved from ingress to egress. Its
//! concrete shape depends on the configured dataflow type: binary and
//! filename flows carry parsed structured records, string flows carry
//! UTF-8 text. The record codec is `serde_json` at both ends.

use crate::config::DataflowType;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Priority lane of an item. High is strictly preferred over Low, both at
/// worker pop and at the result pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    High,
}

impl Priority {
    /// Wire spelling used in monitoring headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::High => "High",
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Parsed structured record (binary and filename flows)
    Record(serde_json::Value),
    /// UTF-8 text (string flows)
    Text(String),
}

impl Item {
    /// Decode an ingress payload according to the dataflow type.
    ///
    /// Binary payloads are parsed into a structured record; string
    /// payloads are interpreted as UTF-8 text. Filename payloads are
    /// handled by the ingress listener (the file contents, not the
    /// filename, become items) and never reach this function.
    pub fn decode(payload: &[u8], flow: DataflowType) -> Result<Item> {
        match flow {
            DataflowType::Binary => {
                let record = serde_json::from_slice(payload)
                    .map_err(|e| PipelineError::Decode(format!("bad record payload: {e}")))?;
                Ok(Item::Record(record))
            }
            DataflowType::Text | DataflowType::Filename => {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| PipelineError::Decode(format!("payload is not UTF-8: {e}")))?;
                Ok(Item::Text(text.to_string()))
            }
        }
    }

    /// Encode this item for an egress lane according to the manager's
    /// result dataflow type.
    ///
    /// Text and filename lanes carry the item as raw UTF-8 bytes; a
    /// structured record only qualifies when it is a JSON string. Binary
    /// lanes serialize the item through the record codec.
    pub fn encode(&self, flow: DataflowType) -> Result<Vec<u8>> {
        match flow {
            DataflowType::Text | DataflowType::Filename => match self {
                Item::Text(s) => Ok(s.clone().into_bytes()),
                Item::Record(serde_json::Value::String(s)) => Ok(s.clone().into_bytes()),
                Item::Record(other) => Err(PipelineError::Encode(format!(
                    "record is not text: {other}"
                ))),
            },
            DataflowType::Binary => match self {
                Item::Record(record) => Ok(serde_json::to_vec(record)?),
                Item::Text(s) => Ok(serde_json::to_vec(&serde_json::Value::String(s.clone()))?),
            },
        }
    }

    /// View the item as a structured record, wrapping text in a JSON
    /// string. Used when handing items to processors.
    pub fn as_value(&self) -> serde_json::Value {
        match self {
            Item::Record(v) => v.clone(),
            Item::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}
