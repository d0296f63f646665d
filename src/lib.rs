//! # daqpipe
//!
//! Supervised worker pipeline for real-time data acquisition and processing.
//!
//! A [`Supervisor`] connects two priority-paired ingress sockets to a set
//! of [`WorkerManager`]s, each owning four FIFO queues and a fixed pool
//! of worker tasks, and drains every manager's result queues to its
//! egress sockets. A command subscriber plus a signal bridge drive the
//! lifecycle state machine; alarms, logs and info messages leave through
//! a single monitoring socket.
//!
//! ## Features
//!
//! - **Priority lanes**: high-priority items are strictly preferred over
//!   low-priority ones, at worker pop and at the result pump
//! - **Fan-out**: every ingress item is replicated to every manager
//! - **Three dataflow modes**: binary records, UTF-8 strings, or
//!   filenames expanded line-by-line into records
//! - **Pluggable computation**: workers invoke a [`Processor`]
//!   registered under the configured worker class
//! - **Clean shutdown**: `cleanedshutdown` (or SIGTERM) drains every
//!   queue before stopping the workers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use daqpipe::{load_config, ProcessorRegistry, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> daqpipe::Result<()> {
//!     let config = load_config("pipeline.json", "ADP1")?;
//!     let registry = ProcessorRegistry::with_defaults();
//!
//!     let supervisor = Supervisor::new(config, &registry).await?;
//!     supervisor.install_signal_bridge()?;
//!     supervisor.start().await?;
//!
//!     // Runs until a shutdown command or signal arrives
//!     supervisor.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//!
//! | Status | Meaning |
//! |--------|---------|
//! | Initialised | sockets bound/connected, no tasks running |
//! | Waiting | tasks running, ingress paused, workers idle |
//! | Processing | ingress open, workers active |
//! | EndingProcessing | draining queues for a clean shutdown |
//! | Shutdown | terminal |

pub mod command;
pub mod config;
pub mod error;
pub mod ingress;
pub mod item;
pub mod logging;
pub mod manager;
pub mod monitoring;
pub mod queue;
pub mod supervisor;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod transport;
pub mod worker;

// Re-export main types
pub use command::{CommandKind, ControlEvent, ControlMessage, Status};
pub use config::{
    load_config, parse_config, DataflowType, ManagerConfig, SocketMode, SupervisorConfig,
};
pub use error::{PipelineError, Result};
pub use item::{Item, Priority};
pub use logging::{init_logging, LoggingGuard};
pub use manager::WorkerManager;
pub use monitoring::{AlarmThresholds, MonitoringEmitter, MonitoringMessage};
pub use queue::ItemQueue;
pub use supervisor::Supervisor;
pub use transport::{Endpoint, Receiver, Sender};
pub use worker::{EchoProcessor, Processor, ProcessorRegistry, StampProcessor};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_are_usable() {
        let item = Item::Text("x".to_string());
        assert_eq!(item, Item::Text("x".to_string()));
        assert_eq!(Priority::High.as_str(), "High");
        assert_eq!(Status::Waiting.as_str(), "Waiting");
    }

    #[test]
    fn test_registry_default_classes() {
        let registry = ProcessorRegistry::with_defaults();
        assert!(registry.create("echo").is_ok());
        assert!(registry.create("stamp").is_ok());
    }

    #[test]
    fn test_endpoint_reexport() {
        assert!(Endpoint::parse("inproc://lib-test").is_ok());
    }
}
