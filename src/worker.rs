//! Worker computation boundary and the per-worker loop
//!
//! The concrete computation is externalized behind the [`Processor`]
//! trait: one instance per worker, created from the registry by the
//! configured `worker_class` name. The worker loop pops one item at a
//! time — high priority strictly before low — invokes the processor
//! exactly once per item, and pushes the output to the matching result
//! queue. Processor failures are caught at the worker boundary, logged,
//! and the worker moves on to the next item.

use crate::error::{PipelineError, Result};
use crate::item::{Item, Priority};
use crate::queue::ItemQueue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Pause while processing is disabled.
const IDLE_PAUSE: Duration = Duration::from_millis(10);

/// Pause when both input queues are empty.
const POLL_PAUSE: Duration = Duration::from_millis(1);

/// The externalized worker computation.
///
/// Implementations must not touch supervisor state: one item in, one
/// item out, and reconfiguration through `configure`. Processors may
/// block or sleep inside `process`.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Apply a configuration message forwarded from the command channel.
    fn configure(&self, _configuration: &serde_json::Value) {}

    /// Process one item of the given priority, producing one output item.
    async fn process(&self, item: Item, priority: Priority) -> Result<Item>;
}

impl std::fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Processor")
    }
}

/// Identity processor: every item passes through unchanged.
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn process(&self, item: Item, _priority: Priority) -> Result<Item> {
        Ok(item)
    }
}

/// Processor that wraps each item in a record carrying the item payload
/// and the priority lane it was observed on.
pub struct StampProcessor;

#[async_trait]
impl Processor for StampProcessor {
    async fn process(&self, item: Item, priority: Priority) -> Result<Item> {
        Ok(Item::Record(serde_json::json!({
            "data": item.as_value(),
            "priority": priority.as_str(),
        })))
    }
}

/// Constructor for one worker's processor instance.
pub type ProcessorCtor = Box<dyn Fn() -> Arc<dyn Processor> + Send + Sync>;

/// Registry mapping `worker_class` names to processor constructors.
#[derive(Default)]
pub struct ProcessorRegistry {
    ctors: HashMap<String, ProcessorCtor>,
}

impl ProcessorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled processors (`echo`, `stamp`).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("echo", || Arc::new(EchoProcessor));
        registry.register("stamp", || Arc::new(StampProcessor));
        registry
    }

    /// Register a processor constructor under a worker-class name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn() -> Arc<dyn Processor> + Send + Sync + 'static,
    ) {
        self.ctors.insert(name.into(), Box::new(ctor));
    }

    /// Instantiate a processor for one worker.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Processor>> {
        self.ctors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| PipelineError::UnknownWorkerClass(name.to_string()))
    }
}

/// Everything one worker task needs.
pub(crate) struct WorkerContext {
    pub worker_id: usize,
    pub globalname: String,
    pub in_lp: ItemQueue,
    pub in_hp: ItemQueue,
    pub out_lp: ItemQueue,
    pub out_hp: ItemQueue,
    pub processdata: Arc<AtomicBool>,
    pub processed: Arc<AtomicU64>,
    pub processor: Arc<dyn Processor>,
    pub cancel: CancellationToken,
}

/// Spawn one worker loop.
pub(crate) fn spawn_worker(ctx: WorkerContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if !ctx.processdata.load(Ordering::Acquire) {
                tokio::time::sleep(IDLE_PAUSE).await;
                continue;
            }

            let (item, priority) = if let Some(item) = ctx.in_hp.pop() {
                (item, Priority::High)
            } else if let Some(item) = ctx.in_lp.pop() {
                (item, Priority::Low)
            } else {
                tokio::time::sleep(POLL_PAUSE).await;
                continue;
            };

            match ctx.processor.process(item, priority).await {
                Ok(output) => {
                    match priority {
                        Priority::High => ctx.out_hp.push(output),
                        Priority::Low => ctx.out_lp.push(output),
                    }
                    ctx.processed.fetch_add(1, Ordering::Relaxed);
                    #[cfg(feature = "telemetry")]
                    crate::telemetry::record_processed(&ctx.globalname);
                }
                Err(e) => {
                    error!(
                        worker_id = ctx.worker_id,
                        manager = %ctx.globalname,
                        "processor failed, item dropped: {e}"
                    );
                }
            }
        }
    })
}
