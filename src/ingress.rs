//! Ingress listeners: receive from a priority lane and fan out
//!
//! One listener task per priority lane. The variant is chosen by the
//! configured dataflow type: binary payloads are parsed into records,
//! string payloads become text items, and filename payloads name a file
//! whose non-empty lines are parsed into individual records. Every
//! resulting item is replicated to every manager — all managers see all
//! items; there is no sharding.
//!
//! While `stopdata` is set the listener idles without receiving, so
//! paused messages stay in the transport until ingress resumes. A failed
//! parse or unreadable file is logged and dropped; nothing is pushed for
//! the bad line or file.

use crate::config::DataflowType;
use crate::item::{Item, Priority};
use crate::manager::WorkerManager;
use crate::transport::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Pause while ingress is stopped.
const STOPPED_PAUSE: Duration = Duration::from_millis(100);

pub(crate) struct IngressContext {
    pub priority: Priority,
    pub flow: DataflowType,
    pub receiver: Receiver,
    pub managers: Arc<Vec<Arc<WorkerManager>>>,
    pub stopdata: Arc<AtomicBool>,
    pub cancel: CancellationToken,
    pub globalname: String,
}

/// Spawn the listener loop for one priority lane.
pub(crate) fn spawn_listener(mut ctx: IngressContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if ctx.stopdata.load(Ordering::Acquire) {
                tokio::time::sleep(STOPPED_PAUSE).await;
                continue;
            }
            let Some(payload) = ctx.receiver.recv().await else {
                break;
            };
            match ctx.flow {
                DataflowType::Binary | DataflowType::Text => {
                    match Item::decode(&payload, ctx.flow) {
                        Ok(item) => fan_out(&ctx.managers, ctx.priority, item),
                        Err(e) => {
                            error!(
                                supervisor = %ctx.globalname,
                                priority = ctx.priority.as_str(),
                                "ingress message dropped: {e}"
                            );
                        }
                    }
                }
                DataflowType::Filename => match std::str::from_utf8(&payload) {
                    Ok(filename) => {
                        for record in read_file_records(filename, &ctx.globalname).await {
                            fan_out(&ctx.managers, ctx.priority, record);
                        }
                    }
                    Err(e) => {
                        error!(
                            supervisor = %ctx.globalname,
                            "ingress filename is not UTF-8, dropped: {e}"
                        );
                    }
                },
            }
        }
        info!(
            supervisor = %ctx.globalname,
            priority = ctx.priority.as_str(),
            "ingress listener ended"
        );
    })
}

/// Replicate one item to every manager's input queue for the lane.
fn fan_out(managers: &[Arc<WorkerManager>], priority: Priority, item: Item) {
    for manager in managers {
        manager.input_queue(priority).push(item.clone());
        #[cfg(feature = "telemetry")]
        crate::telemetry::record_ingested(manager.globalname());
    }
}

/// Read a newline-separated record file. Blank lines are skipped; a line
/// that fails to parse is logged and skipped; an unreadable file yields
/// no records.
async fn read_file_records(filename: &str, globalname: &str) -> Vec<Item> {
    let contents = match tokio::fs::read_to_string(filename).await {
        Ok(contents) => contents,
        Err(e) => {
            error!(supervisor = %globalname, filename, "unable to open file: {e}");
            return Vec::new();
        }
    };
    let mut records = Vec::new();
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(Item::Record(record)),
            Err(e) => {
                error!(supervisor = %globalname, filename, "bad record line skipped: {e}");
            }
        }
    }
    records
}
