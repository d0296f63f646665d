//! Supervisor: topology construction, lifecycle, and the control state machine
//!
//! The supervisor owns the transport sockets, the managers, and the
//! control channel. Construction binds/connects every socket and builds
//! every configured manager; `start` spawns the ingress listeners, the
//! result pump, the command reader, and the state machine driver, then
//! moves the status from Initialised to Waiting.
//!
//! Control messages from the command socket and bridged OS signals are
//! consumed from one unified channel by a single driver task, so no
//! application logic ever runs on a signal stack.
//!
//! Clean shutdown (`cleanedshutdown`, or SIGTERM) is only genuine from
//! the Processing state: ingress is paused, the input queues and then
//! the result queues of every manager are polled until empty, and only
//! then are the workers stopped. The drain loop has no overall timeout;
//! a manager that never drains blocks clean shutdown indefinitely.

use crate::command::{
    CommandKind, ControlEvent, ControlMessage, Status, StatusCell, TYPE_COMMAND, TYPE_CONFIG,
};
use crate::config::{SocketMode, SupervisorConfig};
use crate::error::Result;
use crate::ingress::{spawn_listener, IngressContext};
use crate::item::{Item, Priority};
use crate::manager::WorkerManager;
use crate::monitoring::MonitoringEmitter;
use crate::transport::{Endpoint, Receiver, Sender};
use crate::worker::ProcessorRegistry;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Control events buffered towards the state machine driver.
const CONTROL_DEPTH: usize = 64;

/// Poll interval of the clean-shutdown drain loop.
const DRAIN_POLL: Duration = Duration::from_millis(200);

/// Yield between the stop command and stopping the managers.
const STOP_YIELD: Duration = Duration::from_millis(100);

/// Pause of the result pump when every result queue is empty.
const PUMP_PAUSE: Duration = Duration::from_millis(1);

/// Egress sockets of one manager. A disabled lane keeps `None`: the pump
/// still pops the item and drops it on the floor, which is the user's
/// configuration choice.
struct EgressLane {
    manager: Arc<WorkerManager>,
    lp: Option<Sender>,
    hp: Option<Sender>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.name)
            .finish()
    }
}

/// The top-level process coordinator.
pub struct Supervisor {
    config: SupervisorConfig,
    name: String,
    globalname: String,
    pid: u32,
    status: StatusCell,
    stopdata: Arc<AtomicBool>,
    cancel: CancellationToken,
    managers: Arc<Vec<Arc<WorkerManager>>>,
    emitter: MonitoringEmitter,
    control_tx: mpsc::Sender<ControlEvent>,
    control_rx: Mutex<Option<mpsc::Receiver<ControlEvent>>>,
    ingress: Mutex<Option<(Receiver, Receiver)>>,
    command_rx: Mutex<Option<Receiver>>,
    egress: Mutex<Option<Vec<EgressLane>>>,
}

impl Supervisor {
    /// Bind/connect the socket topology and build every configured
    /// manager. Any failure here is fatal; the binary exits with code 1.
    pub async fn new(
        config: SupervisorConfig,
        registry: &ProcessorRegistry,
    ) -> Result<Arc<Supervisor>> {
        config.validate()?;
        let name = config.name.clone();
        let globalname = format!("Supervisor-{name}");
        let cancel = CancellationToken::new();

        info!(
            supervisor = %globalname,
            dataflow = ?config.dataflow_type,
            processing = %config.processing_type,
            sockets = ?config.datasocket_type,
            "starting"
        );

        let monitoring =
            Sender::connect_push(&Endpoint::parse(&config.monitoring_socket)?, &cancel).await?;
        let emitter = MonitoringEmitter::start(monitoring, &cancel);

        let ingress = match config.datasocket_type {
            SocketMode::PushPull => {
                let lp =
                    Receiver::bind_pull(&Endpoint::parse(&config.data_lp_socket)?, &cancel).await?;
                let hp =
                    Receiver::bind_pull(&Endpoint::parse(&config.data_hp_socket)?, &cancel).await?;
                Some((lp, hp))
            }
            SocketMode::PubSub => {
                let lp = Receiver::connect_sub(&Endpoint::parse(&config.data_lp_socket)?, &cancel)
                    .await?;
                let hp = Receiver::connect_sub(&Endpoint::parse(&config.data_hp_socket)?, &cancel)
                    .await?;
                Some((lp, hp))
            }
            SocketMode::Custom => {
                info!(supervisor = %globalname, "custom data receiver, no ingress sockets");
                None
            }
        };

        let command_rx =
            Receiver::connect_sub(&Endpoint::parse(&config.command_socket)?, &cancel).await?;

        let mut managers = Vec::with_capacity(config.managers.len());
        for (index, manager_config) in config.managers.iter().enumerate() {
            managers.push(WorkerManager::new(
                index,
                &name,
                manager_config.clone(),
                registry,
                emitter.clone(),
                &cancel,
            )?);
        }

        fn lane_endpoint(socket: &str) -> Option<&str> {
            (socket != crate::config::DISABLED_ENDPOINT).then_some(socket)
        }

        let mut egress = Vec::with_capacity(managers.len());
        for manager in &managers {
            let manager_config = manager.config();
            let mut lp = None;
            let mut hp = None;
            for (slot, endpoint) in [
                (&mut lp, lane_endpoint(&manager_config.result_lp_socket)),
                (&mut hp, lane_endpoint(&manager_config.result_hp_socket)),
            ] {
                if let Some(endpoint) = endpoint {
                    let endpoint = Endpoint::parse(endpoint)?;
                    *slot = match manager_config.result_socket_type {
                        SocketMode::PushPull => {
                            Some(Sender::connect_push(&endpoint, &cancel).await?)
                        }
                        SocketMode::PubSub => Some(Sender::bind_pub(&endpoint, &cancel).await?),
                        SocketMode::Custom => None,
                    };
                    if slot.is_some() {
                        info!(
                            manager = %manager.globalname(),
                            endpoint = %endpoint,
                            "result socket ready"
                        );
                    }
                }
            }
            egress.push(EgressLane {
                manager: Arc::clone(manager),
                lp,
                hp,
            });
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_DEPTH);

        let supervisor = Arc::new(Supervisor {
            name,
            pid: std::process::id(),
            status: StatusCell::new(Status::Initialised),
            stopdata: Arc::new(AtomicBool::new(true)),
            cancel,
            managers: Arc::new(managers),
            emitter,
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            ingress: Mutex::new(ingress),
            command_rx: Mutex::new(Some(command_rx)),
            egress: Mutex::new(Some(egress)),
            globalname,
            config,
        });
        supervisor.emit_status();
        info!(supervisor = %supervisor.globalname, pid = supervisor.pid, "started");
        Ok(supervisor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn globalname(&self) -> &str {
        &self.globalname
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub fn managers(&self) -> &[Arc<WorkerManager>] {
        &self.managers
    }

    /// Completes when the supervisor has shut down.
    pub async fn wait(&self) {
        self.cancel.cancelled().await;
    }

    /// Push one item into every manager's input queue for the lane.
    /// This is the programmatic source used with `datasocket_type =
    /// custom`.
    pub fn inject(&self, priority: Priority, item: Item) {
        for manager in self.managers.iter() {
            manager.input_queue(priority).push(item.clone());
        }
    }

    /// Feed one event into the control channel, as the command socket
    /// and the signal bridge do.
    pub async fn submit_control(&self, event: ControlEvent) {
        if self.control_tx.send(event).await.is_err() {
            warn!(supervisor = %self.globalname, "control channel closed, event dropped");
        }
    }

    /// Bridge SIGTERM/SIGINT/SIGHUP into the control channel.
    pub fn install_signal_bridge(&self) -> Result<()> {
        crate::command::spawn_signal_bridge(self.control_tx.clone())
    }

    /// Spawn every service task and move to Waiting.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for manager in self.managers.iter() {
            manager.start_workers();
            manager.start_probe();
        }

        if let Some((lp, hp)) = self.ingress.lock().expect("ingress lock poisoned").take() {
            for (receiver, priority) in [(lp, Priority::Low), (hp, Priority::High)] {
                spawn_listener(IngressContext {
                    priority,
                    flow: self.config.dataflow_type,
                    receiver,
                    managers: Arc::clone(&self.managers),
                    stopdata: Arc::clone(&self.stopdata),
                    cancel: self.cancel.clone(),
                    globalname: self.globalname.clone(),
                });
            }
        }

        self.spawn_result_pump();
        self.spawn_command_reader();
        self.spawn_driver();

        self.status.set(Status::Waiting);
        self.emit_status();
        Ok(())
    }

    fn emit_status(&self) {
        let status = self.status.get();
        info!(supervisor = %self.globalname, status = %status, "status");
        self.emitter.send_info(1, status.as_str(), &self.name, 1, "Low");
    }

    // -----------------------------------------------------------------------
    // Result pump
    // -----------------------------------------------------------------------

    /// Single task draining every manager's result queues in index
    /// order, high priority strictly first.
    fn spawn_result_pump(self: &Arc<Self>) {
        let Some(lanes) = self.egress.lock().expect("egress lock poisoned").take() else {
            return;
        };
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if supervisor.cancel.is_cancelled() {
                    break;
                }
                let mut moved = false;
                for lane in &lanes {
                    if let Some(item) = lane.manager.result_hp_queue().pop() {
                        moved = true;
                        supervisor.deliver(lane, item, lane.hp.as_ref()).await;
                    } else if let Some(item) = lane.manager.result_lp_queue().pop() {
                        moved = true;
                        supervisor.deliver(lane, item, lane.lp.as_ref()).await;
                    }
                }
                if !moved {
                    tokio::time::sleep(PUMP_PAUSE).await;
                }
            }
            info!(supervisor = %supervisor.globalname, "result pump ended");
        });
    }

    /// Encode and send one popped item. A disabled lane drops it.
    async fn deliver(&self, lane: &EgressLane, item: Item, sender: Option<&Sender>) {
        let Some(sender) = sender else {
            return;
        };
        let flow = lane.manager.config().result_dataflow_type;
        match item.encode(flow) {
            Ok(payload) => {
                if let Err(e) = sender.send(Bytes::from(payload)).await {
                    error!(manager = %lane.manager.globalname(), "result send failed: {e}");
                } else {
                    #[cfg(feature = "telemetry")]
                    crate::telemetry::record_egressed(lane.manager.globalname());
                }
            }
            Err(e) => {
                error!(manager = %lane.manager.globalname(), "result not encodable: {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Control plane
    // -----------------------------------------------------------------------

    /// Forward command-socket messages into the control channel.
    fn spawn_command_reader(self: &Arc<Self>) {
        let Some(mut receiver) = self
            .command_rx
            .lock()
            .expect("command receiver lock poisoned")
            .take()
        else {
            return;
        };
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                match ControlMessage::parse(&payload) {
                    Ok(message) => {
                        if supervisor
                            .control_tx
                            .send(ControlEvent::Message(message))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(supervisor = %supervisor.globalname, "command dropped: {e}");
                        supervisor.emitter.send_log(
                            1,
                            &format!("command dropped: {e}"),
                            &supervisor.name,
                            1,
                            "Low",
                        );
                    }
                }
            }
            info!(supervisor = %supervisor.globalname, "command reader ended");
        });
    }

    /// The state machine driver: the single consumer of control events.
    fn spawn_driver(self: &Arc<Self>) {
        let Some(mut events) = self
            .control_rx
            .lock()
            .expect("control receiver lock poisoned")
            .take()
        else {
            return;
        };
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = supervisor.cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => supervisor.handle_event(event).await,
                        None => break,
                    },
                }
            }
            info!(supervisor = %supervisor.globalname, "state machine ended");
        });
    }

    async fn handle_event(&self, event: ControlEvent) {
        match event {
            ControlEvent::Message(message) => self.handle_message(message).await,
            ControlEvent::Terminate => {
                info!(supervisor = %self.globalname, "SIGTERM, terminating with cleaned shutdown");
                self.command_cleanedshutdown().await;
            }
            ControlEvent::Interrupt => {
                info!(supervisor = %self.globalname, "SIGINT, terminating with shutdown");
                self.command_shutdown().await;
            }
        }
    }

    async fn handle_message(&self, message: ControlMessage) {
        match message.header.kind {
            TYPE_COMMAND => {
                if !message.targets(&self.name) {
                    return;
                }
                let Some(kind) = CommandKind::from_subtype(&message.header.subtype) else {
                    debug!(
                        supervisor = %self.globalname,
                        subtype = %message.header.subtype,
                        "unknown command subtype ignored"
                    );
                    return;
                };
                info!(
                    supervisor = %self.globalname,
                    subtype = %message.header.subtype,
                    "received command"
                );
                match kind {
                    CommandKind::Start => self.command_start(),
                    CommandKind::Stop => self.command_stop(),
                    CommandKind::StartProcessing => self.command_startprocessing(),
                    CommandKind::StopProcessing => self.command_stopprocessing(),
                    CommandKind::StartData => self.command_startdata(),
                    CommandKind::StopData => self.command_stopdata(),
                    CommandKind::Reset => self.command_reset(),
                    CommandKind::Shutdown => self.command_shutdown().await,
                    CommandKind::CleanedShutdown => self.command_cleanedshutdown().await,
                    CommandKind::GetStatus => {
                        for manager in self.managers.iter() {
                            manager.request_status(&message.header.pidsource);
                        }
                    }
                }
            }
            TYPE_CONFIG => {
                for manager in self.managers.iter() {
                    manager.configworkers(&message);
                }
            }
            other => {
                debug!(supervisor = %self.globalname, kind = other, "message type ignored");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    fn command_start(&self) {
        self.command_startprocessing();
        self.command_startdata();
    }

    fn command_stop(&self) {
        self.command_stopdata();
        self.command_stopprocessing();
    }

    fn command_startprocessing(&self) {
        self.status.set(Status::Processing);
        self.emit_status();
        for manager in self.managers.iter() {
            manager.set_processdata(true);
        }
    }

    fn command_stopprocessing(&self) {
        self.status.set(Status::Waiting);
        self.emit_status();
        for manager in self.managers.iter() {
            manager.set_processdata(false);
        }
    }

    fn command_startdata(&self) {
        self.stopdata.store(false, Ordering::Release);
        for manager in self.managers.iter() {
            manager.set_stopdata(false);
        }
    }

    fn command_stopdata(&self) {
        self.stopdata.store(true, Ordering::Release);
        for manager in self.managers.iter() {
            manager.set_stopdata(true);
        }
    }

    fn command_reset(&self) {
        if !matches!(self.status.get(), Status::Processing | Status::Waiting) {
            return;
        }
        self.command_stop();
        for manager in self.managers.iter() {
            info!(manager = %manager.globalname(), "resetting");
            manager.clean_queue();
        }
        self.status.set(Status::Waiting);
        self.emit_status();
    }

    async fn command_shutdown(&self) {
        self.status.set(Status::Shutdown);
        self.emit_status();
        self.stop_all(true).await;
    }

    async fn command_cleanedshutdown(&self) {
        if self.status.get() == Status::Processing {
            self.status.set(Status::EndingProcessing);
            self.emit_status();
            self.command_stopdata();
            for manager in self.managers.iter() {
                info!(manager = %manager.globalname(), "waiting for queues to drain");
                loop {
                    let in_lp = manager.low_priority_queue().len();
                    let in_hp = manager.high_priority_queue().len();
                    if in_lp == 0 && in_hp == 0 {
                        break;
                    }
                    info!(
                        manager = %manager.globalname(),
                        in_lp, in_hp,
                        "input queues draining"
                    );
                    tokio::time::sleep(DRAIN_POLL).await;
                }
                loop {
                    let out_lp = manager.result_lp_queue().len();
                    let out_hp = manager.result_hp_queue().len();
                    if out_lp == 0 && out_hp == 0 {
                        break;
                    }
                    info!(
                        manager = %manager.globalname(),
                        out_lp, out_hp,
                        "result queues draining"
                    );
                    tokio::time::sleep(DRAIN_POLL).await;
                }
            }
        } else {
            warn!(
                supervisor = %self.globalname,
                "not in Processing state for a cleaned shutdown, forcing the shutdown"
            );
        }
        self.status.set(Status::Shutdown);
        self.emit_status();
        self.stop_all(false).await;
    }

    /// Stop every worker and end every supervisor task.
    async fn stop_all(&self, fast: bool) {
        info!(supervisor = %self.globalname, fast, "stopping all workers and managers");
        self.command_stop();
        tokio::time::sleep(STOP_YIELD).await;
        for manager in self.managers.iter() {
            manager.stop(fast).await;
        }
        self.cancel.cancel();
        info!(supervisor = %self.globalname, "all workers, managers and service tasks ended");
    }
}
