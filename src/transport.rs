//! Message-oriented transport sockets
//!
//! Datagram-style messaging over three schemes: `tcp://host:port` and
//! `ipc:///path` carry length-delimited frames over TCP / Unix domain
//! sockets; `inproc://name` is a process-local registry used by tests and
//! co-located pipelines.
//!
//! Two patterns are supported, mirroring the configuration's
//! `datasocket_type`:
//!
//! - **pushpull** — the pull side binds and fan-ins frames from any
//!   number of connected pushers; each pusher connects to one endpoint.
//! - **pubsub** — the publisher binds and every connected subscriber
//!   receives every frame (frames published with no subscribers are
//!   dropped); subscribers connect with an implicit empty topic filter.
//!
//! Every socket is owned by exactly one task. [`Sender`] and [`Receiver`]
//! are channel handles to that task, so the rest of the pipeline never
//! touches a socket concurrently. Bind failures surface at construction;
//! connect roles retry in the background until the peer appears or the
//! cancellation token fires. `Receiver::recv` resolves to `None` once the
//! token is cancelled, which is how blocked receives are unblocked at
//! shutdown.

use crate::error::{PipelineError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Frames buffered per handle before senders start waiting.
const CHANNEL_DEPTH: usize = 1024;

/// Delay between reconnect attempts for connect-role sockets.
const RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Parsed transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp(String),
    /// `ipc:///path` (Unix domain socket)
    Ipc(PathBuf),
    /// `inproc://name` (process-local)
    Inproc(String),
}

impl Endpoint {
    /// Parse a URL-shaped endpoint string.
    pub fn parse(raw: &str) -> Result<Endpoint> {
        if let Some(addr) = raw.strip_prefix("tcp://") {
            Ok(Endpoint::Tcp(addr.to_string()))
        } else if let Some(path) = raw.strip_prefix("ipc://") {
            Ok(Endpoint::Ipc(PathBuf::from(path)))
        } else if let Some(name) = raw.strip_prefix("inproc://") {
            Ok(Endpoint::Inproc(name.to_string()))
        } else {
            Err(PipelineError::Transport(format!(
                "unsupported endpoint scheme: {raw}"
            )))
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process registry
// ---------------------------------------------------------------------------

struct InprocRegistry {
    /// pushpull endpoints: the pull side owns the receiver
    pull: DashMap<String, mpsc::Sender<Bytes>>,
    /// pubsub endpoints: the publisher owns the broadcast sender
    topics: DashMap<String, broadcast::Sender<Bytes>>,
}

fn inproc() -> &'static InprocRegistry {
    static REGISTRY: OnceLock<InprocRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| InprocRegistry {
        pull: DashMap::new(),
        topics: DashMap::new(),
    })
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Receiving half of an ingress or command socket.
pub struct Receiver {
    rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
}

impl Receiver {
    /// Bind the pull side of a pushpull pair. Fails fast on bind errors.
    pub async fn bind_pull(endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Receiver> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        match endpoint {
            Endpoint::Inproc(name) => {
                inproc().pull.insert(name.clone(), tx);
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(|e| {
                    PipelineError::Transport(format!("bind {endpoint} failed: {e}"))
                })?;
                spawn_tcp_accept_reader(listener, tx, cancel.clone());
            }
            Endpoint::Ipc(path) => {
                #[cfg(unix)]
                {
                    let _ = std::fs::remove_file(path);
                    let listener = UnixListener::bind(path).map_err(|e| {
                        PipelineError::Transport(format!("bind {endpoint} failed: {e}"))
                    })?;
                    spawn_unix_accept_reader(listener, tx, cancel.clone());
                }
                #[cfg(not(unix))]
                return Err(PipelineError::Transport(format!(
                    "ipc endpoints need a unix platform: {endpoint}"
                )));
            }
        }
        Ok(Receiver {
            rx,
            cancel: cancel.clone(),
        })
    }

    /// Connect a subscriber to a bound publisher. Retries in the
    /// background until the publisher appears or the token fires.
    pub async fn connect_sub(endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Receiver> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        match endpoint {
            Endpoint::Inproc(name) => {
                let name = name.clone();
                let token = cancel.clone();
                tokio::spawn(async move {
                    let Some(topic) = wait_for_topic(&name, &token).await else {
                        return;
                    };
                    let mut sub = topic.subscribe();
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            frame = sub.recv() => match frame {
                                Ok(frame) => {
                                    if tx.send(frame).await.is_err() {
                                        break;
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(n)) => {
                                    warn!("inproc subscriber {name} lagged, dropped {n} frames");
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            },
                        }
                    }
                });
            }
            Endpoint::Tcp(_) | Endpoint::Ipc(_) => {
                spawn_connect_reader(endpoint.clone(), tx, cancel.clone())?;
            }
        }
        Ok(Receiver {
            rx,
            cancel: cancel.clone(),
        })
    }

    /// Receive one message. Returns `None` when the cancellation token
    /// fires or the socket owner task ends.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            frame = self.rx.recv() => frame,
        }
    }
}

/// Wait until an inproc topic is registered by its publisher.
async fn wait_for_topic(name: &str, cancel: &CancellationToken) -> Option<broadcast::Sender<Bytes>> {
    loop {
        if let Some(topic) = inproc().topics.get(name) {
            return Some(topic.clone());
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Sending half of an egress or monitoring socket.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Bytes>,
    target: String,
}

impl Sender {
    /// Connect the push side of a pushpull pair. The connection is
    /// established in the background with retry; frames sent before the
    /// peer binds are buffered up to the channel depth.
    pub async fn connect_push(endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Sender> {
        let (tx, mut rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
        let target = endpoint.to_string();
        match endpoint {
            Endpoint::Inproc(name) => {
                let name = name.clone();
                let token = cancel.clone();
                tokio::spawn(async move {
                    'resolve: loop {
                        let pull = loop {
                            if let Some(pull) = inproc().pull.get(&name) {
                                break pull.clone();
                            }
                            tokio::select! {
                                _ = token.cancelled() => return,
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        };
                        loop {
                            match rx.recv().await {
                                Some(frame) => {
                                    if pull.send(frame).await.is_err() {
                                        // Pull side rebound; resolve it again
                                        continue 'resolve;
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                });
            }
            Endpoint::Tcp(_) | Endpoint::Ipc(_) => {
                spawn_connect_writer(endpoint.clone(), rx, cancel.clone())?;
            }
        }
        Ok(Sender { tx, target })
    }

    /// Bind a publisher. Fails fast on bind errors; every subscriber
    /// connected at send time receives the frame.
    pub async fn bind_pub(endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Sender> {
        let (tx, mut rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
        let target = endpoint.to_string();
        match endpoint {
            Endpoint::Inproc(name) => {
                let (topic, _) = broadcast::channel(CHANNEL_DEPTH);
                inproc().topics.insert(name.clone(), topic.clone());
                let token = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            frame = rx.recv() => match frame {
                                // No subscribers is not an error for a publisher
                                Some(frame) => {
                                    let _ = topic.send(frame);
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(|e| {
                    PipelineError::Transport(format!("bind {endpoint} failed: {e}"))
                })?;
                spawn_tcp_publisher(listener, rx, cancel.clone());
            }
            Endpoint::Ipc(path) => {
                #[cfg(unix)]
                {
                    let _ = std::fs::remove_file(path);
                    let listener = UnixListener::bind(path).map_err(|e| {
                        PipelineError::Transport(format!("bind {endpoint} failed: {e}"))
                    })?;
                    spawn_unix_publisher(listener, rx, cancel.clone());
                }
                #[cfg(not(unix))]
                return Err(PipelineError::Transport(format!(
                    "ipc endpoints need a unix platform: {endpoint}"
                )));
            }
        }
        Ok(Sender { tx, target })
    }

    /// Send one message. Waits while the socket owner drains its buffer.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| PipelineError::Transport(format!("{} is closed", self.target)))
    }
}

// ---------------------------------------------------------------------------
// Stream plumbing
// ---------------------------------------------------------------------------

fn framed_reader<S: AsyncRead>(stream: S) -> FramedRead<S, LengthDelimitedCodec> {
    FramedRead::new(stream, LengthDelimitedCodec::new())
}

fn framed_writer<S: AsyncWrite>(stream: S) -> FramedWrite<S, LengthDelimitedCodec> {
    FramedWrite::new(stream, LengthDelimitedCodec::new())
}

/// Pump frames from one connected stream into the fan-in channel.
fn spawn_stream_reader<S>(stream: S, tx: mpsc::Sender<Bytes>, cancel: CancellationToken)
where
    S: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut frames = framed_reader(stream);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => {
                        if tx.send(frame.freeze()).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("framed read error: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }
    });
}

fn spawn_tcp_accept_reader(
    listener: TcpListener,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                conn = listener.accept() => match conn {
                    Ok((stream, _)) => spawn_stream_reader(stream, tx.clone(), cancel.clone()),
                    Err(e) => {
                        debug!("accept failed: {e}");
                    }
                },
            }
        }
    });
}

#[cfg(unix)]
fn spawn_unix_accept_reader(
    listener: UnixListener,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                conn = listener.accept() => match conn {
                    Ok((stream, _)) => spawn_stream_reader(stream, tx.clone(), cancel.clone()),
                    Err(e) => {
                        debug!("accept failed: {e}");
                    }
                },
            }
        }
    });
}

/// Subscriber side of tcp/ipc pubsub: connect, read frames, reconnect on
/// disconnect, forever until cancelled.
fn spawn_connect_reader(
    endpoint: Endpoint,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) -> Result<()> {
    #[cfg(not(unix))]
    if matches!(endpoint, Endpoint::Ipc(_)) {
        return Err(PipelineError::Transport(format!(
            "ipc endpoints need a unix platform: {endpoint}"
        )));
    }
    tokio::spawn(async move {
        loop {
            let read_done = match &endpoint {
                Endpoint::Tcp(addr) => match TcpStream::connect(addr).await {
                    Ok(stream) => read_stream(stream, &tx, &cancel).await,
                    Err(e) => {
                        debug!("connect {endpoint} failed: {e}");
                        false
                    }
                },
                #[cfg(unix)]
                Endpoint::Ipc(path) => match UnixStream::connect(path).await {
                    Ok(stream) => read_stream(stream, &tx, &cancel).await,
                    Err(e) => {
                        debug!("connect {endpoint} failed: {e}");
                        false
                    }
                },
                _ => unreachable!("inproc handled by the caller"),
            };
            if read_done || cancel.is_cancelled() || tx.is_closed() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    });
    Ok(())
}

/// Read frames from one connection into `tx`. Returns true when the
/// handle side hung up (no reconnect wanted).
async fn read_stream<S>(stream: S, tx: &mpsc::Sender<Bytes>, cancel: &CancellationToken) -> bool
where
    S: AsyncRead + Send + Unpin,
{
    let mut frames = framed_reader(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return true,
            frame = frames.next() => match frame {
                Some(Ok(frame)) => {
                    if tx.send(frame.freeze()).await.is_err() {
                        return true;
                    }
                }
                Some(Err(e)) => {
                    debug!("framed read error: {e}");
                    return false;
                }
                None => return false,
            },
        }
    }
}

/// Push side of tcp/ipc pushpull: connect with retry, then forward the
/// handle's frames; reconnect when the peer drops.
fn spawn_connect_writer(
    endpoint: Endpoint,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> Result<()> {
    #[cfg(not(unix))]
    if matches!(endpoint, Endpoint::Ipc(_)) {
        return Err(PipelineError::Transport(format!(
            "ipc endpoints need a unix platform: {endpoint}"
        )));
    }
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let connected = match &endpoint {
                Endpoint::Tcp(addr) => match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        write_stream(framed_writer(stream), &mut rx, &cancel).await
                    }
                    Err(e) => {
                        debug!("connect {endpoint} failed: {e}");
                        false
                    }
                },
                #[cfg(unix)]
                Endpoint::Ipc(path) => match UnixStream::connect(path).await {
                    Ok(stream) => {
                        write_stream(framed_writer(stream), &mut rx, &cancel).await
                    }
                    Err(e) => {
                        debug!("connect {endpoint} failed: {e}");
                        false
                    }
                },
                _ => unreachable!("inproc handled by the caller"),
            };
            if connected || cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    });
    Ok(())
}

/// Forward frames from `rx` into one connected sink. Returns true when
/// the handle side is finished (no reconnect wanted).
async fn write_stream<S>(
    mut sink: FramedWrite<S, LengthDelimitedCodec>,
    rx: &mut mpsc::Receiver<Bytes>,
    cancel: &CancellationToken,
) -> bool
where
    S: AsyncWrite + Send + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return true,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        // The frame is lost; reconnect and continue
                        warn!("send failed, reconnecting: {e}");
                        return false;
                    }
                }
                None => return true,
            },
        }
    }
}

fn spawn_tcp_publisher(
    listener: TcpListener,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut subscribers: Vec<FramedWrite<TcpStream, LengthDelimitedCodec>> = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                conn = listener.accept() => match conn {
                    Ok((stream, _)) => subscribers.push(framed_writer(stream)),
                    Err(e) => {
                        debug!("accept failed: {e}");
                    }
                },
                frame = rx.recv() => match frame {
                    Some(frame) => subscribers = broadcast_frame(subscribers, frame).await,
                    None => break,
                },
            }
        }
    });
}

#[cfg(unix)]
fn spawn_unix_publisher(
    listener: UnixListener,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut subscribers: Vec<FramedWrite<UnixStream, LengthDelimitedCodec>> = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                conn = listener.accept() => match conn {
                    Ok((stream, _)) => subscribers.push(framed_writer(stream)),
                    Err(e) => {
                        debug!("accept failed: {e}");
                    }
                },
                frame = rx.recv() => match frame {
                    Some(frame) => subscribers = broadcast_frame(subscribers, frame).await,
                    None => break,
                },
            }
        }
    });
}

/// Send one frame to every connected subscriber, dropping the ones whose
/// connection failed.
async fn broadcast_frame<S>(
    subscribers: Vec<FramedWrite<S, LengthDelimitedCodec>>,
    frame: Bytes,
) -> Vec<FramedWrite<S, LengthDelimitedCodec>>
where
    S: AsyncWrite + Send + Unpin,
{
    let mut alive = Vec::with_capacity(subscribers.len());
    for mut sink in subscribers {
        match sink.send(frame.clone()).await {
            Ok(()) => alive.push(sink),
            Err(e) => debug!("subscriber dropped: {e}"),
        }
    }
    alive
}
