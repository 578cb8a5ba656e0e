/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Request/response stream source: JSON control requests and binary media
//! frames multiplexed over one message channel.
//!
//! Every request carries a monotonically increasing `id` and resolves when
//! the server echoes it; a periodic sweep rejects requests whose deadline has
//! passed. `flush` bumps an `ignore_below` watermark and binary frames whose
//! header id is below it are dropped, which keeps stale frames from a
//! previous position out of the pipeline after a seek. Packet ids are
//! unsigned; only the JSON response id is signed, because the server uses
//! `-1` for broadcasts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{DataEvent, SourceCallbacks, StreamKind, StreamSource};
use crate::constants::{KEYFRAME_REQUEST_INTERVAL_MS, REQUEST_TIMEOUT_MS};
use crate::error::{ClientError, Result};
use crate::utils::{now_ms, KeyframeThrottle};
use sesame_types::PacketBuf;

/// Cadence of the request-deadline sweep.
const TIMEOUT_SWEEP_INTERVAL_MS: u64 = 250;

/// Response id the server uses for unsolicited broadcasts.
const BROADCAST_ID: i64 = -1;

/// Control commands understood by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Subscribe to a live stream.
    Live { filename: String },
    /// Open a file for playback.
    Load { filename: String, project: String },
    /// Seek the loaded file, in milliseconds.
    Seek { position_ms: u64 },
    /// Request `packets` more packets.
    Read { packets: u64 },
    /// Release the current stream.
    Unload,
    /// Ask the server for a keyframe.
    Keyframe,
}

impl Command {
    fn kind(&self) -> &'static str {
        match self {
            Command::Live { .. } => "live",
            Command::Load { .. } => "load",
            Command::Seek { .. } => "seek",
            Command::Read { .. } => "read",
            Command::Unload => "unload",
            Command::Keyframe => "keyframe",
        }
    }
}

#[derive(Serialize)]
struct ControlRequest<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(rename = "paramNum", skip_serializing_if = "Option::is_none")]
    param_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ControlResponse {
    id: i64,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

fn encode_request(id: u64, command: &Command) -> String {
    let request = match command {
        Command::Live { filename } => ControlRequest {
            id,
            kind: command.kind(),
            param_num: None,
            filename: Some(filename),
            project: None,
        },
        Command::Load { filename, project } => ControlRequest {
            id,
            kind: command.kind(),
            param_num: None,
            filename: Some(filename),
            project: Some(project),
        },
        Command::Seek { position_ms } => ControlRequest {
            id,
            kind: command.kind(),
            param_num: Some(*position_ms),
            filename: None,
            project: None,
        },
        Command::Read { packets } => ControlRequest {
            id,
            kind: command.kind(),
            param_num: Some(*packets),
            filename: None,
            project: None,
        },
        Command::Unload | Command::Keyframe => ControlRequest {
            id,
            kind: command.kind(),
            param_num: None,
            filename: None,
            project: None,
        },
    };
    // Serialization of a struct of scalars cannot fail.
    serde_json::to_string(&request).unwrap_or_default()
}

type Waiter = oneshot::Sender<Result<Option<serde_json::Value>>>;

/// Outstanding-request bookkeeping, separated from the socket so deadlines
/// and watermark behavior are testable with an explicit clock.
pub struct RequestTracker {
    next_id: u64,
    timeout_ms: u64,
    waiters: HashMap<u64, (u64, Waiter)>,
    ignore_below: u64,
}

impl RequestTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            next_id: 1,
            timeout_ms,
            waiters: HashMap::new(),
            ignore_below: 0,
        }
    }

    /// Allocate an id and register a waiter with its deadline.
    pub fn begin(&mut self, now_ms: u64) -> (u64, oneshot::Receiver<Result<Option<serde_json::Value>>>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, (now_ms + self.timeout_ms, tx));
        (id, rx)
    }

    /// Allocate an id without registering a waiter (fire-and-forget).
    pub fn begin_detached(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Resolve the waiter for a response id. Returns false for broadcasts and
    /// unknown ids.
    pub fn resolve(&mut self, id: i64, result: Result<Option<serde_json::Value>>) -> bool {
        if id < 0 {
            return false;
        }
        match self.waiters.remove(&(id as u64)) {
            Some((_, waiter)) => {
                let _ = waiter.send(result);
                true
            }
            None => false,
        }
    }

    /// Reject every waiter whose deadline has passed. Returns how many.
    pub fn check_timeouts(&mut self, now_ms: u64) -> usize {
        let expired: Vec<u64> = self
            .waiters
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some((_, waiter)) = self.waiters.remove(id) {
                let _ = waiter.send(Err(ClientError::RequestTimeout { id: *id }));
            }
        }
        expired.len()
    }

    /// Bump the watermark: binary frames with a header id issued before this
    /// point are stale and will be dropped.
    pub fn flush(&mut self) {
        self.ignore_below = self.next_id;
        debug!("watermark raised to {}", self.ignore_below);
    }

    /// True when a binary frame's header id is below the watermark.
    pub fn should_ignore(&self, packet_id: u64) -> bool {
        packet_id < self.ignore_below
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// What the underlying message channel reports.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Text(String),
    Binary(Bytes),
    Closed,
}

/// The underlying bidirectional message channel (external collaborator).
#[async_trait]
pub trait ControlSocket: Send + Sync {
    async fn open(
        &self,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Result<Box<dyn SocketHandle>>;
}

/// A live channel. Dropping it tears the connection down.
pub trait SocketHandle: Send {
    fn send_text(&self, text: String) -> Result<()>;
    fn close(&self);
}

#[derive(Debug, Clone)]
pub struct RequestSocketConfig {
    pub request_timeout_ms: u64,
    /// Minimum spacing between keyframe requests.
    pub keyframe_interval_ms: u64,
    /// Fixed delay before reconnecting after an unsolicited close.
    /// `None` disables auto-reconnect.
    pub reconnect_delay_ms: Option<u64>,
}

impl Default for RequestSocketConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            keyframe_interval_ms: KEYFRAME_REQUEST_INTERVAL_MS,
            reconnect_delay_ms: None,
        }
    }
}

/// [`StreamSource`] that multiplexes JSON control and binary media frames on
/// one socket-style channel.
pub struct RequestSocketSource {
    socket: Arc<dyn ControlSocket>,
    config: RequestSocketConfig,
    callbacks: SourceCallbacks,
    tracker: Arc<Mutex<RequestTracker>>,
    handle: Arc<Mutex<Option<Box<dyn SocketHandle>>>>,
    keyframe_throttle: Arc<Mutex<KeyframeThrottle>>,
    closing: Arc<AtomicBool>,
    supervisor: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl RequestSocketSource {
    pub fn new(
        socket: Arc<dyn ControlSocket>,
        config: RequestSocketConfig,
        callbacks: SourceCallbacks,
    ) -> Self {
        let tracker = Arc::new(Mutex::new(RequestTracker::new(config.request_timeout_ms)));
        let keyframe_throttle = Arc::new(Mutex::new(KeyframeThrottle::new(
            config.keyframe_interval_ms,
        )));
        Self {
            socket,
            config,
            callbacks,
            tracker,
            handle: Arc::new(Mutex::new(None)),
            keyframe_throttle,
            closing: Arc::new(AtomicBool::new(false)),
            supervisor: None,
            sweeper: None,
        }
    }

    /// Issue a control request and wait for the server to echo its id.
    pub async fn request(&self, command: Command) -> Result<Option<serde_json::Value>> {
        let (id, rx) = {
            let mut tracker = self.tracker.lock().unwrap();
            tracker.begin(now_ms())
        };
        self.send_text(encode_request(id, &command))?;
        rx.await
            .map_err(|_| ClientError::Transport("connection dropped".into()))?
    }

    pub async fn live(&self, filename: impl Into<String>) -> Result<Option<serde_json::Value>> {
        self.request(Command::Live {
            filename: filename.into(),
        })
        .await
    }

    pub async fn load(
        &self,
        filename: impl Into<String>,
        project: impl Into<String>,
    ) -> Result<Option<serde_json::Value>> {
        self.request(Command::Load {
            filename: filename.into(),
            project: project.into(),
        })
        .await
    }

    /// Seek. Raises the watermark first so frames from the old position are
    /// dropped as they trickle in.
    pub async fn seek(&self, position_ms: u64) -> Result<Option<serde_json::Value>> {
        self.flush();
        self.request(Command::Seek { position_ms }).await
    }

    pub async fn read(&self, packets: u64) -> Result<Option<serde_json::Value>> {
        self.request(Command::Read { packets }).await
    }

    pub async fn unload(&self) -> Result<Option<serde_json::Value>> {
        self.request(Command::Unload).await
    }

    /// Bump the `ignore_below` watermark.
    pub fn flush(&self) {
        self.tracker.lock().unwrap().flush();
    }

    fn send_text(&self, text: String) -> Result<()> {
        let handle = self.handle.lock().unwrap();
        match handle.as_ref() {
            Some(h) => h.send_text(text),
            None => Err(ClientError::Transport("not connected".into())),
        }
    }

    /// Fire-and-forget keyframe request, rate-limited to one per interval.
    fn send_keyframe_request(&self) {
        if !self.keyframe_throttle.lock().unwrap().ready(now_ms()) {
            debug!("keyframe request suppressed by rate limit");
            return;
        }
        let id = self.tracker.lock().unwrap().begin_detached();
        if let Err(e) = self.send_text(encode_request(id, &Command::Keyframe)) {
            warn!("keyframe request failed: {e}");
        }
    }
}

#[async_trait]
impl StreamSource for RequestSocketSource {
    async fn connect(&mut self) -> Result<()> {
        if self.supervisor.is_some() {
            return Err(ClientError::InvalidState("connected"));
        }
        self.closing.store(false, Ordering::SeqCst);

        // First connection happens inline so failures surface to the caller;
        // reconnects are the supervisor's business.
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.socket.open(tx).await?;
        *self.handle.lock().unwrap() = Some(handle);
        self.callbacks.on_connected.emit(());

        self.supervisor = Some(tokio::spawn(supervise(
            self.socket.clone(),
            self.config.clone(),
            self.callbacks.clone(),
            self.tracker.clone(),
            self.handle.clone(),
            self.closing.clone(),
            rx,
        )));

        let tracker = self.tracker.clone();
        self.sweeper = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(TIMEOUT_SWEEP_INTERVAL_MS));
            loop {
                interval.tick().await;
                let expired = tracker.lock().unwrap().check_timeouts(now_ms());
                if expired > 0 {
                    debug!("rejected {expired} expired requests");
                }
            }
        }));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.close();
        }
        if let Some(task) = self.supervisor.take() {
            task.abort();
        }
        if let Some(task) = self.sweeper.take() {
            task.abort();
        }
    }

    fn request_keyframe(&mut self) {
        self.send_keyframe_request();
    }

    fn dispose(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.close();
        }
        if let Some(task) = self.supervisor.take() {
            task.abort();
        }
        if let Some(task) = self.sweeper.take() {
            task.abort();
        }
    }
}

impl Drop for RequestSocketSource {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owns the event pump across reconnects.
async fn supervise(
    socket: Arc<dyn ControlSocket>,
    config: RequestSocketConfig,
    callbacks: SourceCallbacks,
    tracker: Arc<Mutex<RequestTracker>>,
    handle: Arc<Mutex<Option<Box<dyn SocketHandle>>>>,
    closing: Arc<AtomicBool>,
    mut rx: mpsc::UnboundedReceiver<SocketEvent>,
) {
    loop {
        pump_socket(&mut rx, &callbacks, &tracker).await;

        if closing.load(Ordering::SeqCst) {
            return;
        }
        callbacks
            .on_disconnected
            .emit("socket closed by peer".to_string());

        let Some(delay_ms) = config.reconnect_delay_ms else {
            return;
        };
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            if closing.load(Ordering::SeqCst) {
                return;
            }
            let (tx, new_rx) = mpsc::unbounded_channel();
            match socket.open(tx).await {
                Ok(new_handle) => {
                    *handle.lock().unwrap() = Some(new_handle);
                    rx = new_rx;
                    callbacks.on_connected.emit(());
                    break;
                }
                Err(e) => {
                    error!("reconnect failed: {e}, retrying in {delay_ms} ms");
                }
            }
        }
    }
}

/// Drain one connection's events until it closes.
async fn pump_socket(
    rx: &mut mpsc::UnboundedReceiver<SocketEvent>,
    callbacks: &SourceCallbacks,
    tracker: &Arc<Mutex<RequestTracker>>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SocketEvent::Text(text) => match serde_json::from_str::<ControlResponse>(&text) {
                Ok(response) if response.id == BROADCAST_ID => {
                    callbacks
                        .on_broadcast
                        .emit(response.data.unwrap_or(serde_json::Value::Null));
                }
                Ok(response) => {
                    let result = match response.error {
                        Some(message) => Err(ClientError::Transport(message)),
                        None => Ok(response.data),
                    };
                    if !tracker.lock().unwrap().resolve(response.id, result) {
                        debug!("response for unknown request id {}", response.id);
                    }
                }
                Err(e) => {
                    warn!("unparseable control message: {e}");
                }
            },
            SocketEvent::Binary(frame) => match PacketBuf::parse(frame) {
                Ok(packet) => {
                    if tracker.lock().unwrap().should_ignore(packet.header.id) {
                        debug!("dropping stale frame id {}", packet.header.id);
                        continue;
                    }
                    let kind = StreamKind::from_packet_type(packet.header.packet_type)
                        .unwrap_or(StreamKind::Data);
                    let track = packet.metadata.clone().unwrap_or_default();
                    callbacks.on_data.emit(DataEvent {
                        track,
                        kind,
                        packet,
                    });
                }
                Err(e) => {
                    debug!("dropping malformed binary frame: {e}");
                }
            },
            SocketEvent::Closed => return,
        }
    }
}
