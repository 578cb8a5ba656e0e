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

//! Transport adapters: a uniform stream-source interface over session-shaped
//! transports, and packet sinks for the capture direction.
//!
//! Sources deliver parsed Sesame packets plus connection lifecycle events to
//! registered callbacks. Events may be delivered from any task; ordering is
//! guaranteed within a track, never across tracks.

mod request_socket;
mod sink;
mod subscriber;

pub use request_socket::{
    Command, ControlSocket, RequestSocketConfig, RequestSocketSource, RequestTracker,
    SocketEvent, SocketHandle,
};
pub use sink::{BroadcastSink, BroadcastSinkConfig, PacketSink, SerializedPacket, SinkTransport, SocketSink};
pub use subscriber::{
    SessionConnector, SessionEvent, SessionHandle, SessionState, SubscriberSource,
    TrackSubscription,
};

use async_trait::async_trait;
use bytes::Bytes;
use sesame_types::{Callback, PacketBuf, PacketType};

use crate::error::{ClientError, Result};

/// What a track carries. Media tracks are parsed with the Sesame wire codec;
/// data tracks always surface raw payloads, never Sesame frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Data,
}

impl StreamKind {
    pub fn is_media(&self) -> bool {
        !matches!(self, StreamKind::Data)
    }

    /// The stream kind implied by a packet's wire type, when any.
    pub fn from_packet_type(packet_type: u16) -> Option<Self> {
        match PacketType::from_u16(packet_type)? {
            PacketType::VideoFrame => Some(StreamKind::Video),
            PacketType::AudioFrame => Some(StreamKind::Audio),
            _ => None,
        }
    }
}

/// A parsed media packet delivered by a source.
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub track: String,
    pub kind: StreamKind,
    pub packet: PacketBuf,
}

/// A raw payload from a data track; the wire codec is not applied.
#[derive(Debug, Clone)]
pub struct RawDataEvent {
    pub track: String,
    pub payload: Bytes,
}

/// Everything a source can tell the player.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Connected,
    Disconnected(String),
    Error(ClientError),
    Data(DataEvent),
    RawData(RawDataEvent),
    /// Server broadcast on the request/response control channel.
    Broadcast(serde_json::Value),
}

/// Callback bundle registered with a source before connecting.
#[derive(Clone)]
pub struct SourceCallbacks {
    pub on_connected: Callback<()>,
    pub on_disconnected: Callback<String>,
    pub on_error: Callback<ClientError>,
    pub on_data: Callback<DataEvent>,
    pub on_raw_data: Callback<RawDataEvent>,
    /// Server broadcast messages on the request/response control channel.
    pub on_broadcast: Callback<serde_json::Value>,
}

impl Default for SourceCallbacks {
    fn default() -> Self {
        Self {
            on_connected: Callback::noop(),
            on_disconnected: Callback::noop(),
            on_error: Callback::noop(),
            on_data: Callback::noop(),
            on_raw_data: Callback::noop(),
            on_broadcast: Callback::noop(),
        }
    }
}

impl SourceCallbacks {
    /// Forward every event into a channel, for the single-owning-task model
    /// where one task owns the player and drains the channel.
    pub fn into_channel(sender: tokio::sync::mpsc::UnboundedSender<SourceEvent>) -> Self {
        let send = move |event: SourceEvent| {
            // The receiver dropping just means playback stopped first.
            let _ = sender.send(event);
        };
        let s = send.clone();
        let on_connected = Callback::from(move |()| s(SourceEvent::Connected));
        let s = send.clone();
        let on_disconnected = Callback::from(move |reason| s(SourceEvent::Disconnected(reason)));
        let s = send.clone();
        let on_error = Callback::from(move |err| s(SourceEvent::Error(err)));
        let s = send.clone();
        let on_data = Callback::from(move |data| s(SourceEvent::Data(data)));
        let s = send.clone();
        let on_raw_data = Callback::from(move |raw| s(SourceEvent::RawData(raw)));
        let s = send.clone();
        let on_broadcast = Callback::from(move |value| s(SourceEvent::Broadcast(value)));
        Self {
            on_connected,
            on_disconnected,
            on_error,
            on_data,
            on_raw_data,
            on_broadcast,
        }
    }
}

/// Uniform interface over the stream transports.
///
/// `connect` is the only long suspension point; everything else returns
/// immediately. Keyframe requests are best-effort and may be dropped by
/// transports that cannot express them.
#[async_trait]
pub trait StreamSource: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self);
    fn request_keyframe(&mut self) {}
    fn dispose(&mut self);
}
