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

//! Packet sinks for the capture direction.
//!
//! Both sinks sit on top of a [`SinkTransport`] (the actual connection is an
//! external collaborator). The socket sink sends one message per packet; the
//! broadcast sink partitions packets into delivery groups: video starts a new
//! group at every keyframe, audio every [`AUDIO_GROUP_LENGTH`] packets, and
//! auxiliary data on every send. `send_data` writes raw caller bytes — the
//! wire format is never applied on data tracks.

use async_trait::async_trait;
use bytes::Bytes;
use sesame_types::Callback;

use super::StreamKind;
use crate::constants::{AUDIO_GROUP_LENGTH, DEFAULT_AUDIO_TRACK, DEFAULT_VIDEO_TRACK};
use crate::error::Result;

/// A wire-serialized Sesame packet headed for a sink.
#[derive(Debug, Clone)]
pub struct SerializedPacket {
    pub bytes: Bytes,
    pub is_keyframe: bool,
    pub timestamp_us: u64,
    pub kind: StreamKind,
}

/// The transport under a sink: an ordered, message-oriented channel that can
/// mark group boundaries. Transports without a group concept ignore the flag.
#[async_trait]
pub trait SinkTransport: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self);
    fn send_frame(&mut self, track: &str, payload: Bytes, new_group: bool) -> Result<()>;
}

/// Uniform sink interface consumed by the capture pipeline.
#[async_trait]
pub trait PacketSink: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self);
    fn send(&mut self, packet: SerializedPacket) -> Result<()>;
    /// Raw bytes on an auxiliary data track, bypassing the wire codec.
    fn send_data(&mut self, track: &str, payload: Bytes) -> Result<()>;
    /// Register the peer's keyframe-request feedback.
    fn set_keyframe_request_handler(&mut self, handler: Callback<()>);
    fn dispose(&mut self);
}

/// One message per packet, no grouping. The shape WebSocket-style transports
/// want.
pub struct SocketSink<T: SinkTransport> {
    transport: T,
    track: String,
    on_keyframe_request: Callback<()>,
}

impl<T: SinkTransport> SocketSink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            track: DEFAULT_VIDEO_TRACK.to_string(),
            on_keyframe_request: Callback::noop(),
        }
    }

    /// Called by the embedding transport when the peer asks for a keyframe.
    pub fn keyframe_requested(&self) {
        self.on_keyframe_request.emit(());
    }
}

#[async_trait]
impl<T: SinkTransport> PacketSink for SocketSink<T> {
    async fn connect(&mut self) -> Result<()> {
        self.transport.connect().await
    }

    async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }

    fn send(&mut self, packet: SerializedPacket) -> Result<()> {
        self.transport.send_frame(&self.track, packet.bytes, false)
    }

    fn send_data(&mut self, track: &str, payload: Bytes) -> Result<()> {
        self.transport.send_frame(track, payload, false)
    }

    fn set_keyframe_request_handler(&mut self, handler: Callback<()>) {
        self.on_keyframe_request = handler;
    }

    fn dispose(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct BroadcastSinkConfig {
    pub video_track: String,
    pub audio_track: String,
    /// Packets per group on the audio track.
    pub audio_group_length: u64,
}

impl Default for BroadcastSinkConfig {
    fn default() -> Self {
        Self {
            video_track: DEFAULT_VIDEO_TRACK.to_string(),
            audio_track: DEFAULT_AUDIO_TRACK.to_string(),
            audio_group_length: AUDIO_GROUP_LENGTH,
        }
    }
}

/// Session-broadcast sink: packets are partitioned into groups, the unit of
/// atomic delivery on subscription transports.
pub struct BroadcastSink<T: SinkTransport> {
    transport: T,
    config: BroadcastSinkConfig,
    /// False until a video group has been opened; also reset by a keyframe
    /// request so the next video packet starts a fresh group.
    video_group_open: bool,
    audio_sent: u64,
    on_keyframe_request: Callback<()>,
}

impl<T: SinkTransport> BroadcastSink<T> {
    pub fn new(transport: T, config: BroadcastSinkConfig) -> Self {
        Self {
            transport,
            config,
            video_group_open: false,
            audio_sent: 0,
            on_keyframe_request: Callback::noop(),
        }
    }

    /// Called by the embedding transport when a subscriber asks for a
    /// keyframe. Resets the video group state: whatever the encoder emits
    /// next starts a fresh group.
    pub fn keyframe_requested(&mut self) {
        self.video_group_open = false;
        self.on_keyframe_request.emit(());
    }
}

#[async_trait]
impl<T: SinkTransport> PacketSink for BroadcastSink<T> {
    async fn connect(&mut self) -> Result<()> {
        self.transport.connect().await
    }

    async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }

    fn send(&mut self, packet: SerializedPacket) -> Result<()> {
        match packet.kind {
            StreamKind::Video => {
                let new_group = packet.is_keyframe || !self.video_group_open;
                self.video_group_open = true;
                self.transport
                    .send_frame(&self.config.video_track, packet.bytes, new_group)
            }
            StreamKind::Audio => {
                let new_group = self.audio_sent % self.config.audio_group_length == 0;
                self.audio_sent += 1;
                self.transport
                    .send_frame(&self.config.audio_track, packet.bytes, new_group)
            }
            // Sesame-framed packets on a data track still group per send.
            StreamKind::Data => self
                .transport
                .send_frame(&self.config.video_track, packet.bytes, true),
        }
    }

    fn send_data(&mut self, track: &str, payload: Bytes) -> Result<()> {
        self.transport.send_frame(track, payload, true)
    }

    fn set_keyframe_request_handler(&mut self, handler: Callback<()>) {
        self.on_keyframe_request = handler;
    }

    fn dispose(&mut self) {}
}
