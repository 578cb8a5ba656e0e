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

//! Live stream playback.
//!
//! The player owns the decoder harness and the frame scheduler and advances
//! on two clocks: transport events (`handle_event`) and the renderer's
//! display cadence (`get_video_frame`). It is designed for the
//! single-owning-task model: one task owns the player, drains a source event
//! channel into it, and no player method blocks.
//!
//! The central invariant is keyframe gating: after configure, after a flush,
//! after decoder switch or queue overflow, no packet reaches the decoder
//! until a keyframe has been seen with the current codec identity. While
//! gated, keyframe requests go out at most once per second.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use sesame_scheduler::{FrameScheduler, FrameTiming, SchedulerConfig, SchedulerStats};
use sesame_types::{codec_changed, Callback, CodecData, PacketBuf, PacketType};
use tokio::sync::mpsc;

use crate::connection::{DataEvent, SourceCallbacks, SourceEvent, StreamKind};
use crate::constants::{DEFAULT_AUDIO_TRACK, DEFAULT_BUFFER_DELAY_MS, DEFAULT_VIDEO_TRACK, MAX_BUFFER_DELAY_MS};
use crate::decode::{
    AudioDecoderBackend, AudioHarness, DecoderFactory, DecoderHarness, DecoderKind, FrameCallback,
    VideoFrame,
};
use crate::error::ClientError;
use crate::packet_debug::packet_summary;
use crate::utils::KeyframeThrottle;

/// Arrival-map entries are pruned past this size; stale entries mean the
/// decoder dropped frames internally.
const ARRIVAL_MAP_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    /// Terminal.
    Error,
}

#[derive(Debug, Clone)]
pub struct LivePlayerConfig {
    pub preferred_decoder: DecoderKind,
    /// Playout delay in `[0, 5000]`; zero selects scheduler bypass.
    pub buffer_delay_ms: u32,
    pub enable_audio: bool,
    /// Track accepted for video; `None` accepts any track.
    pub video_track: Option<String>,
    /// Track accepted for audio; `None` accepts any track.
    pub audio_track: Option<String>,
    pub debug_logging: bool,
}

impl Default for LivePlayerConfig {
    fn default() -> Self {
        Self {
            preferred_decoder: DecoderKind::Hardware,
            buffer_delay_ms: DEFAULT_BUFFER_DELAY_MS,
            enable_audio: false,
            video_track: Some(DEFAULT_VIDEO_TRACK.to_string()),
            audio_track: Some(DEFAULT_AUDIO_TRACK.to_string()),
            debug_logging: false,
        }
    }
}

#[derive(Clone)]
pub struct LivePlayerCallbacks {
    pub on_state_change: Callback<PlayerState>,
    pub on_error: Callback<ClientError>,
    /// Wire this to `source.request_keyframe()`; emissions are already
    /// rate-limited.
    pub on_request_keyframe: Callback<()>,
}

impl Default for LivePlayerCallbacks {
    fn default() -> Self {
        Self {
            on_state_change: Callback::noop(),
            on_error: Callback::noop(),
            on_request_keyframe: Callback::noop(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ArrivalInfo {
    arrival_ms: u64,
    is_keyframe: bool,
}

struct AudioPipeline {
    harness: AudioHarness,
    current_codec: Option<CodecData>,
}

pub struct LivePlayer {
    config: LivePlayerConfig,
    callbacks: LivePlayerCallbacks,
    state: PlayerState,
    harness: DecoderHarness,
    scheduler: FrameScheduler<VideoFrame>,
    decoded_rx: mpsc::UnboundedReceiver<VideoFrame>,
    overflowed: Arc<AtomicBool>,
    current_codec: Option<CodecData>,
    waiting_for_keyframe: bool,
    configuring: bool,
    pending: VecDeque<PacketBuf>,
    arrival: HashMap<u64, ArrivalInfo>,
    keyframe_throttle: KeyframeThrottle,
    current_frame: Option<VideoFrame>,
    audio: Option<AudioPipeline>,
}

impl LivePlayer {
    pub fn new(
        config: LivePlayerConfig,
        callbacks: LivePlayerCallbacks,
        factory: Arc<dyn DecoderFactory>,
        audio_backend: Option<Box<dyn AudioDecoderBackend>>,
    ) -> Self {
        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        let on_frame: FrameCallback = Box::new(move |frame| {
            // The player pumps this channel; if it is gone, playback ended.
            let _ = decoded_tx.send(frame);
        });
        let overflowed = Arc::new(AtomicBool::new(false));
        let overflow_flag = overflowed.clone();
        let harness = DecoderHarness::new(
            factory,
            config.preferred_decoder,
            on_frame,
            Callback::from(move |_queued: usize| overflow_flag.store(true, Ordering::SeqCst)),
        );

        let delay_ms = config.buffer_delay_ms.min(MAX_BUFFER_DELAY_MS);
        let scheduler = FrameScheduler::new(
            SchedulerConfig::with_delay_ms(delay_ms),
            Box::new(|frame: VideoFrame, reason| {
                debug!("releasing frame ts={} ({reason:?})", frame.timestamp_us);
            }),
        );

        let audio = audio_backend.filter(|_| config.enable_audio).map(|backend| AudioPipeline {
            harness: AudioHarness::new(backend),
            current_codec: None,
        });

        Self {
            config,
            callbacks,
            state: PlayerState::Idle,
            harness,
            scheduler,
            decoded_rx,
            overflowed,
            current_codec: None,
            waiting_for_keyframe: true,
            configuring: false,
            pending: VecDeque::new(),
            arrival: HashMap::new(),
            keyframe_throttle: KeyframeThrottle::default(),
            current_frame: None,
            audio,
        }
    }

    /// Callback bundle that forwards source events into a channel; the task
    /// that owns this player drains the channel into [`handle_event`].
    ///
    /// [`handle_event`]: LivePlayer::handle_event
    pub fn source_callbacks(
        &self,
        sender: mpsc::UnboundedSender<SourceEvent>,
    ) -> SourceCallbacks {
        SourceCallbacks::into_channel(sender)
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn play(&mut self) {
        if matches!(self.state, PlayerState::Idle | PlayerState::Paused) {
            self.set_state(PlayerState::Playing);
        }
    }

    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.set_state(PlayerState::Paused);
        }
    }

    /// Advance the transport side of the state machine.
    pub fn handle_event(&mut self, event: SourceEvent, now_ms: u64) {
        match event {
            SourceEvent::Connected => {
                info!("source connected");
            }
            SourceEvent::Disconnected(reason) => {
                info!("source disconnected: {reason}");
                self.scheduler.clear();
                self.arrival.clear();
                self.waiting_for_keyframe = true;
            }
            SourceEvent::Error(e) => {
                self.fail(e);
            }
            SourceEvent::Data(data) => self.handle_data(data, now_ms),
            // Raw payloads and control broadcasts are application-level.
            SourceEvent::RawData(_) | SourceEvent::Broadcast(_) => {}
        }
    }

    fn handle_data(&mut self, event: DataEvent, now_ms: u64) {
        if self.state == PlayerState::Error {
            return;
        }
        if self.config.debug_logging {
            debug!("{} <- {}", event.track, packet_summary(&event.packet));
        }

        let is_audio = event.kind == StreamKind::Audio
            || event.packet.header.known_type() == Some(PacketType::AudioFrame);
        if is_audio {
            if track_matches(self.config.audio_track.as_deref(), &event.track) {
                self.handle_audio_packet(event.packet);
            }
            return;
        }
        if event.kind == StreamKind::Video
            && track_matches(self.config.video_track.as_deref(), &event.track)
        {
            self.handle_video_packet(event.packet, now_ms);
        }
    }

    fn handle_video_packet(&mut self, packet: PacketBuf, now_ms: u64) {
        if self.configuring {
            self.pending.push_back(packet);
            return;
        }

        if let Some(cd) = packet.codec_data {
            if codec_changed(self.current_codec.as_ref(), Some(&cd)) {
                if packet.is_keyframe() {
                    self.reconfigure(cd, packet, now_ms);
                } else {
                    debug!("codec changed on a delta frame, waiting for a keyframe");
                    self.waiting_for_keyframe = true;
                    self.maybe_request_keyframe(now_ms);
                }
                return;
            }
        }

        self.decode_gated(packet, now_ms);
        self.after_decode(now_ms);
    }

    /// Codec identity changed on a keyframe: queue it, reconfigure, then
    /// drain everything queued while the decoder was configuring.
    fn reconfigure(&mut self, cd: CodecData, keyframe: PacketBuf, now_ms: u64) {
        info!(
            "codec change: {}x{} codec_type {}",
            cd.width, cd.height, cd.codec_type
        );
        self.configuring = true;
        self.pending.push_back(keyframe);

        match self.harness.configure(&cd) {
            Ok(()) => {
                self.current_codec = Some(cd);
                self.waiting_for_keyframe = true; // cleared by the queued keyframe
                self.configuring = false;
                let queued: Vec<PacketBuf> = self.pending.drain(..).collect();
                for packet in queued {
                    self.decode_gated(packet, now_ms);
                }
                self.after_decode(now_ms);
            }
            Err(e) => {
                self.configuring = false;
                self.pending.clear();
                self.fail(e);
            }
        }
    }

    /// Decode one packet, subject to the wait-for-keyframe gate.
    fn decode_gated(&mut self, packet: PacketBuf, now_ms: u64) {
        if self.waiting_for_keyframe {
            if packet.is_keyframe() {
                self.waiting_for_keyframe = false;
                self.keyframe_throttle.reset();
            } else {
                debug!("dropping delta frame while waiting for a keyframe");
                self.maybe_request_keyframe(now_ms);
                return;
            }
        }

        let ts_us = self.harness.packet_timestamp_us(&packet);
        self.arrival.insert(
            ts_us,
            ArrivalInfo {
                arrival_ms: now_ms,
                is_keyframe: packet.is_keyframe(),
            },
        );
        if self.arrival.len() > ARRIVAL_MAP_LIMIT {
            let cutoff = ts_us.saturating_sub(10_000_000);
            self.arrival.retain(|&ts, _| ts >= cutoff);
        }

        if let Err(e) = self.harness.decode_packet(&packet) {
            self.fail(e);
        }
    }

    /// Post-decode bookkeeping: recover from queue overflow and move decoded
    /// frames into the scheduler.
    fn after_decode(&mut self, now_ms: u64) {
        if self.overflowed.swap(false, Ordering::SeqCst) {
            warn!("decoder overflow, flushing and re-keying");
            self.harness.flush();
            self.scheduler.clear();
            self.arrival.clear();
            self.waiting_for_keyframe = true;
            self.maybe_request_keyframe(now_ms);
        }
        self.pump_decoded(now_ms);
    }

    fn pump_decoded(&mut self, now_ms: u64) {
        while let Ok(frame) = self.decoded_rx.try_recv() {
            let ts_us = frame.timestamp_us;
            let info = self
                .arrival
                .remove(&ts_us)
                .unwrap_or(ArrivalInfo {
                    arrival_ms: now_ms,
                    is_keyframe: false,
                });
            self.scheduler.enqueue(
                frame,
                ts_us,
                FrameTiming {
                    arrival_time_ms: info.arrival_ms,
                    decode_time_ms: now_ms,
                    is_keyframe: info.is_keyframe,
                },
            );
        }
    }

    /// The renderer's entry point, called at display cadence.
    ///
    /// Outside `Playing` this returns the last displayed frame without
    /// consulting the scheduler. In `Playing` it pulls the frame due at
    /// `now_ms`; a superseded display frame is released on replacement.
    pub fn get_video_frame(&mut self, now_ms: u64) -> Option<&VideoFrame> {
        if self.state != PlayerState::Playing {
            return self.current_frame.as_ref();
        }
        self.pump_decoded(now_ms);
        if let Some(frame) = self.scheduler.dequeue(now_ms) {
            self.current_frame = Some(frame);
        }
        self.current_frame.as_ref()
    }

    /// Switch decoder preference. Crossing the implementation family tears
    /// the pipeline down and re-keys; switching within a family only affects
    /// the next configure.
    pub fn set_preferred_decoder(&mut self, kind: DecoderKind, now_ms: u64) {
        let live_family = self
            .harness
            .active_kind()
            .unwrap_or(self.harness.preferred_kind())
            .family();
        self.harness.set_preferred_kind(kind);
        if kind.family() != live_family {
            info!("decoder family change, rebuilding pipeline");
            self.harness.dispose();
            self.scheduler.clear();
            self.arrival.clear();
            self.current_codec = None;
            self.waiting_for_keyframe = true;
            self.maybe_request_keyframe(now_ms);
        }
    }

    /// Flush the pipeline: decoder flush, scheduler clear, re-key.
    pub fn flush(&mut self, now_ms: u64) {
        self.harness.flush();
        self.scheduler.clear();
        self.arrival.clear();
        self.waiting_for_keyframe = true;
        self.maybe_request_keyframe(now_ms);
    }

    pub fn set_buffer_delay(&mut self, buffer_delay_ms: u32) {
        self.scheduler
            .set_buffer_delay(buffer_delay_ms.min(MAX_BUFFER_DELAY_MS));
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn is_waiting_for_keyframe(&self) -> bool {
        self.waiting_for_keyframe
    }

    fn handle_audio_packet(&mut self, packet: PacketBuf) {
        let mut failure = None;
        if let Some(pipeline) = self.audio.as_mut() {
            if let Some(cd) = packet.codec_data {
                if codec_changed(pipeline.current_codec.as_ref(), Some(&cd)) {
                    match pipeline.harness.configure(&cd) {
                        Ok(()) => pipeline.current_codec = Some(cd),
                        Err(e) => failure = Some(e),
                    }
                }
            }
            // Decode only once a codec block has been seen.
            if failure.is_none() && pipeline.current_codec.is_some() {
                if let Err(e) = pipeline.harness.decode_packet(&packet) {
                    warn!("audio decode error: {e}");
                }
            }
        }
        if let Some(e) = failure {
            self.fail(e);
        }
    }

    fn maybe_request_keyframe(&mut self, now_ms: u64) {
        if self.keyframe_throttle.ready(now_ms) {
            self.callbacks.on_request_keyframe.emit(());
        }
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state == PlayerState::Error || self.state == state {
            return;
        }
        self.state = state;
        self.callbacks.on_state_change.emit(state);
    }

    /// Surface one error event. Configure failures keep the pipeline alive —
    /// a keyframe with a different codec identity can recover — everything
    /// else is terminal.
    fn fail(&mut self, e: ClientError) {
        match &e {
            ClientError::ConfigureFailed(_) => {
                self.current_codec = None;
                self.waiting_for_keyframe = true;
            }
            _ => self.set_state(PlayerState::Error),
        }
        self.callbacks.on_error.emit(e);
    }
}

fn track_matches(filter: Option<&str>, track: &str) -> bool {
    match filter {
        None => true,
        // Sources that do not name tracks deliver an empty name.
        Some(name) => track.is_empty() || track == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_filter_rules() {
        assert!(track_matches(None, "anything"));
        assert!(track_matches(Some("video"), "video"));
        assert!(track_matches(Some("video"), ""));
        assert!(!track_matches(Some("video"), "screen"));
    }
}
