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

//! Local file playback: demux → decode → display.
//!
//! The container demuxer is an external collaborator that yields codec
//! descriptions and flat sample lists with microsecond timestamps. The
//! player feeds the decoders lazily against a wall-clock playhead, keeps
//! decoded frames in a pts-ordered buffer, and displays the latest frame at
//! or before the playhead. Seeking jumps to the nearest keyframe at or
//! before the target and rebuilds the decode state from there.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use sesame_types::{Callback, Timebase};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::constants::{
    AUDIO_LOOK_AHEAD_MS, BUFFER_READY_TIMEOUT_MS, MAX_DECODER_QUEUE, MIN_BUFFER_FRAMES,
};
use crate::decode::{
    AudioDecoderBackend, AudioDecoderConfig, AudioHarness, DecoderConfig, DecoderFactory,
    DecoderHarness, DecoderKind, EncodedChunk, FrameCallback, VideoFrame,
};
use crate::error::{ClientError, Result};

/// Poll interval of the buffer-ready barrier.
const BARRIER_POLL_MS: u64 = 20;

/// One demuxed sample. Timestamps are in microseconds.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub data: Bytes,
    pub pts_us: u64,
    pub duration_us: u64,
    pub is_key: bool,
}

/// Codec description for one track, as the demuxer reports it.
#[derive(Debug, Clone)]
pub struct TrackDescription {
    /// Codec-registry string, e.g. `avc1.64001f`.
    pub codec: String,
    /// Out-of-band decoder description (avcC / hvcC / …), when present.
    pub description: Option<Bytes>,
    pub width: u16,
    pub height: u16,
    pub sample_rate: u32,
    pub channels: u8,
}

#[derive(Debug, Clone)]
pub struct DemuxedTrack {
    pub info: TrackDescription,
    pub samples: Vec<MediaSample>,
}

#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub video: Option<DemuxedTrack>,
    pub audio: Option<DemuxedTrack>,
    pub duration_us: u64,
}

/// The container demuxer (external collaborator).
#[async_trait]
pub trait Demuxer: Send {
    async fn load(&mut self) -> Result<MediaInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePlayerState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    /// Terminal.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Once,
    Loop,
}

#[derive(Debug, Clone)]
pub struct FilePlayerConfig {
    pub preferred_decoder: DecoderKind,
    pub play_mode: PlayMode,
    pub enable_audio: bool,
    /// Pending-chunk ceiling for lazy feeding.
    pub max_decoder_queue: usize,
    /// How far past the playhead audio samples are fed.
    pub audio_look_ahead_ms: u64,
    /// Frames that must decode before `load` returns.
    pub min_buffer_frames: usize,
    pub buffer_ready_timeout_ms: u64,
}

impl Default for FilePlayerConfig {
    fn default() -> Self {
        Self {
            preferred_decoder: DecoderKind::Hardware,
            play_mode: PlayMode::Once,
            enable_audio: false,
            max_decoder_queue: MAX_DECODER_QUEUE,
            audio_look_ahead_ms: AUDIO_LOOK_AHEAD_MS,
            min_buffer_frames: MIN_BUFFER_FRAMES,
            buffer_ready_timeout_ms: BUFFER_READY_TIMEOUT_MS,
        }
    }
}

#[derive(Clone)]
pub struct FilePlayerCallbacks {
    pub on_state_change: Callback<FilePlayerState>,
    pub on_error: Callback<ClientError>,
    /// Emitted each time loop mode wraps back to the start.
    pub on_loop: Callback<()>,
}

impl Default for FilePlayerCallbacks {
    fn default() -> Self {
        Self {
            on_state_change: Callback::noop(),
            on_error: Callback::noop(),
            on_loop: Callback::noop(),
        }
    }
}

pub struct FilePlayer {
    config: FilePlayerConfig,
    callbacks: FilePlayerCallbacks,
    state: FilePlayerState,
    video_harness: DecoderHarness,
    audio_harness: Option<AudioHarness>,
    decoded_rx: mpsc::UnboundedReceiver<VideoFrame>,
    media: Option<MediaInfo>,
    video_index: usize,
    audio_index: usize,
    /// Decoded frames ordered by pts.
    frames: Vec<VideoFrame>,
    current_frame: Option<VideoFrame>,
    /// Wall clock at the moment playback last (re)started.
    play_start_real_ms: Option<u64>,
    /// Playhead at that moment; the frozen playhead while paused.
    play_start_position_us: u64,
}

impl FilePlayer {
    pub fn new(
        config: FilePlayerConfig,
        callbacks: FilePlayerCallbacks,
        factory: Arc<dyn DecoderFactory>,
        audio_backend: Option<Box<dyn AudioDecoderBackend>>,
    ) -> Self {
        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        let on_frame: FrameCallback = Box::new(move |frame| {
            let _ = decoded_tx.send(frame);
        });
        let video_harness = DecoderHarness::new(
            factory,
            config.preferred_decoder,
            on_frame,
            Callback::from(|queued: usize| debug!("file decoder overflow at {queued}")),
        )
        .with_max_queue_size(config.max_decoder_queue);

        let audio_harness = audio_backend
            .filter(|_| config.enable_audio)
            .map(AudioHarness::new);

        Self {
            config,
            callbacks,
            state: FilePlayerState::Idle,
            video_harness,
            audio_harness,
            decoded_rx,
            media: None,
            video_index: 0,
            audio_index: 0,
            frames: Vec::new(),
            current_frame: None,
            play_start_real_ms: None,
            play_start_position_us: 0,
        }
    }

    pub fn state(&self) -> FilePlayerState {
        self.state
    }

    pub fn duration_us(&self) -> u64 {
        self.media.as_ref().map(|m| m.duration_us).unwrap_or(0)
    }

    /// Demux the container, configure the decoders and wait until the first
    /// frames have decoded (or a 5 s deadline passes).
    pub async fn load(&mut self, demuxer: &mut dyn Demuxer) -> Result<()> {
        self.set_state(FilePlayerState::Loading);

        let media = match demuxer.load().await {
            Ok(media) => media,
            Err(e) => return Err(self.fail(e)),
        };

        if let Some(video) = &media.video {
            let config = DecoderConfig {
                codec: video.info.codec.clone(),
                coded_width: video.info.width,
                coded_height: video.info.height,
                description: video.info.description.clone(),
            };
            if let Err(e) = self
                .video_harness
                .configure_with(config, Timebase::MICROSECONDS)
            {
                return Err(self.fail(e));
            }
        }
        if let (Some(harness), Some(audio)) = (self.audio_harness.as_mut(), &media.audio) {
            let config = AudioDecoderConfig {
                codec: audio.info.codec.clone(),
                sample_rate: audio.info.sample_rate,
                channels: audio.info.channels.max(1),
            };
            if let Err(e) = harness.configure_with(config) {
                return Err(self.fail(e));
            }
        }

        info!(
            "loaded media: {} video samples, {} audio samples, {} us",
            media.video.as_ref().map(|t| t.samples.len()).unwrap_or(0),
            media.audio.as_ref().map(|t| t.samples.len()).unwrap_or(0),
            media.duration_us
        );
        self.media = Some(media);
        self.video_index = 0;
        self.audio_index = 0;
        self.frames.clear();
        self.current_frame = None;
        self.play_start_real_ms = None;
        self.play_start_position_us = 0;

        self.buffer_ready_barrier().await?;
        self.set_state(FilePlayerState::Ready);
        Ok(())
    }

    /// Block until `min_buffer_frames` frames have decoded, or the deadline
    /// passes. One frame at the deadline is enough to proceed; none is a
    /// load failure.
    async fn buffer_ready_barrier(&mut self) -> Result<()> {
        if self.media.as_ref().and_then(|m| m.video.as_ref()).is_none() {
            return Ok(());
        }
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_millis(self.config.buffer_ready_timeout_ms);
        loop {
            self.feed_video();
            self.pump_decoded();
            if self.frames.len() >= self.config.min_buffer_frames {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                if !self.frames.is_empty() {
                    return Ok(());
                }
                return Err(self.fail(ClientError::BufferReadyTimeout(
                    "no frames decoded in time; the container may not be laid out \
                     progressively (try remuxing with interleaved samples)"
                        .into(),
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(BARRIER_POLL_MS)).await;
        }
    }

    pub fn play(&mut self, now_ms: u64) {
        match self.state {
            FilePlayerState::Ready | FilePlayerState::Paused => {
                self.play_start_real_ms = Some(now_ms);
                self.set_state(FilePlayerState::Playing);
            }
            FilePlayerState::Ended => {
                // Restart from the top.
                self.rewind(now_ms);
                self.set_state(FilePlayerState::Playing);
            }
            _ => {}
        }
    }

    pub fn pause(&mut self, now_ms: u64) {
        if self.state == FilePlayerState::Playing {
            self.play_start_position_us = self.position_us(now_ms);
            self.play_start_real_ms = None;
            self.set_state(FilePlayerState::Paused);
        }
    }

    /// The playhead in microseconds.
    pub fn position_us(&self, now_ms: u64) -> u64 {
        match self.play_start_real_ms {
            Some(start_ms) => {
                self.play_start_position_us + now_ms.saturating_sub(start_ms) * 1000
            }
            None => self.play_start_position_us,
        }
    }

    /// Drive the pipeline: feed the decoders against the playhead, collect
    /// decoded frames, pick the display frame, and handle end of stream.
    /// Call at display cadence while playing.
    pub fn advance(&mut self, now_ms: u64) {
        if self.state != FilePlayerState::Playing {
            return;
        }
        let position = self.position_us(now_ms);

        self.feed_video();
        self.feed_audio(position);
        self.pump_decoded();
        self.select_display_frame(position);

        let duration = self.duration_us();
        if duration > 0 && position >= duration {
            match self.config.play_mode {
                PlayMode::Loop => {
                    debug!("looping back to the start");
                    self.rewind(now_ms);
                    self.callbacks.on_loop.emit(());
                }
                PlayMode::Once => {
                    self.play_start_position_us = duration;
                    self.play_start_real_ms = None;
                    self.set_state(FilePlayerState::Ended);
                }
            }
        }
    }

    /// The frame to show right now. Stable between `advance` calls.
    pub fn current_frame(&self) -> Option<&VideoFrame> {
        self.current_frame.as_ref()
    }

    /// Jump to the nearest keyframe at or before `target_us`: both sample
    /// cursors move, both decoders reset, and the frame buffer is dropped.
    pub fn seek(&mut self, target_us: u64, now_ms: u64) {
        let Some(media) = self.media.as_ref() else {
            return;
        };
        let Some(video) = media.video.as_ref() else {
            return;
        };

        let keyframe_index = video
            .samples
            .iter()
            .enumerate()
            .take_while(|(_, s)| s.pts_us <= target_us)
            .filter(|(_, s)| s.is_key)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0);
        let keyframe_pts = video
            .samples
            .get(keyframe_index)
            .map(|s| s.pts_us)
            .unwrap_or(0);

        let audio_start = media.audio.as_ref().map(|track| {
            track
                .samples
                .iter()
                .position(|s| s.pts_us >= keyframe_pts)
                .unwrap_or(track.samples.len())
        });

        info!("seek to {target_us} us -> keyframe at {keyframe_pts} us");
        self.video_index = keyframe_index;
        if let Some(index) = audio_start {
            self.audio_index = index;
        }
        self.video_harness.reset();
        if let Some(audio) = self.audio_harness.as_mut() {
            audio.reset();
        }
        self.drop_buffered_frames();

        self.play_start_position_us = keyframe_pts;
        if self.play_start_real_ms.is_some() {
            self.play_start_real_ms = Some(now_ms);
        }
        if self.state == FilePlayerState::Ended {
            self.set_state(FilePlayerState::Paused);
        }

        self.feed_video();
    }

    fn rewind(&mut self, now_ms: u64) {
        self.video_index = 0;
        self.audio_index = 0;
        self.drop_buffered_frames();
        self.play_start_position_us = 0;
        self.play_start_real_ms = Some(now_ms);
        // Sample 0 is a keyframe, so the decoders need no reconfigure.
        self.video_harness.reset();
        if let Some(audio) = self.audio_harness.as_mut() {
            audio.reset();
        }
    }

    fn drop_buffered_frames(&mut self) {
        // Dropping releases each frame's handle.
        self.frames.clear();
        while self.decoded_rx.try_recv().is_ok() {}
    }

    /// Keep the video decoder's pending queue topped up, never deeper than
    /// `max_decoder_queue`.
    fn feed_video(&mut self) {
        let Some(track) = self.media.as_ref().and_then(|m| m.video.as_ref()) else {
            return;
        };
        while self.video_index < track.samples.len()
            && self.video_harness.queue_size() < self.config.max_decoder_queue
        {
            let sample = &track.samples[self.video_index];
            let chunk = EncodedChunk {
                data: sample.data.clone(),
                timestamp_us: sample.pts_us,
                duration_us: Some(sample.duration_us),
                is_key: sample.is_key,
            };
            self.video_index += 1;
            if let Err(e) = self.video_harness.decode_chunk(chunk) {
                self.state = FilePlayerState::Error;
                self.callbacks.on_state_change.emit(FilePlayerState::Error);
                self.callbacks.on_error.emit(e);
                return;
            }
        }
    }

    /// Feed audio up to the playhead plus the look-ahead window.
    fn feed_audio(&mut self, position_us: u64) {
        let Some(harness) = self.audio_harness.as_mut() else {
            return;
        };
        let Some(track) = self.media.as_ref().and_then(|m| m.audio.as_ref()) else {
            return;
        };
        let horizon = position_us + self.config.audio_look_ahead_ms * 1000;
        while self.audio_index < track.samples.len() {
            let sample = &track.samples[self.audio_index];
            if sample.pts_us > horizon {
                break;
            }
            let chunk = EncodedChunk {
                data: sample.data.clone(),
                timestamp_us: sample.pts_us,
                duration_us: Some(sample.duration_us),
                is_key: sample.is_key,
            };
            self.audio_index += 1;
            if let Err(e) = harness.decode_chunk(chunk) {
                debug!("audio decode error: {e}");
                break;
            }
        }
    }

    fn pump_decoded(&mut self) {
        while let Ok(frame) = self.decoded_rx.try_recv() {
            let at = self
                .frames
                .partition_point(|f| f.timestamp_us <= frame.timestamp_us);
            self.frames.insert(at, frame);
        }
    }

    /// Show the latest decoded frame at or before the playhead and release
    /// everything older.
    fn select_display_frame(&mut self, position_us: u64) {
        let due = self
            .frames
            .partition_point(|f| f.timestamp_us <= position_us);
        if due == 0 {
            return;
        }
        // due - 1 is displayed; 0..due-1 are stale and released on drain.
        let mut shown = self.frames.drain(..due).next_back();
        if let Some(frame) = shown.take() {
            self.current_frame = Some(frame);
        }
    }

    fn set_state(&mut self, state: FilePlayerState) {
        if self.state == FilePlayerState::Error || self.state == state {
            return;
        }
        self.state = state;
        self.callbacks.on_state_change.emit(state);
    }

    fn fail(&mut self, e: ClientError) -> ClientError {
        self.set_state(FilePlayerState::Error);
        self.callbacks.on_error.emit(e.clone());
        e
    }
}
