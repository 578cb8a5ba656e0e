/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Lifecycle wrapper around a [`VideoDecoderBackend`].
//!
//! The harness selects an implementation (preferring hardware when asked,
//! falling back to software when unsupported), converts packet timestamps to
//! microseconds, tags chunks key/delta, and watches queue pressure: when the
//! decoder falls behind by more than `max_queue_size` chunks the incoming
//! chunk is dropped and the overflow callback fires — the player responds by
//! flushing and requesting a keyframe, so overflow is never fatal.

use log::{debug, warn};
use sesame_types::{codec_string, rescale, Callback, CodecData, PacketBuf, Timebase};
use std::sync::{Arc, Mutex};

use super::backend::{
    DecoderConfig, DecoderFactory, DecoderKind, EncodedChunk, FrameCallback, VideoDecoderBackend,
};
use crate::constants::MAX_DECODER_QUEUE;
use crate::error::{ClientError, Result};

/// The canonical configured state the player reasons about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredState {
    pub codec: String,
    pub width: u16,
    pub height: u16,
}

pub struct DecoderHarness {
    factory: Arc<dyn DecoderFactory>,
    preferred: DecoderKind,
    max_queue_size: usize,
    backend: Option<Box<dyn VideoDecoderBackend>>,
    configured: Option<ConfiguredState>,
    /// Timebase of the live stream's pts values, cached at configure.
    timebase: Timebase,
    on_frame: Arc<Mutex<FrameCallback>>,
    on_overflow: Callback<usize>,
}

impl DecoderHarness {
    pub fn new(
        factory: Arc<dyn DecoderFactory>,
        preferred: DecoderKind,
        on_frame: FrameCallback,
        on_overflow: Callback<usize>,
    ) -> Self {
        Self {
            factory,
            preferred,
            max_queue_size: MAX_DECODER_QUEUE,
            backend: None,
            configured: None,
            timebase: Timebase::MICROSECONDS,
            on_frame: Arc::new(Mutex::new(on_frame)),
            on_overflow,
        }
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn preferred_kind(&self) -> DecoderKind {
        self.preferred
    }

    pub fn set_preferred_kind(&mut self, kind: DecoderKind) {
        self.preferred = kind;
    }

    pub fn configured(&self) -> Option<&ConfiguredState> {
        self.configured.as_ref()
    }

    /// The kind actually running, which may be the software fallback.
    pub fn active_kind(&self) -> Option<DecoderKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    /// Configure from a live stream's codec block.
    pub fn configure(&mut self, codec_data: &CodecData) -> Result<()> {
        let codec = codec_string(codec_data).ok_or_else(|| {
            ClientError::UnsupportedCodec(format!("codec_type {}", codec_data.codec_type))
        })?;
        let config = DecoderConfig {
            codec,
            coded_width: codec_data.width,
            coded_height: codec_data.height,
            description: None,
        };
        let timebase = Timebase::new(codec_data.timebase_num, codec_data.timebase_den);
        self.configure_with(
            config,
            if timebase.is_valid() {
                timebase
            } else {
                Timebase::MICROSECONDS
            },
        )
    }

    /// Configure from an explicit decoder config (the file path, where the
    /// demuxer supplies the codec string and description directly).
    pub fn configure_with(&mut self, config: DecoderConfig, timebase: Timebase) -> Result<()> {
        let mut supported_but_failed: Option<ClientError> = None;

        for kind in candidate_kinds(self.preferred) {
            let reusable = matches!(&self.backend, Some(b) if b.kind() == kind);
            if !reusable {
                let sink = self.on_frame.clone();
                let forward: FrameCallback = Box::new(move |frame| (sink.lock().unwrap())(frame));
                match self.factory.create(kind, forward) {
                    Some(backend) => self.backend = Some(backend),
                    None => {
                        debug!("no {kind:?} decoder available");
                        continue;
                    }
                }
            }

            let backend = match self.backend.as_mut() {
                Some(b) => b,
                None => continue,
            };
            if !backend.supports(&config) {
                debug!("{kind:?} decoder does not support {}", config.codec);
                continue;
            }
            match backend.configure(&config) {
                Ok(()) => {
                    self.configured = Some(ConfiguredState {
                        codec: config.codec.clone(),
                        width: config.coded_width,
                        height: config.coded_height,
                    });
                    self.timebase = timebase;
                    debug!(
                        "configured {kind:?} decoder for {} {}x{}",
                        config.codec, config.coded_width, config.coded_height
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!("{kind:?} decoder rejected {}: {e}", config.codec);
                    supported_but_failed = Some(e);
                }
            }
        }

        self.configured = None;
        Err(match supported_but_failed {
            Some(ClientError::Wire(e)) => ClientError::ConfigureFailed(e.to_string()),
            Some(e @ ClientError::ConfigureFailed(_)) => e,
            Some(e) => ClientError::ConfigureFailed(e.to_string()),
            None => ClientError::UnsupportedCodec(config.codec),
        })
    }

    /// Decode a live packet. Pts is rescaled from the stream timebase to
    /// microseconds; the keyframe flag tags the chunk key/delta.
    pub fn decode_packet(&mut self, packet: &PacketBuf) -> Result<()> {
        let timestamp_us = rescale(packet.header.pts, self.timebase, Timebase::MICROSECONDS);
        self.decode_chunk(EncodedChunk {
            data: packet.payload.clone(),
            timestamp_us,
            duration_us: None,
            is_key: packet.is_keyframe(),
        })
    }

    /// Decode a chunk whose timestamps are already in microseconds (the file
    /// path). Over-pressure drops the chunk and reports overflow instead of
    /// failing.
    pub fn decode_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        let backend = self
            .backend
            .as_mut()
            .ok_or(ClientError::InvalidState("decoder not configured"))?;

        let queued = backend.queue_size();
        if queued >= self.max_queue_size {
            warn!("decoder queue at {queued}, dropping chunk");
            self.on_overflow.emit(queued);
            return Ok(());
        }
        backend.decode(chunk)
    }

    /// Microsecond timestamp a live packet will carry after rescaling.
    pub fn packet_timestamp_us(&self, packet: &PacketBuf) -> u64 {
        rescale(packet.header.pts, self.timebase, Timebase::MICROSECONDS)
    }

    pub fn queue_size(&self) -> usize {
        self.backend.as_ref().map(|b| b.queue_size()).unwrap_or(0)
    }

    pub fn flush(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.flush();
        }
    }

    pub fn reset(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.reset();
        }
    }

    /// Tear the backend down entirely; the next configure starts fresh.
    pub fn dispose(&mut self) {
        self.backend = None;
        self.configured = None;
    }
}

fn candidate_kinds(preferred: DecoderKind) -> Vec<DecoderKind> {
    match preferred {
        DecoderKind::Hardware => vec![DecoderKind::Hardware, DecoderKind::Software],
        DecoderKind::Native => vec![DecoderKind::Native, DecoderKind::Software],
        DecoderKind::Software => vec![DecoderKind::Software],
    }
}
