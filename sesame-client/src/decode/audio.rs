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

//! Audio decoding support.
//!
//! The audio renderer itself lives outside the core; this is the thin
//! harness that keeps the audio decoder configured with the stream's codec
//! identity and converts timestamps, mirroring the video harness. Audio
//! chunks are self-contained, so a codec change reconfigures immediately
//! with no keyframe wait.

use log::warn;
use sesame_types::{codec_string, rescale, CodecData, PacketBuf, Timebase};

use super::backend::{EncodedChunk, FrameHandle};
use crate::constants::MAX_DECODER_QUEUE;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u8,
}

/// A decoded audio buffer handle. Like video frames, the samples themselves
/// stay behind the release hook.
pub struct AudioFrame {
    pub timestamp_us: u64,
    pub sample_rate: u32,
    pub channels: u8,
    handle: Option<Box<dyn FrameHandle>>,
}

impl AudioFrame {
    pub fn new(
        timestamp_us: u64,
        sample_rate: u32,
        channels: u8,
        handle: Box<dyn FrameHandle>,
    ) -> Self {
        Self {
            timestamp_us,
            sample_rate,
            channels,
            handle: Some(handle),
        }
    }

    pub fn detached(timestamp_us: u64, sample_rate: u32, channels: u8) -> Self {
        Self {
            timestamp_us,
            sample_rate,
            channels,
            handle: None,
        }
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("timestamp_us", &self.timestamp_us)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

impl Drop for AudioFrame {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
    }
}

/// One audio decoder implementation (external collaborator).
pub trait AudioDecoderBackend: Send {
    fn configure(&mut self, config: &AudioDecoderConfig) -> Result<()>;
    fn decode(&mut self, chunk: EncodedChunk) -> Result<()>;
    fn flush(&mut self);
    fn reset(&mut self);
    fn queue_size(&self) -> usize;
}

pub struct AudioHarness {
    backend: Box<dyn AudioDecoderBackend>,
    configured: Option<AudioDecoderConfig>,
    timebase: Timebase,
    max_queue_size: usize,
}

impl AudioHarness {
    pub fn new(backend: Box<dyn AudioDecoderBackend>) -> Self {
        Self {
            backend,
            configured: None,
            timebase: Timebase::MICROSECONDS,
            max_queue_size: MAX_DECODER_QUEUE,
        }
    }

    pub fn configured(&self) -> Option<&AudioDecoderConfig> {
        self.configured.as_ref()
    }

    pub fn configure(&mut self, codec_data: &CodecData) -> Result<()> {
        let codec = codec_string(codec_data).ok_or_else(|| {
            ClientError::UnsupportedCodec(format!("codec_type {}", codec_data.codec_type))
        })?;
        let config = AudioDecoderConfig {
            codec,
            sample_rate: codec_data.sample_rate,
            channels: codec_data.channels.max(1),
        };
        self.backend.configure(&config)?;
        let timebase = Timebase::new(codec_data.timebase_num, codec_data.timebase_den);
        self.timebase = if timebase.is_valid() {
            timebase
        } else {
            Timebase::MICROSECONDS
        };
        self.configured = Some(config);
        Ok(())
    }

    /// Configure from an explicit config (the file path, where the demuxer
    /// supplies the codec string directly). Timestamps are already in
    /// microseconds there.
    pub fn configure_with(&mut self, config: AudioDecoderConfig) -> Result<()> {
        self.backend.configure(&config)?;
        self.timebase = Timebase::MICROSECONDS;
        self.configured = Some(config);
        Ok(())
    }

    pub fn decode_packet(&mut self, packet: &PacketBuf) -> Result<()> {
        let chunk = EncodedChunk {
            data: packet.payload.clone(),
            timestamp_us: rescale(packet.header.pts, self.timebase, Timebase::MICROSECONDS),
            duration_us: None,
            is_key: packet.is_keyframe(),
        };
        self.decode_chunk(chunk)
    }

    /// Decode a chunk whose timestamps are already in microseconds.
    pub fn decode_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        if self.configured.is_none() {
            return Err(ClientError::InvalidState("audio decoder not configured"));
        }
        let queued = self.backend.queue_size();
        if queued >= self.max_queue_size {
            warn!("audio decoder queue at {queued}, dropping chunk");
            self.backend.reset();
            return Ok(());
        }
        self.backend.decode(chunk)
    }

    pub fn queue_size(&self) -> usize {
        self.backend.queue_size()
    }

    pub fn flush(&mut self) {
        self.backend.flush();
    }

    pub fn reset(&mut self) {
        self.backend.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockAudioBackend {
        configured: Arc<Mutex<Vec<AudioDecoderConfig>>>,
        decoded: Arc<Mutex<Vec<u64>>>,
    }

    impl AudioDecoderBackend for MockAudioBackend {
        fn configure(&mut self, config: &AudioDecoderConfig) -> Result<()> {
            self.configured.lock().unwrap().push(config.clone());
            Ok(())
        }
        fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
            self.decoded.lock().unwrap().push(chunk.timestamp_us);
            Ok(())
        }
        fn flush(&mut self) {}
        fn reset(&mut self) {}
        fn queue_size(&self) -> usize {
            0
        }
    }

    fn opus_codec_data() -> CodecData {
        CodecData {
            codec_type: 64,
            sample_rate: 48_000,
            channels: 2,
            timebase_num: 1,
            timebase_den: 48_000,
            ..Default::default()
        }
    }

    #[test]
    fn configures_from_codec_data() {
        let backend = MockAudioBackend::default();
        let configured = backend.configured.clone();
        let mut harness = AudioHarness::new(Box::new(backend));
        harness.configure(&opus_codec_data()).unwrap();

        let configs = configured.lock().unwrap().clone();
        assert_eq!(
            configs,
            vec![AudioDecoderConfig {
                codec: "opus".into(),
                sample_rate: 48_000,
                channels: 2,
            }]
        );
    }

    #[test]
    fn timestamps_rescale_from_the_sample_clock() {
        let backend = MockAudioBackend::default();
        let decoded = backend.decoded.clone();
        let mut harness = AudioHarness::new(Box::new(backend));
        harness.configure(&opus_codec_data()).unwrap();

        let header = sesame_types::PacketHeader {
            pts: 48_000, // one second at 48 kHz
            ..sesame_types::PacketHeader::new(sesame_types::PacketType::AudioFrame)
        };
        let bytes = sesame_types::serialize(&header, None, None, b"opus").unwrap();
        let packet = PacketBuf::parse(bytes).unwrap();
        harness.decode_packet(&packet).unwrap();

        assert_eq!(decoded.lock().unwrap().clone(), vec![1_000_000]);
    }
}
