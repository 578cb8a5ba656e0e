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

//! The capture pipeline: camera/microphone media in, Sesame packets out.
//!
//! The encoders themselves are external collaborators behind the
//! [`VideoEncoderBackend`]/[`AudioEncoderBackend`] traits. A pipeline built
//! with [`CapturePipeline::with_encoders`] owns them: raw frames go in
//! through [`encode_video_frame`]/[`encode_audio`], encoded chunks come back
//! over a channel, and a far-end keyframe request forces a keyframe on the
//! next encode. Embeddings that run their own encoder loop can instead hand
//! finished chunks to [`on_video_chunk`]/[`on_audio_chunk`] and poll
//! [`take_keyframe_request`] themselves. Either way each chunk is packetized
//! with the stream's codec block and sent to the sink, which applies the
//! transport's group-boundary policy.
//!
//! [`encode_video_frame`]: CapturePipeline::encode_video_frame
//! [`encode_audio`]: CapturePipeline::encode_audio
//! [`on_video_chunk`]: CapturePipeline::on_video_chunk
//! [`on_audio_chunk`]: CapturePipeline::on_audio_chunk
//! [`take_keyframe_request`]: CapturePipeline::take_keyframe_request

mod backend;

pub use backend::{
    AudioEncoderBackend, ChunkCallback, EncoderFactory, RawAudioBuffer, RawVideoFrame,
    VideoEncoderBackend,
};

use bytes::Bytes;
use log::debug;
use sesame_types::{
    serialize, Callback, CodecData, PacketHeader, PacketType, HAS_CODEC_DATA, HAS_METADATA,
    IS_KEYFRAME,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::connection::{PacketSink, SerializedPacket, StreamKind};
use crate::decode::EncodedChunk;
use crate::error::{ClientError, Result};

/// Video encoder settings, mirrored into every packet's codec block.
#[derive(Debug, Clone)]
pub struct VideoCaptureConfig {
    /// Wire codec id (see [`sesame_types::CodecId`]).
    pub codec_type: u8,
    pub width: u16,
    pub height: u16,
    pub codec_profile: u16,
    pub codec_level: u16,
    pub bitrate_bps: u32,
    pub framerate: u32,
    /// Frames between forced keyframes.
    pub keyframe_interval: u32,
}

impl Default for VideoCaptureConfig {
    fn default() -> Self {
        Self {
            codec_type: 2, // VP9
            width: 1280,
            height: 720,
            codec_profile: 0,
            codec_level: 0,
            bitrate_bps: 1_500_000,
            framerate: 30,
            keyframe_interval: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioCaptureConfig {
    pub codec_type: u8,
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate_bps: u32,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            codec_type: 64, // Opus
            sample_rate: 48_000,
            channels: 1,
            bitrate_bps: 50_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    pub video: VideoCaptureConfig,
    pub audio: Option<AudioCaptureConfig>,
    /// Applied to audio timestamps to align them with video.
    pub audio_timestamp_offset_us: i64,
    /// Routing string stamped into packet metadata, when set.
    pub routing_metadata: Option<String>,
}

/// Camera/mic → encoder → packetizer → sink.
pub struct CapturePipeline<S: PacketSink> {
    config: CaptureConfig,
    sink: S,
    sequence: u64,
    keyframe_requested: Arc<AtomicBool>,
    video_encoder: Option<Box<dyn VideoEncoderBackend>>,
    audio_encoder: Option<Box<dyn AudioEncoderBackend>>,
    video_chunk_rx: Option<mpsc::UnboundedReceiver<EncodedChunk>>,
    audio_chunk_rx: Option<mpsc::UnboundedReceiver<EncodedChunk>>,
}

impl<S: PacketSink> CapturePipeline<S> {
    /// A pipeline without owned encoders; the embedding runs its own encoder
    /// loop and pushes finished chunks.
    pub fn new(config: CaptureConfig, mut sink: S) -> Self {
        let keyframe_requested = Arc::new(AtomicBool::new(false));
        let flag = keyframe_requested.clone();
        sink.set_keyframe_request_handler(Callback::from(move |()| {
            flag.store(true, Ordering::SeqCst);
        }));
        Self {
            config,
            sink,
            sequence: 0,
            keyframe_requested,
            video_encoder: None,
            audio_encoder: None,
            video_chunk_rx: None,
            audio_chunk_rx: None,
        }
    }

    /// A pipeline that owns its encoders: the factory's backends are created
    /// and configured up front, and their chunks flow straight into the
    /// packetizer.
    pub fn with_encoders(
        config: CaptureConfig,
        sink: S,
        factory: &dyn EncoderFactory,
    ) -> Result<Self> {
        let mut pipeline = Self::new(config, sink);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut video = factory
            .create_video(Box::new(move |chunk| {
                let _ = tx.send(chunk);
            }))
            .ok_or_else(|| ClientError::ConfigureFailed("no video encoder available".into()))?;
        video.configure(&pipeline.config.video)?;
        pipeline.video_encoder = Some(video);
        pipeline.video_chunk_rx = Some(rx);

        if let Some(audio_config) = pipeline.config.audio.clone() {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut audio = factory
                .create_audio(Box::new(move |chunk| {
                    let _ = tx.send(chunk);
                }))
                .ok_or_else(|| {
                    ClientError::ConfigureFailed("no audio encoder available".into())
                })?;
            audio.configure(&audio_config)?;
            pipeline.audio_encoder = Some(audio);
            pipeline.audio_chunk_rx = Some(rx);
        }
        Ok(pipeline)
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.sink.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.sink.disconnect().await;
    }

    /// True once per far-end keyframe request; the encoder should emit a
    /// keyframe at the next opportunity. Pipelines that own their encoders
    /// consume this inside [`encode_video_frame`](Self::encode_video_frame).
    pub fn take_keyframe_request(&self) -> bool {
        self.keyframe_requested.swap(false, Ordering::SeqCst)
    }

    /// Encode one raw video frame through the owned backend and send every
    /// chunk it produced. A pending far-end keyframe request forces a
    /// keyframe on this encode.
    pub fn encode_video_frame(&mut self, frame: RawVideoFrame) -> Result<()> {
        let force_keyframe = self.take_keyframe_request();
        let encoder = self
            .video_encoder
            .as_mut()
            .ok_or(ClientError::InvalidState("no video encoder attached"))?;
        encoder.encode(frame, force_keyframe)?;
        self.pump_video_chunks()
    }

    /// Encode one raw audio buffer through the owned backend and send every
    /// chunk it produced.
    pub fn encode_audio(&mut self, buffer: RawAudioBuffer) -> Result<()> {
        let encoder = self
            .audio_encoder
            .as_mut()
            .ok_or(ClientError::InvalidState("no audio encoder attached"))?;
        encoder.encode(buffer)?;
        self.pump_audio_chunks()
    }

    fn pump_video_chunks(&mut self) -> Result<()> {
        let mut chunks = Vec::new();
        if let Some(rx) = self.video_chunk_rx.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                chunks.push(chunk);
            }
        }
        for chunk in chunks {
            self.on_video_chunk(chunk)?;
        }
        Ok(())
    }

    fn pump_audio_chunks(&mut self) -> Result<()> {
        let mut chunks = Vec::new();
        if let Some(rx) = self.audio_chunk_rx.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                chunks.push(chunk);
            }
        }
        for chunk in chunks {
            self.on_audio_chunk(chunk)?;
        }
        Ok(())
    }

    /// Packetize and send one encoded video chunk.
    pub fn on_video_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        let video = &self.config.video;
        let codec_data = CodecData {
            timebase_num: 1,
            timebase_den: 1_000_000,
            codec_profile: video.codec_profile,
            codec_level: video.codec_level,
            width: video.width,
            height: video.height,
            codec_type: video.codec_type,
            ..Default::default()
        };
        let packet = self.packetize(PacketType::VideoFrame, &chunk, chunk.timestamp_us, codec_data)?;
        if chunk.is_key {
            debug!("sending keyframe seq={}", self.sequence);
        }
        self.sink.send(packet)
    }

    /// Packetize and send one encoded audio chunk, offsetting its timestamp
    /// to align with video.
    pub fn on_audio_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        let Some(audio) = self.config.audio.clone() else {
            return Ok(());
        };
        let timestamp_us = (chunk.timestamp_us as i64 + self.config.audio_timestamp_offset_us)
            .max(0) as u64;
        let codec_data = CodecData {
            sample_rate: audio.sample_rate,
            timebase_num: 1,
            timebase_den: 1_000_000,
            codec_type: audio.codec_type,
            channels: audio.channels,
            ..Default::default()
        };
        let packet = self.packetize(PacketType::AudioFrame, &chunk, timestamp_us, codec_data)?;
        self.sink.send(packet)
    }

    /// Raw bytes on an auxiliary data track; the wire format is not applied.
    pub fn send_data(&mut self, track: &str, payload: Bytes) -> Result<()> {
        self.sink.send_data(track, payload)
    }

    fn packetize(
        &mut self,
        packet_type: PacketType,
        chunk: &EncodedChunk,
        timestamp_us: u64,
        codec_data: CodecData,
    ) -> Result<SerializedPacket> {
        let mut flags = HAS_CODEC_DATA;
        if chunk.is_key {
            flags |= IS_KEYFRAME;
        }
        if self.config.routing_metadata.is_some() {
            flags |= HAS_METADATA;
        }
        let header = PacketHeader {
            flags,
            pts: timestamp_us,
            id: self.sequence,
            packet_type: packet_type as u16,
        };
        self.sequence += 1;

        let bytes = serialize(
            &header,
            self.config.routing_metadata.as_deref(),
            Some(&codec_data),
            &chunk.data,
        )?;
        Ok(SerializedPacket {
            bytes,
            is_keyframe: chunk.is_key,
            timestamp_us,
            kind: match packet_type {
                PacketType::AudioFrame => StreamKind::Audio,
                _ => StreamKind::Video,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{BroadcastSink, BroadcastSinkConfig, SinkTransport};
    use async_trait::async_trait;
    use sesame_types::parse;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        sent: Arc<Mutex<Vec<(String, Bytes, bool)>>>,
    }

    #[async_trait]
    impl SinkTransport for MockTransport {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) {}
        fn send_frame(&mut self, track: &str, payload: Bytes, new_group: bool) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((track.to_string(), payload, new_group));
            Ok(())
        }
    }

    fn chunk(timestamp_us: u64, is_key: bool) -> EncodedChunk {
        EncodedChunk {
            data: Bytes::from_static(b"encoded"),
            timestamp_us,
            duration_us: Some(33_333),
            is_key,
        }
    }

    fn pipeline() -> (
        CapturePipeline<BroadcastSink<MockTransport>>,
        Arc<Mutex<Vec<(String, Bytes, bool)>>>,
    ) {
        let transport = MockTransport::default();
        let sent = transport.sent.clone();
        let sink = BroadcastSink::new(transport, BroadcastSinkConfig::default());
        let config = CaptureConfig {
            audio: Some(AudioCaptureConfig::default()),
            audio_timestamp_offset_us: -5000,
            routing_metadata: Some("cam0".into()),
            ..Default::default()
        };
        (CapturePipeline::new(config, sink), sent)
    }

    #[test]
    fn video_chunks_become_wellformed_packets() {
        let (mut pipeline, sent) = pipeline();
        pipeline.on_video_chunk(chunk(1_000_000, true)).unwrap();
        pipeline.on_video_chunk(chunk(1_033_333, false)).unwrap();

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].2, "keyframe starts a group");
        assert!(!messages[1].2);

        let parsed = parse(&messages[0].1).unwrap();
        assert!(parsed.is_keyframe());
        assert_eq!(parsed.header.pts, 1_000_000);
        assert_eq!(parsed.header.id, 0);
        assert_eq!(parsed.metadata, Some("cam0"));
        let cd = parsed.codec_data.unwrap();
        assert_eq!(cd.codec_type, 2);
        assert_eq!((cd.width, cd.height), (1280, 720));
        assert_eq!(parsed.payload, b"encoded");

        let second = parse(&messages[1].1).unwrap();
        assert_eq!(second.header.id, 1);
        assert!(!second.is_keyframe());
    }

    #[test]
    fn audio_timestamps_carry_the_alignment_offset() {
        let (mut pipeline, sent) = pipeline();
        pipeline.on_audio_chunk(chunk(1_000_000, false)).unwrap();

        let messages = sent.lock().unwrap().clone();
        let parsed = parse(&messages[0].1).unwrap();
        assert_eq!(parsed.header.pts, 995_000);
        assert_eq!(
            parsed.header.known_type(),
            Some(sesame_types::PacketType::AudioFrame)
        );
        let cd = parsed.codec_data.unwrap();
        assert_eq!(cd.codec_type, 64);
        assert_eq!(cd.sample_rate, 48_000);
        assert_eq!(messages[0].0, "audio");
    }

    #[test]
    fn negative_offset_clamps_at_zero() {
        let (mut pipeline, sent) = pipeline();
        pipeline.on_audio_chunk(chunk(1000, false)).unwrap();
        let messages = sent.lock().unwrap().clone();
        let parsed = parse(&messages[0].1).unwrap();
        assert_eq!(parsed.header.pts, 0);
    }

    #[test]
    fn keyframe_requests_reach_the_encoder_once() {
        let (pipeline, _sent) = pipeline();
        assert!(!pipeline.take_keyframe_request());
        pipeline.keyframe_requested.store(true, Ordering::SeqCst);
        assert!(pipeline.take_keyframe_request());
        assert!(!pipeline.take_keyframe_request());
    }

    struct MockVideoEncoder {
        on_chunk: ChunkCallback,
        forced: Arc<Mutex<Vec<bool>>>,
    }

    impl VideoEncoderBackend for MockVideoEncoder {
        fn configure(&mut self, _config: &VideoCaptureConfig) -> Result<()> {
            Ok(())
        }
        fn encode(&mut self, frame: RawVideoFrame, force_keyframe: bool) -> Result<()> {
            self.forced.lock().unwrap().push(force_keyframe);
            (self.on_chunk)(EncodedChunk {
                data: frame.data,
                timestamp_us: frame.timestamp_us,
                duration_us: None,
                is_key: force_keyframe,
            });
            Ok(())
        }
        fn flush(&mut self) {}
    }

    struct MockAudioEncoder {
        on_chunk: ChunkCallback,
    }

    impl AudioEncoderBackend for MockAudioEncoder {
        fn configure(&mut self, _config: &AudioCaptureConfig) -> Result<()> {
            Ok(())
        }
        fn encode(&mut self, buffer: RawAudioBuffer) -> Result<()> {
            (self.on_chunk)(EncodedChunk {
                data: buffer.data,
                timestamp_us: buffer.timestamp_us,
                duration_us: None,
                is_key: false,
            });
            Ok(())
        }
        fn flush(&mut self) {}
    }

    struct MockEncoderFactory {
        forced: Arc<Mutex<Vec<bool>>>,
    }

    impl EncoderFactory for MockEncoderFactory {
        fn create_video(&self, on_chunk: ChunkCallback) -> Option<Box<dyn VideoEncoderBackend>> {
            Some(Box::new(MockVideoEncoder {
                on_chunk,
                forced: self.forced.clone(),
            }))
        }
        fn create_audio(&self, on_chunk: ChunkCallback) -> Option<Box<dyn AudioEncoderBackend>> {
            Some(Box::new(MockAudioEncoder { on_chunk }))
        }
    }

    fn owned_pipeline() -> (
        CapturePipeline<BroadcastSink<MockTransport>>,
        Arc<Mutex<Vec<(String, Bytes, bool)>>>,
        Arc<Mutex<Vec<bool>>>,
    ) {
        let transport = MockTransport::default();
        let sent = transport.sent.clone();
        let sink = BroadcastSink::new(transport, BroadcastSinkConfig::default());
        let config = CaptureConfig {
            audio: Some(AudioCaptureConfig::default()),
            audio_timestamp_offset_us: -5000,
            routing_metadata: Some("cam0".into()),
            ..Default::default()
        };
        let forced = Arc::new(Mutex::new(Vec::new()));
        let factory = MockEncoderFactory {
            forced: forced.clone(),
        };
        let pipeline = CapturePipeline::with_encoders(config, sink, &factory).unwrap();
        (pipeline, sent, forced)
    }

    #[test]
    fn owned_encoders_drive_the_packetizer() {
        let (mut pipeline, sent, _forced) = owned_pipeline();
        pipeline
            .encode_video_frame(RawVideoFrame {
                data: Bytes::from_static(b"raw-frame"),
                timestamp_us: 1_000_000,
                width: 1280,
                height: 720,
            })
            .unwrap();
        pipeline
            .encode_audio(RawAudioBuffer {
                data: Bytes::from_static(b"raw-audio"),
                timestamp_us: 1_000_000,
                sample_count: 480,
            })
            .unwrap();

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);

        let video = parse(&messages[0].1).unwrap();
        assert_eq!(video.header.pts, 1_000_000);
        assert_eq!(video.payload, b"raw-frame");
        assert_eq!(
            video.header.known_type(),
            Some(sesame_types::PacketType::VideoFrame)
        );

        let audio = parse(&messages[1].1).unwrap();
        assert_eq!(audio.header.pts, 995_000, "alignment offset applied");
        assert_eq!(audio.payload, b"raw-audio");
    }

    #[test]
    fn far_end_keyframe_request_forces_the_next_encode() {
        let (mut pipeline, sent, forced) = owned_pipeline();
        pipeline.keyframe_requested.store(true, Ordering::SeqCst);

        pipeline
            .encode_video_frame(RawVideoFrame {
                data: Bytes::from_static(b"kf"),
                timestamp_us: 0,
                width: 1280,
                height: 720,
            })
            .unwrap();
        pipeline
            .encode_video_frame(RawVideoFrame {
                data: Bytes::from_static(b"delta"),
                timestamp_us: 33_333,
                width: 1280,
                height: 720,
            })
            .unwrap();

        // The request is consumed by exactly one encode.
        assert_eq!(forced.lock().unwrap().clone(), vec![true, false]);

        let messages = sent.lock().unwrap().clone();
        let first = parse(&messages[0].1).unwrap();
        assert!(first.is_keyframe());
        assert!(messages[0].2, "keyframe starts a group");
        let second = parse(&messages[1].1).unwrap();
        assert!(!second.is_keyframe());
        assert!(!messages[1].2);
    }

    #[test]
    fn encoding_without_an_attached_backend_is_an_error() {
        let (mut pipeline, _sent) = pipeline();
        let err = pipeline
            .encode_video_frame(RawVideoFrame {
                data: Bytes::from_static(b"raw"),
                timestamp_us: 0,
                width: 0,
                height: 0,
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
    }

    #[test]
    fn data_sends_bypass_the_wire_format() {
        let (mut pipeline, sent) = pipeline();
        pipeline
            .send_data("telemetry", Bytes::from_static(b"{\"fps\":30}"))
            .unwrap();
        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[0].0, "telemetry");
        assert_eq!(messages[0].1.as_ref(), b"{\"fps\":30}");
        assert!(parse(&messages[0].1).is_err(), "raw bytes, not a packet");
    }
}
