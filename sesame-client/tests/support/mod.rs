//! Shared mocks for the player integration tests.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use sesame_client::decode::{
    DecoderConfig, DecoderFactory, DecoderKind, EncodedChunk, FrameCallback, VideoDecoderBackend,
    VideoFrame,
};
use sesame_client::error::Result;
use sesame_types::{
    serialize, CodecData, PacketBuf, PacketHeader, PacketType, HAS_CODEC_DATA, IS_KEYFRAME,
};

/// Scoreboard shared between the test body and the mock decoders.
#[derive(Default)]
pub struct Board {
    /// `(timestamp_us, is_key)` in submission order.
    pub decoded: Mutex<Vec<(u64, bool)>>,
    pub configured: Mutex<Vec<DecoderConfig>>,
    pub resets: AtomicUsize,
    pub flushes: AtomicUsize,
    /// Reported queue size, for overflow tests.
    pub queue: AtomicUsize,
    /// When false the decoder swallows chunks without emitting frames.
    pub emit_frames: AtomicBool,
}

impl Board {
    pub fn new() -> Arc<Self> {
        let board = Self::default();
        board.emit_frames.store(true, Ordering::SeqCst);
        Arc::new(board)
    }
}

pub struct TestBackend {
    kind: DecoderKind,
    board: Arc<Board>,
    on_frame: FrameCallback,
    config: Option<DecoderConfig>,
}

impl VideoDecoderBackend for TestBackend {
    fn kind(&self) -> DecoderKind {
        self.kind
    }
    fn supports(&self, _config: &DecoderConfig) -> bool {
        true
    }
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        self.board.configured.lock().unwrap().push(config.clone());
        self.config = Some(config.clone());
        Ok(())
    }
    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        self.board
            .decoded
            .lock()
            .unwrap()
            .push((chunk.timestamp_us, chunk.is_key));
        if self.board.emit_frames.load(Ordering::SeqCst) {
            let (width, height) = self
                .config
                .as_ref()
                .map(|c| (c.coded_width as u32, c.coded_height as u32))
                .unwrap_or((0, 0));
            (self.on_frame)(VideoFrame::detached(chunk.timestamp_us, width, height));
        }
        Ok(())
    }
    fn flush(&mut self) {
        self.board.flushes.fetch_add(1, Ordering::SeqCst);
    }
    fn reset(&mut self) {
        self.board.resets.fetch_add(1, Ordering::SeqCst);
    }
    fn queue_size(&self) -> usize {
        self.board.queue.load(Ordering::SeqCst)
    }
}

pub struct TestFactory {
    pub board: Arc<Board>,
}

impl DecoderFactory for TestFactory {
    fn create(
        &self,
        kind: DecoderKind,
        on_frame: FrameCallback,
    ) -> Option<Box<dyn VideoDecoderBackend>> {
        Some(Box::new(TestBackend {
            kind,
            board: self.board.clone(),
            on_frame,
            config: None,
        }))
    }
}

pub fn h264_1080p() -> CodecData {
    CodecData {
        codec_type: 3,
        width: 1920,
        height: 1080,
        timebase_num: 1,
        timebase_den: 1_000_000,
        ..Default::default()
    }
}

pub fn hevc_720p() -> CodecData {
    CodecData {
        codec_type: 4,
        width: 1280,
        height: 720,
        timebase_num: 1,
        timebase_den: 1_000_000,
        ..Default::default()
    }
}

/// Build an owned media packet the way a source adapter would.
pub fn media_packet(pts_us: u64, is_key: bool, codec: Option<CodecData>) -> PacketBuf {
    let mut flags = 0;
    if is_key {
        flags |= IS_KEYFRAME;
    }
    if codec.is_some() {
        flags |= HAS_CODEC_DATA;
    }
    let header = PacketHeader {
        flags,
        pts: pts_us,
        ..PacketHeader::new(PacketType::VideoFrame)
    };
    let bytes = serialize(&header, None, codec.as_ref(), b"sample-bytes").unwrap();
    PacketBuf::parse(bytes).unwrap()
}

/// A chunk as an encoder callback would deliver it.
pub fn encoded_chunk(timestamp_us: u64, is_key: bool) -> EncodedChunk {
    EncodedChunk {
        data: Bytes::from_static(b"encoded"),
        timestamp_us,
        duration_us: Some(33_333),
        is_key,
    }
}
