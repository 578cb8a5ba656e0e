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

//! The interface to the actual media encoders, which are external
//! collaborators, mirroring the decoder side in `decode::backend`.
//!
//! Raw capture frames go in, encoded chunks come out through the chunk
//! callback the backend was created with, possibly from another thread.

use bytes::Bytes;

use crate::decode::EncodedChunk;
use crate::error::Result;

use super::{AudioCaptureConfig, VideoCaptureConfig};

/// One raw video frame from a camera or screen source. The pixel layout is
/// the encoder's business; the core only carries the bytes.
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    pub data: Bytes,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
}

/// A block of raw audio samples from a microphone source.
#[derive(Debug, Clone)]
pub struct RawAudioBuffer {
    pub data: Bytes,
    pub timestamp_us: u64,
    pub sample_count: u32,
}

/// Callback invoked for every chunk an encoder produces. Ownership of the
/// chunk transfers to the callback.
pub type ChunkCallback = Box<dyn FnMut(EncodedChunk) + Send>;

/// One video encoder implementation.
pub trait VideoEncoderBackend: Send {
    fn configure(&mut self, config: &VideoCaptureConfig) -> Result<()>;

    /// Encode one raw frame. `force_keyframe` instructs the encoder to emit
    /// a keyframe at the next opportunity.
    fn encode(&mut self, frame: RawVideoFrame, force_keyframe: bool) -> Result<()>;

    /// Emit everything in flight.
    fn flush(&mut self);
}

/// One audio encoder implementation. Audio chunks are all self-contained,
/// so there is no keyframe control.
pub trait AudioEncoderBackend: Send {
    fn configure(&mut self, config: &AudioCaptureConfig) -> Result<()>;
    fn encode(&mut self, buffer: RawAudioBuffer) -> Result<()>;
    fn flush(&mut self);
}

/// Creates encoder backends. `None` when the medium is unavailable on this
/// platform.
pub trait EncoderFactory: Send + Sync {
    fn create_video(&self, on_chunk: ChunkCallback) -> Option<Box<dyn VideoEncoderBackend>>;
    fn create_audio(&self, on_chunk: ChunkCallback) -> Option<Box<dyn AudioEncoderBackend>>;
}
