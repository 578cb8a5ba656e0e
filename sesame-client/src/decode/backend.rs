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

//! The interface to the actual video decoder, which is an external
//! collaborator: platform hardware, a software library, or a native
//! in-process decoder.

use std::fmt;

use bytes::Bytes;

use crate::error::Result;

/// Which implementation backs a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Hardware,
    Software,
    Native,
}

/// Hardware and software decoders share platform plumbing; switching within
/// a family reuses the pipeline, switching across families rebuilds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderFamily {
    Platform,
    Native,
}

impl DecoderKind {
    pub fn family(&self) -> DecoderFamily {
        match self {
            DecoderKind::Hardware | DecoderKind::Software => DecoderFamily::Platform,
            DecoderKind::Native => DecoderFamily::Native,
        }
    }
}

/// A decoder configuration derived from the stream's codec identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Codec-registry string, e.g. `avc1.42001f`.
    pub codec: String,
    pub coded_width: u16,
    pub coded_height: u16,
    /// Out-of-band codec description (e.g. avcC), when the container has one.
    pub description: Option<Bytes>,
}

/// One encoded sample on its way into a decoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub data: Bytes,
    pub timestamp_us: u64,
    pub duration_us: Option<u64>,
    pub is_key: bool,
}

/// Release hook for the platform resource behind a decoded frame.
pub trait FrameHandle: Send {
    fn release(&mut self);
}

/// A decoded video frame. The core never inspects pixels; it owns the handle
/// and guarantees the release action runs exactly once, on drop.
pub struct VideoFrame {
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    handle: Option<Box<dyn FrameHandle>>,
}

impl VideoFrame {
    pub fn new(timestamp_us: u64, width: u32, height: u32, handle: Box<dyn FrameHandle>) -> Self {
        Self {
            timestamp_us,
            width,
            height,
            handle: Some(handle),
        }
    }

    /// A frame without a platform resource, for tests and synthetic sources.
    pub fn detached(timestamp_us: u64, width: u32, height: u32) -> Self {
        Self {
            timestamp_us,
            width,
            height,
            handle: None,
        }
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("timestamp_us", &self.timestamp_us)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Drop for VideoFrame {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
    }
}

/// Callback invoked for every frame a decoder produces. Ownership of the
/// frame transfers to the callback.
pub type FrameCallback = Box<dyn FnMut(VideoFrame) + Send>;

/// One decoder implementation. Submission order is preserved; output arrives
/// through the frame callback the backend was created with, possibly from
/// another thread.
pub trait VideoDecoderBackend: Send {
    fn kind(&self) -> DecoderKind;

    /// Whether this backend can decode the given configuration. Checked
    /// before `configure` is attempted.
    fn supports(&self, config: &DecoderConfig) -> bool;

    fn configure(&mut self, config: &DecoderConfig) -> Result<()>;

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()>;

    /// Emit everything in flight, then return to a clean configured state.
    fn flush(&mut self);

    /// Drop everything in flight.
    fn reset(&mut self);

    /// Chunks submitted but not yet decoded.
    fn queue_size(&self) -> usize;
}

/// Creates decoder backends. `None` when the kind is unavailable on this
/// platform.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, kind: DecoderKind, on_frame: FrameCallback)
        -> Option<Box<dyn VideoDecoderBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingHandle(Arc<AtomicU32>);

    impl FrameHandle for CountingHandle {
        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn frames_release_exactly_once_on_drop() {
        let releases = Arc::new(AtomicU32::new(0));
        let frame = VideoFrame::new(0, 640, 480, Box::new(CountingHandle(releases.clone())));
        drop(frame);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn families_group_hardware_and_software() {
        assert_eq!(DecoderKind::Hardware.family(), DecoderFamily::Platform);
        assert_eq!(DecoderKind::Software.family(), DecoderFamily::Platform);
        assert_eq!(DecoderKind::Native.family(), DecoderFamily::Native);
        assert_ne!(
            DecoderKind::Hardware.family(),
            DecoderKind::Native.family()
        );
    }
}
