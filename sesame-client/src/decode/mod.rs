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

//! The decoder harness: a uniform lifecycle around external decoders.

mod audio;
mod backend;
mod harness;

pub use audio::{AudioDecoderBackend, AudioDecoderConfig, AudioFrame, AudioHarness};
pub use backend::{
    DecoderConfig, DecoderFactory, DecoderFamily, DecoderKind, EncodedChunk, FrameCallback,
    FrameHandle, VideoDecoderBackend, VideoFrame,
};
pub use harness::DecoderHarness;
