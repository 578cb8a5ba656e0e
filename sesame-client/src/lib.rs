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

//! Client-side core of the sesame live media player.
//!
//! This crate takes care of everything between the transport and the render
//! surface: parsing Sesame packets off a pluggable stream source, routing
//! them to a decoder harness, scheduling decoded frames against wall-clock
//! time, and — on the capture side — packetizing encoded chunks back onto a
//! sink. The decoders, encoders, transport sessions and container demuxers
//! themselves are external collaborators, consumed through traits.
//!
//! This crate makes no assumptions about the UI or the render surface; frames
//! are opaque handles whose pixels are never inspected.
//!
//! # Outline of usage
//!
//! ## Live playback
//! ```ignore
//! let mut player = LivePlayer::new(config, callbacks, factory, None);
//! let mut source = SubscriberSource::new(connector, tracks, player.source_callbacks(events_tx));
//!
//! source.connect().await?;
//! player.play();
//! // owning task:
//! while let Some(event) = events_rx.recv().await {
//!     player.handle_event(event, now_ms());
//! }
//! // render loop, at display cadence:
//! if let Some(frame) = player.get_video_frame(now_ms()) { render(frame); }
//! ```
//!
//! ## File playback
//! ```ignore
//! let mut player = FilePlayer::new(config, callbacks, factory, None);
//! player.load(&mut demuxer).await?;
//! player.play(now_ms());
//! player.advance(now_ms());
//! ```
//!
//! ## Capture
//! ```ignore
//! let mut pipeline = CapturePipeline::new(capture_config, sink);
//! pipeline.connect().await?;
//! pipeline.on_video_chunk(chunk)?; // from the encoder callback
//! ```

pub mod capture;
pub mod connection;
pub mod constants;
pub mod decode;
pub mod error;
pub mod packet_debug;
pub mod player;
pub mod utils;

pub use capture::{
    AudioEncoderBackend, CapturePipeline, EncoderFactory, RawAudioBuffer, RawVideoFrame,
    VideoEncoderBackend,
};
pub use connection::{
    DataEvent, PacketSink, RawDataEvent, SerializedPacket, SourceCallbacks, SourceEvent,
    StreamKind, StreamSource,
};
pub use decode::{DecoderFactory, DecoderKind, VideoDecoderBackend, VideoFrame};
pub use error::{ClientError, Result};
pub use player::{FilePlayer, LivePlayer, PlayerState};
