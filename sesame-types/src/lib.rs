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

//! Shared types for the sesame media stack.
//!
//! This crate holds everything that both the playback and capture sides speak:
//! the Sesame binary wire format (parser and serializer), codec identity and
//! codec-string mapping, rational timebase arithmetic, and a framework-agnostic
//! callback type.

pub mod callback;
pub mod codec;
pub mod timebase;
pub mod wire;

pub use callback::Callback;
pub use codec::{codec_changed, codec_string, CodecId};
pub use timebase::{rescale, Timebase};
pub use wire::{
    parse, serialize, CodecData, PacketBuf, PacketHeader, PacketType, ParsedPacket, WireError,
    HAS_CODEC_DATA, HAS_METADATA, IS_KEYFRAME,
};
