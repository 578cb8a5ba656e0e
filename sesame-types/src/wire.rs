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

//! The Sesame wire format.
//!
//! Every media packet is `FixedHeader ‖ [Metadata] ‖ [CodecData] ‖ Payload`.
//! The fixed header is 32 bytes, little-endian:
//!
//! ```text
//! offset  field        width
//!      0  magic        u32    "SESM" (0x4D534553)
//!      4  flags        u32    bit 0 codec data, bit 1 metadata, bit 2 keyframe
//!      8  pts          u64    presentation timestamp in the declared timebase
//!     16  id           u64    opaque ordering id
//!     24  version      u16    1
//!     26  header_size  u16    32 + 64·[metadata] + 24·[codec data]
//!     28  type         u16    1 video, 2 audio, 3 rpc, 4 muxed, 5 decoder data
//!     30  reserved     u16    zero on emit, ignored on parse
//! ```
//!
//! The format is frozen. Every field, every size, every reserved byte is part
//! of the protocol; `parse` must accept the byte-identical output of
//! `serialize` and of any conformant emitter, regardless of host endianness.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// "SESM", little-endian on the wire.
pub const MAGIC: u32 = 0x4D53_4553;

/// Current (and only) wire format version.
pub const WIRE_VERSION: u16 = 1;

/// Size of the fixed header in bytes.
pub const FIXED_HEADER_LEN: usize = 32;

/// Size of the optional NUL-padded routing metadata block.
pub const METADATA_LEN: usize = 64;

/// Size of the optional codec description block.
pub const CODEC_DATA_LEN: usize = 24;

/// Flag bit: a [`CodecData`] block follows the header (and metadata, if any).
pub const HAS_CODEC_DATA: u32 = 1 << 0;
/// Flag bit: a 64-byte routing metadata block immediately follows the header.
pub const HAS_METADATA: u32 = 1 << 1;
/// Flag bit: the payload is a self-contained keyframe.
pub const IS_KEYFRAME: u32 = 1 << 2;

/// Errors from parsing or serializing Sesame packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer of {0} bytes is shorter than the declared header")]
    Truncated(usize),

    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("unsupported wire version {0}")]
    BadVersion(u16),

    #[error("header size {found} does not match flags (expected {expected})")]
    BadHeaderSize { found: u16, expected: u16 },

    #[error("metadata block is not valid UTF-8")]
    MetadataNotUtf8,

    #[error("flag 0x{flag:x} is set but the matching block was not provided")]
    MissingBlock { flag: u32 },
}

/// Known packet types. Unknown values are preserved on parse; interpreting
/// them is the caller's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    VideoFrame = 1,
    AudioFrame = 2,
    Rpc = 3,
    MuxedData = 4,
    DecoderData = 5,
}

impl PacketType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(PacketType::VideoFrame),
            2 => Some(PacketType::AudioFrame),
            3 => Some(PacketType::Rpc),
            4 => Some(PacketType::MuxedData),
            5 => Some(PacketType::DecoderData),
            _ => None,
        }
    }
}

/// The decoded fixed header. Magic, version and `header_size` are implied:
/// they are validated on parse and recomputed from `flags` on serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Flag bits; see [`HAS_CODEC_DATA`], [`HAS_METADATA`], [`IS_KEYFRAME`].
    pub flags: u32,
    /// Presentation timestamp in the packet's declared timebase.
    pub pts: u64,
    /// Opaque ordering id. Request/response transports use it for
    /// correlation; treated as unsigned everywhere.
    pub id: u64,
    /// Raw packet type. Unknown values round-trip untouched.
    pub packet_type: u16,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type: packet_type as u16,
            ..Default::default()
        }
    }

    pub fn has_codec_data(&self) -> bool {
        self.flags & HAS_CODEC_DATA != 0
    }

    pub fn has_metadata(&self) -> bool {
        self.flags & HAS_METADATA != 0
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & IS_KEYFRAME != 0
    }

    pub fn known_type(&self) -> Option<PacketType> {
        PacketType::from_u16(self.packet_type)
    }

    /// Total header length implied by the flag bits.
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN
            + if self.has_metadata() { METADATA_LEN } else { 0 }
            + if self.has_codec_data() {
                CODEC_DATA_LEN
            } else {
                0
            }
    }
}

/// The 24-byte codec description block.
///
/// `timebase_num`/`timebase_den` scale `pts` into seconds; the den may be 1
/// for non-time domains. Identity for reconfiguration purposes is the
/// `(codec_type, width, height, codec_profile, codec_level)` tuple, see
/// [`CodecData::identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecData {
    pub sample_rate: u32,
    pub timebase_num: u32,
    pub timebase_den: u32,
    pub codec_profile: u16,
    pub codec_level: u16,
    pub width: u16,
    pub height: u16,
    pub codec_type: u8,
    pub channels: u8,
    pub bit_depth: u8,
}

impl CodecData {
    /// The tuple whose equality decides whether a decoder must be
    /// reconfigured.
    pub fn identity(&self) -> (u8, u16, u16, u16, u16) {
        (
            self.codec_type,
            self.width,
            self.height,
            self.codec_profile,
            self.codec_level,
        )
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(self.timebase_num);
        buf.put_u32_le(self.timebase_den);
        buf.put_u16_le(self.codec_profile);
        buf.put_u16_le(self.codec_level);
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u8(self.codec_type);
        buf.put_u8(self.channels);
        buf.put_u8(self.bit_depth);
        buf.put_u8(0); // reserved
    }

    fn read(mut buf: &[u8]) -> Self {
        let sample_rate = buf.get_u32_le();
        let timebase_num = buf.get_u32_le();
        let timebase_den = buf.get_u32_le();
        let codec_profile = buf.get_u16_le();
        let codec_level = buf.get_u16_le();
        let width = buf.get_u16_le();
        let height = buf.get_u16_le();
        let codec_type = buf.get_u8();
        let channels = buf.get_u8();
        let bit_depth = buf.get_u8();
        Self {
            sample_rate,
            timebase_num,
            timebase_den,
            codec_profile,
            codec_level,
            width,
            height,
            codec_type,
            channels,
            bit_depth,
        }
    }
}

/// A validated, borrow-friendly view of one packet.
///
/// `payload` points into the caller's buffer; nothing is copied. The view
/// must not outlive the handler it was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket<'a> {
    pub header: PacketHeader,
    pub metadata: Option<&'a str>,
    pub codec_data: Option<CodecData>,
    pub payload: &'a [u8],
}

impl ParsedPacket<'_> {
    pub fn is_keyframe(&self) -> bool {
        self.header.is_keyframe()
    }
}

/// Parse one Sesame packet from `buf`.
///
/// Rejects short buffers, bad magic, unknown versions and a `header_size`
/// inconsistent with the flag bits. The payload slice may be empty.
pub fn parse(buf: &[u8]) -> Result<ParsedPacket<'_>, WireError> {
    if buf.len() < FIXED_HEADER_LEN {
        return Err(WireError::Truncated(buf.len()));
    }

    let mut cursor = buf;
    let magic = cursor.get_u32_le();
    if magic != MAGIC {
        return Err(WireError::BadMagic(magic));
    }
    let flags = cursor.get_u32_le();
    let pts = cursor.get_u64_le();
    let id = cursor.get_u64_le();
    let version = cursor.get_u16_le();
    if version != WIRE_VERSION {
        return Err(WireError::BadVersion(version));
    }
    let header_size = cursor.get_u16_le();
    let packet_type = cursor.get_u16_le();
    let _reserved = cursor.get_u16_le();

    let header = PacketHeader {
        flags,
        pts,
        id,
        packet_type,
    };

    let expected = header.header_len() as u16;
    if header_size != expected {
        return Err(WireError::BadHeaderSize {
            found: header_size,
            expected,
        });
    }
    if buf.len() < expected as usize {
        return Err(WireError::Truncated(buf.len()));
    }

    let mut offset = FIXED_HEADER_LEN;
    let metadata = if header.has_metadata() {
        let block = &buf[offset..offset + METADATA_LEN];
        offset += METADATA_LEN;
        let end = block.iter().position(|&b| b == 0).unwrap_or(METADATA_LEN);
        Some(std::str::from_utf8(&block[..end]).map_err(|_| WireError::MetadataNotUtf8)?)
    } else {
        None
    };

    let codec_data = if header.has_codec_data() {
        let block = &buf[offset..offset + CODEC_DATA_LEN];
        offset += CODEC_DATA_LEN;
        Some(CodecData::read(block))
    } else {
        None
    };

    Ok(ParsedPacket {
        header,
        metadata,
        codec_data,
        payload: &buf[offset..],
    })
}

/// Serialize one Sesame packet.
///
/// The metadata block is emitted iff [`HAS_METADATA`] is set, the codec block
/// iff [`HAS_CODEC_DATA`] is set; a flag without its block is an error.
/// `header_size` is recomputed from the flags, reserved bytes are written as
/// zero, and metadata is truncated to 63 bytes, NUL-terminated and
/// zero-padded to 64.
pub fn serialize(
    header: &PacketHeader,
    metadata: Option<&str>,
    codec_data: Option<&CodecData>,
    payload: &[u8],
) -> Result<Bytes, WireError> {
    if header.has_metadata() && metadata.is_none() {
        return Err(WireError::MissingBlock { flag: HAS_METADATA });
    }
    if header.has_codec_data() && codec_data.is_none() {
        return Err(WireError::MissingBlock {
            flag: HAS_CODEC_DATA,
        });
    }

    let header_size = header.header_len();
    let mut buf = BytesMut::with_capacity(header_size + payload.len());
    buf.put_u32_le(MAGIC);
    buf.put_u32_le(header.flags);
    buf.put_u64_le(header.pts);
    buf.put_u64_le(header.id);
    buf.put_u16_le(WIRE_VERSION);
    buf.put_u16_le(header_size as u16);
    buf.put_u16_le(header.packet_type);
    buf.put_u16_le(0); // reserved

    if header.has_metadata() {
        let text = metadata.unwrap_or_default().as_bytes();
        let mut block = [0u8; METADATA_LEN];
        let len = utf8_prefix_len(text, METADATA_LEN - 1);
        block[..len].copy_from_slice(&text[..len]);
        buf.put_slice(&block);
    }
    if header.has_codec_data() {
        if let Some(cd) = codec_data {
            cd.write(&mut buf);
        }
    }
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Longest prefix of `text` that is at most `max` bytes and still ends on a
/// UTF-8 character boundary.
fn utf8_prefix_len(text: &[u8], max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    let mut len = max;
    while len > 0 && (text[len] & 0b1100_0000) == 0b1000_0000 {
        len -= 1;
    }
    len
}

/// An owned packet: the parsed header plus a refcounted payload slice.
///
/// Parsing stays zero-copy — the payload is a [`Bytes`] slice of the original
/// frame — but unlike [`ParsedPacket`] this may cross task boundaries and be
/// queued while a decoder reconfigures.
#[derive(Debug, Clone)]
pub struct PacketBuf {
    pub header: PacketHeader,
    pub metadata: Option<String>,
    pub codec_data: Option<CodecData>,
    pub payload: Bytes,
}

impl PacketBuf {
    /// Parse and take ownership of one frame.
    pub fn parse(raw: Bytes) -> Result<Self, WireError> {
        let (header, metadata, codec_data) = {
            let parsed = parse(&raw)?;
            (
                parsed.header,
                parsed.metadata.map(str::to_owned),
                parsed.codec_data,
            )
        };
        let payload = raw.slice(header.header_len()..);
        Ok(Self {
            header,
            metadata,
            codec_data,
            payload,
        })
    }

    pub fn is_keyframe(&self) -> bool {
        self.header.is_keyframe()
    }
}
