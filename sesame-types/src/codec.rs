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

//! Codec identity: mapping wire `codec_type` values to decoder configuration
//! strings, and detecting when a stream's codec identity has changed.

use crate::wire::CodecData;

/// AVC profile used when the wire advertises zero.
const AVC_DEFAULT_PROFILE: u8 = 0x42;
/// AVC level used when the wire advertises zero.
const AVC_DEFAULT_LEVEL: u8 = 0x1f;

/// Codec ids carried in [`CodecData::codec_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecId {
    Vp8 = 1,
    Vp9 = 2,
    H264 = 3,
    Hevc = 4,
    Av1 = 5,
    Opus = 64,
    Aac = 65,
    Pcm = 66,
}

impl CodecId {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(CodecId::Vp8),
            2 => Some(CodecId::Vp9),
            3 => Some(CodecId::H264),
            4 => Some(CodecId::Hevc),
            5 => Some(CodecId::Av1),
            64 => Some(CodecId::Opus),
            65 => Some(CodecId::Aac),
            66 => Some(CodecId::Pcm),
            _ => None,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, CodecId::Opus | CodecId::Aac | CodecId::Pcm)
    }
}

/// Map a codec block to the decoder's codec-configuration string
/// (the WebCodecs codec-registry spelling).
///
/// AVC is the only entry parameterized by the wire: `avc1.PPCCLL` in hex,
/// with `codec_profile`/`codec_level` from the block and `42`/`00`/`1f`
/// defaults when zero. Returns `None` for unknown codec types.
pub fn codec_string(cd: &CodecData) -> Option<String> {
    let id = CodecId::from_u8(cd.codec_type)?;
    Some(match id {
        CodecId::Vp8 => "vp8".to_string(),
        CodecId::Vp9 => "vp09.00.10.08".to_string(),
        CodecId::H264 => {
            let profile = if cd.codec_profile != 0 {
                cd.codec_profile as u8
            } else {
                AVC_DEFAULT_PROFILE
            };
            let level = if cd.codec_level != 0 {
                cd.codec_level as u8
            } else {
                AVC_DEFAULT_LEVEL
            };
            format!("avc1.{profile:02x}00{level:02x}")
        }
        CodecId::Hevc => "hev1.1.6.L93.B0".to_string(),
        CodecId::Av1 => "av01.0.04M.08".to_string(),
        CodecId::Opus => "opus".to_string(),
        CodecId::Aac => "mp4a.40.2".to_string(),
        CodecId::Pcm => "pcm-f32".to_string(),
    })
}

/// True iff moving from `current` to `next` requires reconfiguring the
/// decoder: one side is present and the other is not, or any field of the
/// codec-identity tuple differs.
pub fn codec_changed(current: Option<&CodecData>, next: Option<&CodecData>) -> bool {
    match (current, next) {
        (None, None) => false,
        (Some(a), Some(b)) => a.identity() != b.identity(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cd(codec_type: u8) -> CodecData {
        CodecData {
            codec_type,
            ..Default::default()
        }
    }

    #[test]
    fn avc_string_uses_wire_profile_and_level() {
        let mut data = cd(3);
        data.codec_profile = 0x64;
        data.codec_level = 0x28;
        assert_eq!(codec_string(&data).as_deref(), Some("avc1.640028"));
    }

    #[test]
    fn avc_string_defaults_when_zero() {
        assert_eq!(codec_string(&cd(3)).as_deref(), Some("avc1.42001f"));
    }

    #[test]
    fn known_codecs_map_to_strings() {
        assert_eq!(codec_string(&cd(1)).as_deref(), Some("vp8"));
        assert_eq!(codec_string(&cd(2)).as_deref(), Some("vp09.00.10.08"));
        assert_eq!(codec_string(&cd(5)).as_deref(), Some("av01.0.04M.08"));
        assert_eq!(codec_string(&cd(64)).as_deref(), Some("opus"));
        assert_eq!(codec_string(&cd(65)).as_deref(), Some("mp4a.40.2"));
    }

    #[test]
    fn unknown_codec_maps_to_none() {
        assert_eq!(codec_string(&cd(0)), None);
        assert_eq!(codec_string(&cd(200)), None);
    }

    #[test]
    fn change_detection_over_presence() {
        let a = cd(3);
        assert!(!codec_changed(None, None));
        assert!(codec_changed(None, Some(&a)));
        assert!(codec_changed(Some(&a), None));
        assert!(!codec_changed(Some(&a), Some(&a)));
    }

    #[test]
    fn change_detection_over_identity_fields() {
        let base = CodecData {
            codec_type: 3,
            width: 1920,
            height: 1080,
            codec_profile: 0x42,
            codec_level: 0x1f,
            ..Default::default()
        };
        let mut resized = base;
        resized.width = 1280;
        resized.height = 720;
        assert!(codec_changed(Some(&base), Some(&resized)));

        let mut hevc = base;
        hevc.codec_type = 4;
        assert!(codec_changed(Some(&base), Some(&hevc)));

        // Fields outside the identity tuple do not force a reconfigure.
        let mut faster = base;
        faster.sample_rate = 48_000;
        faster.bit_depth = 10;
        assert!(!codec_changed(Some(&base), Some(&faster)));
    }
}
