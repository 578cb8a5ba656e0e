//! Compact one-line packet summaries for diagnostics logging.

use sesame_types::{PacketBuf, PacketType};

/// A terse human-readable description of a packet, cheap enough to build on
/// every packet when debug logging is on.
pub fn packet_summary(packet: &PacketBuf) -> String {
    let kind = match packet.header.known_type() {
        Some(PacketType::VideoFrame) => "video",
        Some(PacketType::AudioFrame) => "audio",
        Some(PacketType::Rpc) => "rpc",
        Some(PacketType::MuxedData) => "muxed",
        Some(PacketType::DecoderData) => "decoder-data",
        None => "unknown",
    };
    let mut summary = format!(
        "{kind} pts={} id={} {}B",
        packet.header.pts,
        packet.header.id,
        packet.payload.len()
    );
    if packet.is_keyframe() {
        summary.push_str(" key");
    }
    if let Some(cd) = &packet.codec_data {
        summary.push_str(&format!(
            " codec={} {}x{}",
            cd.codec_type, cd.width, cd.height
        ));
    }
    if let Some(meta) = &packet.metadata {
        summary.push_str(&format!(" meta={meta}"));
    }
    summary
}
