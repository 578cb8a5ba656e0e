pub static DEFAULT_VIDEO_TRACK: &str = "video";
pub static DEFAULT_AUDIO_TRACK: &str = "audio";

/// Target playout delay when none is configured.
pub const DEFAULT_BUFFER_DELAY_MS: u32 = 100;
/// Upper bound accepted for the playout delay option.
pub const MAX_BUFFER_DELAY_MS: u32 = 5000;

/// Minimum spacing between keyframe requests.
pub const KEYFRAME_REQUEST_INTERVAL_MS: u64 = 1000;

/// Pending-chunk ceiling before the decoder harness reports overflow.
pub const MAX_DECODER_QUEUE: usize = 10;

/// How far ahead of the playhead audio samples are fed in file playback.
pub const AUDIO_LOOK_AHEAD_MS: u64 = 2000;
/// Decoded frames required before file playback reports ready.
pub const MIN_BUFFER_FRAMES: usize = 3;
/// Deadline for the buffer-ready barrier.
pub const BUFFER_READY_TIMEOUT_MS: u64 = 5000;

/// Packets per group on audio tracks of a session-broadcast sink.
pub const AUDIO_GROUP_LENGTH: u64 = 50;

/// Deadline for a control request on the request/response adapter.
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Fixed delay before an automatic reconnect attempt.
pub const RECONNECT_DELAY_MS: u64 = 5000;
