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

//! The players: live stream playback and local file playback. Both feed the
//! same decoder harness and frame scheduling machinery.

pub mod file;
pub mod live;

pub use file::{
    Demuxer, DemuxedTrack, FilePlayer, FilePlayerCallbacks, FilePlayerConfig, FilePlayerState,
    MediaInfo, MediaSample, PlayMode, TrackDescription,
};
pub use live::{LivePlayer, LivePlayerCallbacks, LivePlayerConfig, PlayerState};
