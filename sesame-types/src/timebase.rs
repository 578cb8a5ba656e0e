//! Rational timebase arithmetic.
//!
//! A timebase `{num, den}` scales a packet's `pts` into seconds. Rescaling
//! is done in 128-bit integer arithmetic; no floating point, no overflow for
//! 64-bit pts values.

use serde::{Deserialize, Serialize};

/// A rational timebase with `den > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    /// The microsecond timebase used throughout the playback core.
    pub const MICROSECONDS: Timebase = Timebase {
        num: 1,
        den: 1_000_000,
    };

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// A timebase is usable for rescaling when both terms are non-zero.
    /// The wire allows a zeroed block; callers substitute a default.
    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }
}

/// Rescale `pts` from timebase `src` to timebase `dst`:
/// `pts · (src.num · dst.den) / (src.den · dst.num)`.
///
/// Exact for the microsecond target used by the core. Degenerate timebases
/// (a zero term) leave `pts` untouched rather than dividing by zero.
pub fn rescale(pts: u64, src: Timebase, dst: Timebase) -> u64 {
    let numer = pts as i128 * src.num as i128 * dst.den as i128;
    let denom = src.den as i128 * dst.num as i128;
    if denom == 0 {
        return pts;
    }
    (numer / denom) as u64
}
