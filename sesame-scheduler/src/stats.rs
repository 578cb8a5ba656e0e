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

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Bound on the packet-timing window exposed through telemetry.
pub const PACKET_HISTORY_SIZE: usize = 300;

/// Bound on the per-frame latency window used for the rolling averages.
const LATENCY_HISTORY_SIZE: usize = 120;

/// One entry in the packet arrival window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PacketTimingEntry {
    /// Wall-clock arrival time of the decoded frame at the scheduler.
    pub arrival_time_ms: u64,
    /// Interval since the previous arrival.
    pub interval_ms: u64,
    /// Stream timestamp of the frame.
    pub stream_ts_us: u64,
    pub is_keyframe: bool,
    /// Time the frame spent in the decoder before arriving here.
    pub decode_latency_ms: u64,
    /// Set when the frame was later dropped instead of displayed.
    pub was_dropped: bool,
}

/// Per-frame latency breakdown of the most recent dequeue, plus rolling
/// averages over the latency window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub decode_ms: u64,
    pub buffer_wait_ms: u64,
    pub total_ms: u64,
    pub avg_decode_ms: f64,
    pub avg_buffer_wait_ms: f64,
    pub avg_total_ms: f64,
}

/// A point-in-time snapshot of the scheduler's playout state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub current_buffer_size: usize,
    /// Span of stream time currently buffered.
    pub current_buffer_ms: u64,
    /// Rolling average of buffered milliseconds (buffer size window times the
    /// estimated frame duration).
    pub avg_buffer_ms: f64,
    /// The configured buffer delay.
    pub target_buffer_ms: u64,
    /// Rolling estimate of the stream's frame duration.
    pub stream_frame_duration_us: u64,
    pub dropped_frames: u64,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub drift_corrections: u64,
    pub latency: LatencyStats,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LatencySample {
    pub decode_ms: u64,
    pub buffer_wait_ms: u64,
    pub total_ms: u64,
}

/// Counter and history bookkeeping for the scheduler.
///
/// Histories are bounded; recording is O(1) amortized and never fails.
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub dropped_frames: u64,
    pub drift_corrections: u64,
    packet_timings: VecDeque<PacketTimingEntry>,
    last_arrival_ms: Option<u64>,
    latency_window: VecDeque<LatencySample>,
    last_latency: LatencySample,
}

impl StatsTracker {
    /// Record a frame arrival in the packet-timing window.
    pub fn record_arrival(
        &mut self,
        arrival_time_ms: u64,
        stream_ts_us: u64,
        is_keyframe: bool,
        decode_latency_ms: u64,
    ) {
        let interval_ms = self
            .last_arrival_ms
            .map(|last| arrival_time_ms.saturating_sub(last))
            .unwrap_or(0);
        self.last_arrival_ms = Some(arrival_time_ms);

        self.packet_timings.push_back(PacketTimingEntry {
            arrival_time_ms,
            interval_ms,
            stream_ts_us,
            is_keyframe,
            decode_latency_ms,
            was_dropped: false,
        });
        while self.packet_timings.len() > PACKET_HISTORY_SIZE {
            self.packet_timings.pop_front();
        }
    }

    /// Flag the timing entry of a dropped frame. Newest match wins, since
    /// stream timestamps repeat only across stream restarts.
    pub fn mark_dropped(&mut self, stream_ts_us: u64) {
        if let Some(entry) = self
            .packet_timings
            .iter_mut()
            .rev()
            .find(|e| e.stream_ts_us == stream_ts_us)
        {
            entry.was_dropped = true;
        }
    }

    pub fn record_latency(&mut self, sample: LatencySample) {
        self.last_latency = sample;
        self.latency_window.push_back(sample);
        while self.latency_window.len() > LATENCY_HISTORY_SIZE {
            self.latency_window.pop_front();
        }
    }

    pub fn latency_stats(&self) -> LatencyStats {
        let n = self.latency_window.len();
        let mut stats = LatencyStats {
            decode_ms: self.last_latency.decode_ms,
            buffer_wait_ms: self.last_latency.buffer_wait_ms,
            total_ms: self.last_latency.total_ms,
            ..Default::default()
        };
        if n > 0 {
            let n = n as f64;
            stats.avg_decode_ms =
                self.latency_window.iter().map(|s| s.decode_ms).sum::<u64>() as f64 / n;
            stats.avg_buffer_wait_ms = self
                .latency_window
                .iter()
                .map(|s| s.buffer_wait_ms)
                .sum::<u64>() as f64
                / n;
            stats.avg_total_ms =
                self.latency_window.iter().map(|s| s.total_ms).sum::<u64>() as f64 / n;
        }
        stats
    }

    pub fn packet_timings(&self) -> impl Iterator<Item = &PacketTimingEntry> {
        self.packet_timings.iter()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
