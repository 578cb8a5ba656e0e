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

//! The frame scheduler: a bounded, ordered buffer between decode and display.
//!
//! Incoming frames carry monotone stream timestamps; the scheduler anchors
//! them to wall-clock time through a sync point and releases each frame when
//! its stream time comes due, one buffer delay after scheduling began. A
//! rolling window of buffer sizes drives drift correction, and a buffer delay
//! of zero switches the scheduler into bypass mode where only the newest
//! frame survives.

use std::collections::VecDeque;

use log::debug;

use crate::stats::{LatencySample, SchedulerStats, StatsTracker};

/// Default playout delay.
const DEFAULT_BUFFER_DELAY_MS: u32 = 100;

/// Default drift check cadence, counted in successful dequeues.
const DEFAULT_DRIFT_CHECK_INTERVAL: u32 = 150;

/// Default drift threshold before the sync point is adjusted.
const DEFAULT_DRIFT_THRESHOLD_MS: u32 = 30;

/// Starting estimate of the stream frame duration (50 fps).
const DEFAULT_FRAME_DURATION_US: u64 = 20_000;

/// Frame-duration deltas outside (0, 100 ms) are discontinuities, not pacing.
const MAX_FRAME_DELTA_US: u64 = 100_000;

/// Bound on the buffer-size window feeding drift estimation.
const BUFFER_SIZE_WINDOW: usize = 300;

/// Why a frame was handed to the drop callback instead of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The buffer hit capacity and the oldest frame was evicted, or the
    /// scheduler was cleared.
    Overflow,
    /// Playout caught up past the frame; showing it would move time backwards.
    Skip,
}

/// Coarse playout state, derived from the buffer and sync point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Empty,
    Priming,
    Steady,
    OverflowResync,
    Bypass,
}

/// Scheduler configuration. `Default` matches a 100 ms live target.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Target playout delay. Zero selects bypass mode.
    pub buffer_delay_ms: u32,
    /// Hard capacity of the frame buffer.
    pub max_buffer: usize,
    /// Drift is evaluated every this many successful dequeues.
    pub drift_check_interval: u32,
    /// Configured drift threshold; the effective threshold is
    /// `min(drift_threshold_ms, 0.5 · buffer_delay_ms)`.
    pub drift_threshold_ms: u32,
}

impl SchedulerConfig {
    /// Configuration for a given playout delay, with the capacity sized for
    /// twice that delay of 60 fps video (floor of 30 frames).
    pub fn with_delay_ms(buffer_delay_ms: u32) -> Self {
        Self {
            buffer_delay_ms,
            max_buffer: default_max_buffer(buffer_delay_ms),
            drift_check_interval: DEFAULT_DRIFT_CHECK_INTERVAL,
            drift_threshold_ms: DEFAULT_DRIFT_THRESHOLD_MS,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::with_delay_ms(DEFAULT_BUFFER_DELAY_MS)
    }
}

fn default_max_buffer(buffer_delay_ms: u32) -> usize {
    let frames = (buffer_delay_ms as f64 / 1000.0 * 60.0 * 2.0).ceil() as usize;
    frames.max(30)
}

/// Timing attached to a frame at enqueue.
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    /// When the encoded packet arrived from the transport.
    pub arrival_time_ms: u64,
    /// When the decoded frame came out of the decoder.
    pub decode_time_ms: u64,
    pub is_keyframe: bool,
}

#[derive(Debug)]
struct Entry<F> {
    frame: F,
    stream_ts_us: u64,
    timing: FrameTiming,
}

#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    /// Wall clock at the moment scheduling began.
    start_real_us: u64,
    /// Stream clock anchor; drift correction slides this forward or back.
    start_stream_us: i64,
}

type DropCallback<F> = Box<dyn FnMut(F, DropReason) + Send>;

/// The jitter buffer. Generic over the opaque decoded-frame handle; the
/// scheduler never inspects frames, it only owns and releases them.
///
/// All methods are non-blocking and none of them panic. Dropped frames are
/// handed to the drop callback exactly once, which must release them.
pub struct FrameScheduler<F> {
    config: SchedulerConfig,
    buffer: VecDeque<Entry<F>>,
    sync: Option<SyncPoint>,
    frame_duration_us: u64,
    last_enqueued_ts: Option<u64>,
    dequeues_since_drift_check: u32,
    buffer_size_samples: VecDeque<usize>,
    overflowed: bool,
    stats: StatsTracker,
    on_drop: DropCallback<F>,
}

impl<F> FrameScheduler<F> {
    pub fn new(config: SchedulerConfig, on_drop: DropCallback<F>) -> Self {
        Self {
            config,
            buffer: VecDeque::new(),
            sync: None,
            frame_duration_us: DEFAULT_FRAME_DURATION_US,
            last_enqueued_ts: None,
            dequeues_since_drift_check: 0,
            buffer_size_samples: VecDeque::new(),
            overflowed: false,
            stats: StatsTracker::default(),
            on_drop,
        }
    }

    /// Accept ownership of a decoded frame.
    ///
    /// Timestamps from a monotone source append in order; at capacity the
    /// oldest frame is evicted with reason [`DropReason::Overflow`] and the
    /// sync point is invalidated so playout re-anchors on fresh frames.
    pub fn enqueue(&mut self, frame: F, stream_ts_us: u64, timing: FrameTiming) {
        self.stats.record_arrival(
            timing.arrival_time_ms,
            stream_ts_us,
            timing.is_keyframe,
            timing.decode_time_ms.saturating_sub(timing.arrival_time_ms),
        );

        if let Some(last) = self.last_enqueued_ts {
            let delta = stream_ts_us.saturating_sub(last);
            if delta > 0 && delta < MAX_FRAME_DELTA_US {
                self.frame_duration_us = (self.frame_duration_us * 7 + delta) / 8;
            }
        }
        self.last_enqueued_ts = Some(stream_ts_us);

        if self.buffer.len() >= self.config.max_buffer {
            if let Some(oldest) = self.buffer.pop_front() {
                debug!(
                    "scheduler full ({} frames), evicting ts={}",
                    self.config.max_buffer, oldest.stream_ts_us
                );
                self.drop_frame(oldest, DropReason::Overflow);
            }
            // Playout may only re-anchor once fresh frames have arrived.
            self.sync = None;
            self.overflowed = true;
        }

        self.buffer.push_back(Entry {
            frame,
            stream_ts_us,
            timing,
        });
        self.stats.total_enqueued += 1;
    }

    /// Pick the frame due for display at wall-clock `now_ms`, if any.
    ///
    /// In bypass mode this is the newest buffered frame and everything older
    /// is skipped. Otherwise frames are withheld until the buffer has primed,
    /// then released on the schedule established by the sync point; when the
    /// clock has moved past several frames, all but the last two are skipped
    /// and the older of the remaining pair is returned.
    pub fn dequeue(&mut self, now_ms: u64) -> Option<F> {
        if self.buffer.is_empty() {
            return None;
        }
        if self.config.buffer_delay_ms == 0 {
            return self.dequeue_bypass(now_ms);
        }

        let buffered_ms = self.buffered_ms();
        let priming_ms = u64::from(self.config.buffer_delay_ms / 2).min(self.frame_duration_us / 1000);
        if buffered_ms < priming_ms {
            return None;
        }

        let now_us = now_ms * 1000;
        let front_ts = self.buffer.front()?.stream_ts_us;
        let sync = *self.sync.get_or_insert_with(|| {
            debug!(
                "sync point: stream {} us anchored at real {} us",
                front_ts, now_us
            );
            SyncPoint {
                start_real_us: now_us,
                start_stream_us: front_ts as i64,
            }
        });
        self.overflowed = false;

        let expected = sync.start_stream_us + (now_us as i64 - sync.start_real_us as i64)
            - i64::from(self.config.buffer_delay_ms) * 1000;

        let mut eligible = 0usize;
        for entry in self.buffer.iter() {
            if entry.stream_ts_us as i64 <= expected {
                eligible += 1;
            } else {
                break;
            }
        }
        if eligible == 0 {
            return None;
        }

        // Keep a one-frame tolerance: skip down to the last two eligible
        // frames and show the older of the pair.
        while eligible > 2 {
            if let Some(stale) = self.buffer.pop_front() {
                self.drop_frame(stale, DropReason::Skip);
            }
            eligible -= 1;
        }

        let entry = self.buffer.pop_front()?;
        self.finish_dequeue(now_ms, &entry);
        Some(entry.frame)
    }

    fn dequeue_bypass(&mut self, now_ms: u64) -> Option<F> {
        let newest = self.buffer.pop_back()?;
        while let Some(stale) = self.buffer.pop_front() {
            self.drop_frame(stale, DropReason::Skip);
        }
        self.finish_dequeue(now_ms, &newest);
        Some(newest.frame)
    }

    fn finish_dequeue(&mut self, now_ms: u64, entry: &Entry<F>) {
        self.stats.total_dequeued += 1;
        self.stats.record_latency(LatencySample {
            decode_ms: entry
                .timing
                .decode_time_ms
                .saturating_sub(entry.timing.arrival_time_ms),
            buffer_wait_ms: now_ms.saturating_sub(entry.timing.decode_time_ms),
            total_ms: now_ms.saturating_sub(entry.timing.arrival_time_ms),
        });

        self.buffer_size_samples.push_back(self.buffer.len());
        while self.buffer_size_samples.len() > BUFFER_SIZE_WINDOW {
            self.buffer_size_samples.pop_front();
        }

        self.dequeues_since_drift_check += 1;
        if self.dequeues_since_drift_check >= self.config.drift_check_interval {
            self.dequeues_since_drift_check = 0;
            self.correct_drift();
        }
    }

    /// Compare the rolling average of buffered milliseconds against the
    /// target and slide the stream anchor when they have drifted apart.
    /// Positive drift means the buffer is growing, so consume faster.
    fn correct_drift(&mut self) {
        if self.config.buffer_delay_ms == 0 || self.buffer_size_samples.is_empty() {
            return;
        }
        let Some(sync) = self.sync.as_mut() else {
            return;
        };

        let avg_frames = self.buffer_size_samples.iter().sum::<usize>() as f64
            / self.buffer_size_samples.len() as f64;
        let avg_buffer_ms = avg_frames * self.frame_duration_us as f64 / 1000.0;
        let drift_ms = avg_buffer_ms - f64::from(self.config.buffer_delay_ms);

        let threshold_ms = f64::from(self.config.drift_threshold_ms)
            .min(0.5 * f64::from(self.config.buffer_delay_ms));
        if drift_ms.abs() > threshold_ms {
            sync.start_stream_us += (drift_ms * 1000.0) as i64;
            self.buffer_size_samples.clear();
            self.stats.drift_corrections += 1;
            debug!(
                "drift correction: avg buffer {:.1} ms vs target {} ms, anchor moved {:+.0} us",
                avg_buffer_ms,
                self.config.buffer_delay_ms,
                drift_ms * 1000.0
            );
        }
    }

    /// Drop every buffered frame with reason [`DropReason::Overflow`] and
    /// null the sync point.
    pub fn clear(&mut self) {
        while let Some(entry) = self.buffer.pop_front() {
            self.drop_frame(entry, DropReason::Overflow);
        }
        self.sync = None;
        self.overflowed = false;
        self.last_enqueued_ts = None;
    }

    /// Change the target playout delay. Crossing the zero boundary in either
    /// direction invalidates the sync point and the drift window.
    pub fn set_buffer_delay(&mut self, buffer_delay_ms: u32) {
        let was_bypass = self.config.buffer_delay_ms == 0;
        let is_bypass = buffer_delay_ms == 0;
        self.config.buffer_delay_ms = buffer_delay_ms;
        if was_bypass != is_bypass {
            self.sync = None;
            self.buffer_size_samples.clear();
            self.dequeues_since_drift_check = 0;
        }
    }

    /// Zero all counters and histories; the buffer and sync point stay.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
        self.buffer_size_samples.clear();
        self.dequeues_since_drift_check = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_delay_ms(&self) -> u32 {
        self.config.buffer_delay_ms
    }

    pub fn state(&self) -> SchedulerState {
        if self.config.buffer_delay_ms == 0 {
            SchedulerState::Bypass
        } else if self.buffer.is_empty() && self.sync.is_none() {
            SchedulerState::Empty
        } else if self.overflowed {
            SchedulerState::OverflowResync
        } else if self.sync.is_none() {
            SchedulerState::Priming
        } else {
            SchedulerState::Steady
        }
    }

    /// Current telemetry snapshot.
    pub fn stats(&self) -> SchedulerStats {
        let avg_buffer_ms = if self.buffer_size_samples.is_empty() {
            0.0
        } else {
            let avg_frames = self.buffer_size_samples.iter().sum::<usize>() as f64
                / self.buffer_size_samples.len() as f64;
            avg_frames * self.frame_duration_us as f64 / 1000.0
        };
        SchedulerStats {
            current_buffer_size: self.buffer.len(),
            current_buffer_ms: self.buffered_ms(),
            avg_buffer_ms,
            target_buffer_ms: u64::from(self.config.buffer_delay_ms),
            stream_frame_duration_us: self.frame_duration_us,
            dropped_frames: self.stats.dropped_frames,
            total_enqueued: self.stats.total_enqueued,
            total_dequeued: self.stats.total_dequeued,
            drift_corrections: self.stats.drift_corrections,
            latency: self.stats.latency_stats(),
        }
    }

    /// The bounded window of packet timing entries, oldest first.
    pub fn packet_timings(&self) -> Vec<crate::stats::PacketTimingEntry> {
        self.stats.packet_timings().copied().collect()
    }

    fn buffered_ms(&self) -> u64 {
        match (self.buffer.front(), self.buffer.back()) {
            (Some(front), Some(back)) => {
                back.stream_ts_us.saturating_sub(front.stream_ts_us) / 1000
            }
            _ => 0,
        }
    }

    fn drop_frame(&mut self, entry: Entry<F>, reason: DropReason) {
        self.stats.dropped_frames += 1;
        self.stats.mark_dropped(entry.stream_ts_us);
        (self.on_drop)(entry.frame, reason);
    }
}

impl<F> Drop for FrameScheduler<F> {
    fn drop(&mut self) {
        // Buffered frames still need their release action.
        while let Some(entry) = self.buffer.pop_front() {
            self.drop_frame(entry, DropReason::Overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Frames are just their stream timestamp; the drop log records every
    /// release so ownership can be audited.
    type DropLog = Arc<Mutex<Vec<(u64, DropReason)>>>;

    fn test_scheduler(delay_ms: u32, max_buffer: usize) -> (FrameScheduler<u64>, DropLog) {
        let log: DropLog = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let config = SchedulerConfig {
            buffer_delay_ms: delay_ms,
            max_buffer,
            ..SchedulerConfig::default()
        };
        let scheduler = FrameScheduler::new(
            config,
            Box::new(move |frame, reason| sink.lock().unwrap().push((frame, reason))),
        );
        (scheduler, log)
    }

    fn timing(arrival_time_ms: u64) -> FrameTiming {
        FrameTiming {
            arrival_time_ms,
            decode_time_ms: arrival_time_ms + 2,
            is_keyframe: false,
        }
    }

    fn enqueue_at(s: &mut FrameScheduler<u64>, ts_us: u64, arrival_ms: u64) {
        s.enqueue(ts_us, ts_us, timing(arrival_ms));
    }

    #[test]
    fn priming_withholds_until_enough_is_buffered() {
        let (mut s, _log) = test_scheduler(100, 30);

        enqueue_at(&mut s, 0, 0);
        assert_eq!(s.dequeue(0), None, "one frame is below the priming level");
        assert_eq!(s.state(), SchedulerState::Priming);

        enqueue_at(&mut s, 20_000, 20);
        enqueue_at(&mut s, 40_000, 40);
        // Primed now, but the schedule releases the first frame only after
        // the full buffer delay has elapsed.
        assert_eq!(s.dequeue(40), None);
        assert_eq!(s.dequeue(139), None);
        assert_eq!(s.dequeue(140), Some(0));
    }

    #[test]
    fn frames_release_on_the_stream_schedule() {
        let (mut s, log) = test_scheduler(100, 30);
        for i in 0..5u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        // Sync anchors at t=100 (first dequeue past priming).
        assert_eq!(s.dequeue(100), None);
        assert_eq!(s.dequeue(200), Some(0));
        assert_eq!(s.dequeue(219), None, "next frame is not due yet");
        assert_eq!(s.dequeue(220), Some(20_000));
        assert_eq!(s.dequeue(240), Some(40_000));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn skip_ahead_drops_late_frames_and_keeps_one_frame_tolerance() {
        let (mut s, log) = test_scheduler(100, 30);
        for i in 0..10u64 {
            enqueue_at(&mut s, i * 20_000, 0);
        }
        // Anchor the schedule at t=0; nothing is due for the first 100 ms.
        assert_eq!(s.dequeue(0), None);

        // At t=200 ms, stream time has reached 100 ms. Frames 0..60 ms are
        // skipped, 80 ms is displayed, 100 ms stays buffered as tolerance.
        assert_eq!(s.dequeue(200), Some(80_000));
        let drops = log.lock().unwrap().clone();
        assert_eq!(drops.len(), 4);
        assert!(drops.iter().all(|(_, r)| *r == DropReason::Skip));
        assert_eq!(
            drops.iter().map(|(ts, _)| *ts).collect::<Vec<_>>(),
            vec![0, 20_000, 40_000, 60_000]
        );
        assert_eq!(s.dequeue(200), Some(100_000));
    }

    #[test]
    fn overflow_evicts_oldest_and_forces_resync() {
        let (mut s, log) = test_scheduler(100, 3);
        for i in 0..5u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        let drops = log.lock().unwrap().clone();
        assert_eq!(drops.len(), 2);
        assert_eq!(
            drops,
            vec![(0, DropReason::Overflow), (20_000, DropReason::Overflow)]
        );
        assert_eq!(s.len(), 3);
        assert_eq!(s.state(), SchedulerState::OverflowResync);

        let stats = s.stats();
        assert_eq!(stats.dropped_frames, 2);
        assert_eq!(stats.total_enqueued, 5);
    }

    #[test]
    fn buffer_size_never_exceeds_capacity() {
        let (mut s, _log) = test_scheduler(100, 4);
        for i in 0..50u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
            assert!(s.len() <= 4);
        }
    }

    #[test]
    fn every_frame_is_handed_out_exactly_once() {
        let (mut s, log) = test_scheduler(100, 5);
        let mut dequeued = 0u64;
        for i in 0..40u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
            if s.dequeue(i * 20 + 500).is_some() {
                dequeued += 1;
            }
        }
        let still_buffered = s.len() as u64;
        let dropped = log.lock().unwrap().len() as u64;
        assert_eq!(dequeued + dropped + still_buffered, 40);
        assert_eq!(s.stats().total_dequeued, dequeued);
        assert_eq!(s.stats().dropped_frames, dropped);
    }

    #[test]
    fn bypass_returns_newest_and_skips_the_rest() {
        let (mut s, log) = test_scheduler(0, 30);
        for i in 0..4u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        assert_eq!(s.state(), SchedulerState::Bypass);
        assert_eq!(s.dequeue(100), Some(60_000));
        let drops = log.lock().unwrap().clone();
        assert_eq!(drops.len(), 3);
        assert!(drops.iter().all(|(_, r)| *r == DropReason::Skip));
        assert!(s.is_empty());
        assert_eq!(s.dequeue(120), None);
    }

    #[test]
    fn toggling_bypass_mid_stream() {
        let (mut s, log) = test_scheduler(100, 30);
        for i in 0..6u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        assert_eq!(s.dequeue(100), None);
        assert_eq!(s.dequeue(200), Some(0));

        s.set_buffer_delay(0);
        assert_eq!(s.dequeue(210), Some(100_000));
        let skipped: Vec<u64> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| *r == DropReason::Skip)
            .map(|(ts, _)| *ts)
            .collect();
        assert_eq!(skipped, vec![20_000, 40_000, 60_000, 80_000]);
    }

    #[test]
    fn drift_correction_advances_the_anchor() {
        let log: DropLog = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let config = SchedulerConfig {
            buffer_delay_ms: 100,
            max_buffer: 60,
            drift_check_interval: 10,
            drift_threshold_ms: 30,
        };
        let mut s = FrameScheduler::new(
            config,
            Box::new(move |frame: u64, reason| sink.lock().unwrap().push((frame, reason))),
        );

        // Feed enough lead that the buffer steadily holds ~10 frames
        // (~200 ms) while the schedule only consumes one per 20 ms.
        for i in 0..14u64 {
            enqueue_at(&mut s, i * 20_000, 0);
        }
        assert_eq!(s.dequeue(0), None); // anchor at t=0

        let mut now = 100;
        let mut next = 14u64;
        let mut corrections_seen = false;
        for _ in 0..12 {
            now += 20;
            enqueue_at(&mut s, next * 20_000, now);
            next += 1;
            s.dequeue(now);
            if s.stats().drift_corrections > 0 {
                corrections_seen = true;
                break;
            }
        }
        assert!(
            corrections_seen,
            "a 200 ms average against a 100 ms target must trigger a correction \
             within one drift interval"
        );
    }

    #[test]
    fn clear_drops_everything_as_overflow_and_nulls_sync() {
        let (mut s, log) = test_scheduler(100, 30);
        for i in 0..3u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        assert_eq!(s.dequeue(100), None);
        s.clear();
        assert!(s.is_empty());
        let drops = log.lock().unwrap().clone();
        assert_eq!(drops.len(), 3);
        assert!(drops.iter().all(|(_, r)| *r == DropReason::Overflow));
        assert_eq!(s.state(), SchedulerState::Empty);
    }

    #[test]
    fn equal_timestamps_are_fifo() {
        let (mut s, _log) = test_scheduler(100, 30);
        s.enqueue(1, 20_000, timing(0));
        s.enqueue(2, 20_000, timing(1));
        s.enqueue(3, 40_000, timing(2));
        assert_eq!(s.dequeue(0), None);
        // At t=100 only the two equal-timestamp frames are due.
        assert_eq!(s.dequeue(100), Some(1), "the older of two equal frames wins");
    }

    #[test]
    fn telemetry_reflects_playout() {
        let (mut s, _log) = test_scheduler(100, 30);
        for i in 0..4u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        let stats = s.stats();
        assert_eq!(stats.current_buffer_size, 4);
        assert_eq!(stats.current_buffer_ms, 60);
        assert_eq!(stats.total_enqueued, 4);
        assert_eq!(stats.stream_frame_duration_us, 20_000);
        assert_eq!(stats.target_buffer_ms, 100);

        assert_eq!(s.dequeue(60), None);
        let frame = s.dequeue(160);
        assert_eq!(frame, Some(0));
        let stats = s.stats();
        assert_eq!(stats.total_dequeued, 1);
        assert_eq!(stats.latency.decode_ms, 2);
        assert_eq!(stats.latency.total_ms, 160);

        let timings = s.packet_timings();
        assert_eq!(timings.len(), 4);
        assert_eq!(timings[1].interval_ms, 20);
    }

    #[test]
    fn reset_stats_keeps_the_buffer() {
        let (mut s, _log) = test_scheduler(100, 30);
        for i in 0..3u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        s.reset_stats();
        let stats = s.stats();
        assert_eq!(stats.total_enqueued, 0);
        assert_eq!(stats.current_buffer_size, 3);
    }

    #[test]
    fn dropping_the_scheduler_releases_buffered_frames() {
        let (mut s, log) = test_scheduler(100, 30);
        for i in 0..3u64 {
            enqueue_at(&mut s, i * 20_000, i * 20);
        }
        drop(s);
        assert_eq!(log.lock().unwrap().len(), 3);
    }
}
