//! # Sesame frame scheduler
//!
//! A jitter buffer that sits between the decoder and the renderer. It absorbs
//! delivery jitter, matches stream time to wall-clock time through a sync
//! point, corrects long-term drift between the two clocks, drops frames that
//! can no longer be shown, and exposes live playout telemetry.
//!
//! The scheduler owns every buffered frame exclusively: `enqueue` transfers
//! ownership in, `dequeue` transfers it back out, and any frame that is
//! skipped or overflowed is handed to the configured drop callback exactly
//! once.

pub mod scheduler;
pub mod stats;

pub use scheduler::{
    DropReason, FrameScheduler, FrameTiming, SchedulerConfig, SchedulerState,
};
pub use stats::{LatencyStats, PacketTimingEntry, SchedulerStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_functionality() {
        let config = SchedulerConfig::default();
        let mut scheduler: FrameScheduler<u32> = FrameScheduler::new(config, Box::new(|_, _| {}));

        assert!(scheduler.is_empty());
        assert_eq!(scheduler.dequeue(0), None);
        assert_eq!(scheduler.stats().target_buffer_ms, 100);
    }
}
