use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::KEYFRAME_REQUEST_INTERVAL_MS;

/// Milliseconds since the Unix epoch, for callers that do not carry their own
/// clock. State machines take `now_ms` parameters instead of calling this so
/// tests can drive time explicitly.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Rate limiter for keyframe requests, shared by the live player and the
/// request/response adapter: at most one request per interval.
#[derive(Debug, Clone)]
pub struct KeyframeThrottle {
    min_interval_ms: u64,
    last_request_ms: Option<u64>,
}

impl KeyframeThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_request_ms: None,
        }
    }

    /// True when a request is allowed now; records the request time when it is.
    pub fn ready(&mut self, now_ms: u64) -> bool {
        match self.last_request_ms {
            Some(last) if now_ms.saturating_sub(last) < self.min_interval_ms => false,
            _ => {
                self.last_request_ms = Some(now_ms);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_request_ms = None;
    }
}

impl Default for KeyframeThrottle {
    fn default() -> Self {
        Self::new(KEYFRAME_REQUEST_INTERVAL_MS)
    }
}
