//! Utility functions shared across the codebase

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

fn process_start() -> Instant {
    *PROCESS_START.get_or_init(Instant::now)
}

/// Milliseconds since process start, from the monotonic clock.
///
/// All liveness timers and the NAK suppression window are driven by this
/// clock; wall-clock adjustments never affect them.
pub fn now_ms() -> u64 {
    process_start().elapsed().as_millis() as u64
}

/// Whole seconds since process start, from the monotonic clock.
pub fn now_secs() -> u64 {
    process_start().elapsed().as_secs()
}
