//! Per-group suppression of NAK packets replayed across uplinks.
//!
//! Bonded senders often emit the same NAK on every uplink. The receiver
//! forwards one copy per 100 ms window and drops the rest, keyed by an
//! FNV-1a hash over the NAK payload.

use rustc_hash::FxHashMap;

use crate::protocol::{NAK_MAX_REPEATS, NAK_SUPPRESS_MS};

const FNV_OFFSET_BASIS: u64 = 1_469_598_103_934_665_603;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// Payload begins after the 16-byte SRT header.
const NAK_PAYLOAD_OFFSET: usize = 16;

#[derive(Debug, Clone, Copy)]
struct NakEntry {
    timestamp_ms: u64,
    repeat_count: u32,
}

#[derive(Debug, Default)]
pub struct NakCache {
    seen: FxHashMap<u64, NakEntry>,
}

/// Hash the NAK payload, truncated to `prefix_bytes`.
///
/// Truncation keeps hashing cheap for oversized loss lists while still
/// discriminating between distinct NAKs in practice.
pub fn hash_nak_payload(buf: &[u8], prefix_bytes: usize) -> u64 {
    if buf.len() <= NAK_PAYLOAD_OFFSET {
        return 0;
    }

    let payload = &buf[NAK_PAYLOAD_OFFSET..];
    let take = payload.len().min(prefix_bytes);

    let mut hash = FNV_OFFSET_BASIS;
    for &byte in &payload[..take] {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl NakCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a NAK with this payload hash should be forwarded.
    ///
    /// First sighting is always accepted. A replay is rejected when the
    /// monotonic clock appears to have gone backwards, within the
    /// suppression window, or once the repeat budget is spent.
    pub fn should_accept(&mut self, hash: u64, current_time_ms: u64) -> bool {
        let Some(entry) = self.seen.get_mut(&hash) else {
            self.seen.insert(
                hash,
                NakEntry {
                    timestamp_ms: current_time_ms,
                    repeat_count: 0,
                },
            );
            return true;
        };

        if current_time_ms < entry.timestamp_ms {
            return false;
        }

        if current_time_ms - entry.timestamp_ms < NAK_SUPPRESS_MS {
            return false;
        }

        if entry.repeat_count >= NAK_MAX_REPEATS {
            return false;
        }

        entry.timestamp_ms = current_time_ms;
        entry.repeat_count += 1;
        true
    }
}
