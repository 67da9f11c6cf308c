use crate::registry::ConnectionStats;

/// Cumulative receiver-side counters, updated on the datagram path.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn on_packet_received(&self, stats: &mut ConnectionStats, bytes: usize) {
        stats.bytes_received += bytes as u64;
        stats.packets_received += 1;
    }

    pub fn on_nak_detected(&self, stats: &mut ConnectionStats, nak_count: u32) {
        stats.packets_lost += nak_count;
        stats.nack_count = stats.nack_count.saturating_add(nak_count as u16);
    }

    /// Snapshot the cumulative counters so the evaluator can compute rates
    /// over the next period.
    pub fn reset_period(&self, stats: &mut ConnectionStats, current_ms: u64) {
        stats.last_bytes_received = stats.bytes_received;
        stats.last_packets_received = stats.packets_received;
        stats.last_packets_lost = stats.packets_lost;
        stats.last_eval_time = current_ms;
    }
}
