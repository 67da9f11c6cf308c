//! Periodic per-link quality scoring.
//!
//! Each connection is scored into error points from two sources:
//!
//! 1. Receiver-side metrics (always available): measured bandwidth against a
//!    per-group reference, and packet-loss ratio.
//! 2. Sender telemetry (when extended keepalives are received): RTT and RTT
//!    jitter, sender NAK rate, congestion-window utilization, and a bitrate
//!    cross-check.
//!
//! Senders that support extended keepalives get lighter bandwidth penalties.
//! Aggressive bandwidth scoring combined with ACK throttling forms a feedback
//! loop: a throttled link carries less traffic, measures lower bandwidth,
//! collects more penalties, and ends up pinned at zero. Telemetry-capable
//! senders supply direct congestion signals, so bandwidth can be weighted
//! more gently for them. The capability bit persists even while the link is
//! busy and keepalives pause.

use tracing::{debug, warn};

use super::metrics::MetricsCollector;
use crate::protocol::*;
use crate::registry::{ConnectionGroup, ConnectionStats};
use crate::utils::now_ms;

struct PeriodMetrics {
    bandwidth_kbits_per_sec: f64,
    packet_loss_ratio: f64,
    packets_diff: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QualityEvaluator;

impl QualityEvaluator {
    /// Score every connection in the group, at most once per
    /// `CONN_QUALITY_EVAL_PERIOD`. Callers may invoke this opportunistically
    /// (e.g. on a NAK burst); the period guard makes that safe.
    pub fn evaluate_group(&self, group: &mut ConnectionGroup, current_time: u64) {
        self.evaluate_group_at(group, current_time, now_ms());
    }

    /// Like [`evaluate_group`](Self::evaluate_group), with the millisecond
    /// timestamp supplied by the caller.
    pub fn evaluate_group_at(
        &self,
        group: &mut ConnectionGroup,
        current_time: u64,
        current_ms: u64,
    ) {
        if group.connections().is_empty() || !group.load_balancing_enabled {
            return;
        }
        if group.last_quality_eval + CONN_QUALITY_EVAL_PERIOD > current_time {
            return;
        }

        let tag = group.tag();
        debug!("[group {tag}] evaluating connection quality");

        let metrics = MetricsCollector;

        let mut period = Vec::with_capacity(group.connections().len());
        let mut total_bytes_per_sec = 0u64;

        for conn in group.connections() {
            let stats = &conn.stats;
            let time_diff_ms = if stats.last_eval_time > 0 {
                current_ms.saturating_sub(stats.last_eval_time)
            } else {
                0
            };

            let mut bandwidth_kbits_per_sec = 0.0;
            let mut packet_loss_ratio = 0.0;
            let mut packets_diff = 0u64;

            if time_diff_ms > 0 {
                let bytes_diff = stats.bytes_received - stats.last_bytes_received;
                packets_diff = stats.packets_received - stats.last_packets_received;
                let lost_diff = stats.packets_lost - stats.last_packets_lost;

                let seconds = time_diff_ms as f64 / 1000.0;
                let bandwidth_bytes_per_sec = bytes_diff as f64 / seconds;
                bandwidth_kbits_per_sec = bandwidth_bytes_per_sec * 8.0 / 1000.0;

                if packets_diff > 0 {
                    packet_loss_ratio =
                        lost_diff as f64 / (packets_diff + u64::from(lost_diff)) as f64;
                }

                total_bytes_per_sec += bandwidth_bytes_per_sec as u64;
            }

            period.push(PeriodMetrics {
                bandwidth_kbits_per_sec,
                packet_loss_ratio,
                packets_diff,
            });
        }

        group.total_target_bandwidth = total_bytes_per_sec;

        let all_bandwidths: Vec<f64> = period.iter().map(|m| m.bandwidth_kbits_per_sec).collect();
        let max_kbits_per_sec = all_bandwidths.iter().copied().fold(0.0f64, f64::max);

        let median_kbits_per_sec = if max_kbits_per_sec > 0.0 {
            // Reference bandwidth: median of the links pulling their weight,
            // falling back to the overall median when none qualify.
            let good_threshold = max_kbits_per_sec * GOOD_CONNECTION_THRESHOLD;
            let good: Vec<f64> = all_bandwidths
                .iter()
                .copied()
                .filter(|&bw| bw >= good_threshold)
                .collect();
            if !good.is_empty() {
                median(good)
            } else {
                median(all_bandwidths)
            }
        } else {
            0.0
        };

        let min_expected_kbits_per_sec =
            100.0f64.max(MIN_ACCEPTABLE_TOTAL_BANDWIDTH_KBPS / period.len() as f64);

        debug!(
            "[group {tag}] total bandwidth: {:.2} kbits/s, max: {:.2} kbits/s, median: {:.2} kbits/s, min expected per conn: {:.2} kbps",
            total_bytes_per_sec as f64 * 8.0 / 1000.0,
            max_kbits_per_sec,
            median_kbits_per_sec,
            min_expected_kbits_per_sec
        );

        for (conn, m) in group.connections_mut().iter_mut().zip(&period) {
            if current_time.saturating_sub(conn.connection_start()) < CONNECTION_GRACE_PERIOD {
                debug!(
                    "[{}] connection in grace period, skipping penalties",
                    conn.address()
                );
                continue;
            }

            conn.stats.error_points = 0;

            let is_poor_connection =
                m.bandwidth_kbits_per_sec < median_kbits_per_sec * GOOD_CONNECTION_THRESHOLD;
            let mut expected_kbits_per_sec = if is_poor_connection {
                min_expected_kbits_per_sec
            } else {
                median_kbits_per_sec
            };
            expected_kbits_per_sec = expected_kbits_per_sec.max(min_expected_kbits_per_sec);

            let performance_ratio = if expected_kbits_per_sec > 0.0 {
                m.bandwidth_kbits_per_sec / expected_kbits_per_sec
            } else {
                0.0
            };

            let supports_ext = conn.stats.sender_supports_extended_keepalives;
            let has_telemetry = conn.stats.has_valid_sender_telemetry(current_time);

            conn.stats.error_points += bandwidth_error_points(performance_ratio, supports_ext);
            conn.stats.error_points += loss_error_points(m.packet_loss_ratio);

            let mut telemetry_points = 0u32;
            if has_telemetry {
                telemetry_points += rtt_error_points(&conn.stats);
                telemetry_points += nak_error_points(&mut conn.stats, m.packets_diff);
                telemetry_points += window_error_points(&conn.stats);

                let receiver_bitrate_bps = m.bandwidth_kbits_per_sec * 125.0;
                validate_bitrate(&conn.stats, receiver_bitrate_bps, conn.address());

                conn.stats.error_points += telemetry_points;
            }

            metrics.reset_period(&mut conn.stats, current_ms);
            conn.stats.nack_count = 0;

            debug!(
                "[{}] [group {tag}] stats: BW {:.2} kbits/s ({:.2}% of expected), loss {:.2}%, error points {} ({})",
                conn.address(),
                m.bandwidth_kbits_per_sec,
                if expected_kbits_per_sec > 0.0 {
                    m.bandwidth_kbits_per_sec / expected_kbits_per_sec * 100.0
                } else {
                    0.0
                },
                m.packet_loss_ratio * 100.0,
                conn.stats.error_points,
                if has_telemetry {
                    "receiver + sender telemetry"
                } else {
                    "receiver-only"
                },
            );
        }

        group.last_quality_eval = current_time;
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn bandwidth_error_points(performance_ratio: f64, supports_ext_keepalives: bool) -> u32 {
    if supports_ext_keepalives {
        // Lighter tier: telemetry carries the congestion signal for these
        // senders, and heavy bandwidth penalties would feed the throttle loop.
        match performance_ratio {
            r if r < 0.3 => 10,
            r if r < 0.5 => 7,
            r if r < 0.7 => 4,
            r if r < 0.85 => 2,
            _ => 0,
        }
    } else {
        match performance_ratio {
            r if r < 0.3 => 40,
            r if r < 0.5 => 25,
            r if r < 0.7 => 15,
            r if r < 0.85 => 5,
            _ => 0,
        }
    }
}

fn loss_error_points(packet_loss_ratio: f64) -> u32 {
    match packet_loss_ratio {
        r if r > 0.20 => 40,
        r if r > 0.10 => 20,
        r if r > 0.05 => 10,
        r if r > 0.01 => 5,
        _ => 0,
    }
}

fn rtt_variance(stats: &ConnectionStats) -> f64 {
    let samples: Vec<f64> = stats
        .rtt_history
        .iter()
        .filter(|&&rtt| rtt > 0)
        .map(|&rtt| rtt as f64)
        .collect();
    if samples.len() < 2 {
        return 0.0;
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance_sum: f64 = samples.iter().map(|s| (s - mean) * (s - mean)).sum();
    (variance_sum / samples.len() as f64).sqrt()
}

fn rtt_error_points(stats: &ConnectionStats) -> u32 {
    let mut points = 0;

    if stats.rtt_us > RTT_THRESHOLD_CRITICAL_US {
        points += 20;
    } else if stats.rtt_us > RTT_THRESHOLD_HIGH_US {
        points += 10;
    } else if stats.rtt_us > RTT_THRESHOLD_MODERATE_US {
        points += 5;
    }

    if rtt_variance(stats) > RTT_VARIANCE_THRESHOLD_US {
        points += 10;
    }

    points
}

fn nak_error_points(stats: &mut ConnectionStats, packets_diff: u64) -> u32 {
    if packets_diff == 0 || stats.sender_nak_count == 0 {
        return 0;
    }

    let nak_diff = stats.sender_nak_count.saturating_sub(stats.last_sender_nak_count);
    let nak_rate = f64::from(nak_diff) / packets_diff as f64;
    stats.last_sender_nak_count = stats.sender_nak_count;

    match nak_rate {
        r if r > NAK_RATE_CRITICAL => 40,
        r if r > NAK_RATE_HIGH => 20,
        r if r > NAK_RATE_MODERATE => 10,
        r if r > NAK_RATE_LOW => 5,
        _ => 0,
    }
}

fn window_error_points(stats: &ConnectionStats) -> u32 {
    if stats.window <= 0 {
        return 0;
    }

    let utilization = f64::from(stats.in_flight) / f64::from(stats.window);
    // A persistently full window indicates congestion. Low utilization can
    // mean client-side throttling, which is informational, not penalized.
    if utilization > WINDOW_UTILIZATION_CONGESTED {
        15
    } else {
        0
    }
}

fn validate_bitrate(
    stats: &ConnectionStats,
    receiver_bitrate_bps: f64,
    addr: std::net::SocketAddr,
) {
    if stats.sender_bitrate_bps == 0 {
        return;
    }

    let sender = f64::from(stats.sender_bitrate_bps);
    let ratio = (receiver_bitrate_bps - sender).abs() / sender;
    if ratio > BITRATE_DISCREPANCY_THRESHOLD {
        warn!(
            "[{addr}] large bitrate discrepancy: sender={} bps, receiver={} bps ({:.1}%)",
            stats.sender_bitrate_bps,
            receiver_bitrate_bps as u64,
            ratio * 100.0
        );
    }
}
