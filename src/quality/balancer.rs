//! Maps error points to a discrete weight bucket and an ACK throttle factor.
//!
//! Throttling stretches the minimum interval between SRTLA ACKs on a poor
//! link; the sender perceives the link as slower and shifts traffic away.

use tracing::{debug, info};

use crate::protocol::*;
use crate::registry::ConnectionGroup;

/// Throttle changes smaller than this are ignored to avoid oscillation.
const THROTTLE_HYSTERESIS: f64 = 0.01;

#[derive(Debug, Default, Clone, Copy)]
pub struct LoadBalancer;

impl LoadBalancer {
    /// Re-bucket weights after a quality evaluation and derive each
    /// connection's ACK throttle factor. With load balancing disabled the
    /// pass still runs once per evaluation period to restore full throttle.
    pub fn adjust_weights(&self, group: &mut ConnectionGroup, current_time: u64) {
        if group.connections().is_empty() {
            return;
        }

        if group.load_balancing_enabled {
            if group.last_load_balance_eval >= group.last_quality_eval {
                return;
            }
        } else if group.last_load_balance_eval != 0
            && group.last_load_balance_eval + CONN_QUALITY_EVAL_PERIOD > current_time
        {
            return;
        }

        group.last_load_balance_eval = current_time;

        let tag = group.tag();
        let load_balancing_enabled = group.load_balancing_enabled;
        let mut any_change = false;
        let mut max_weight = 0u8;
        let mut active_conns = 0usize;

        for conn in group.connections_mut().iter_mut() {
            let new_weight = weight_for_error_points(conn.stats.error_points);
            if new_weight != conn.stats.weight_percent {
                conn.stats.weight_percent = new_weight;
                any_change = true;
            }

            if !conn.is_timed_out(current_time) {
                max_weight = max_weight.max(conn.stats.weight_percent);
                active_conns += 1;
            }
        }

        debug!(
            "[group {tag}] active connections: {active_conns}, max weight: {max_weight}, load balancing: {load_balancing_enabled}"
        );

        if load_balancing_enabled && active_conns > 1 {
            for conn in group.connections_mut().iter_mut() {
                let absolute = f64::from(conn.stats.weight_percent) / f64::from(WEIGHT_FULL);
                let relative = if max_weight > 0 {
                    f64::from(conn.stats.weight_percent) / f64::from(max_weight)
                } else {
                    0.0
                };
                let new_throttle = absolute.min(relative).max(MIN_ACK_RATE);

                if (conn.stats.ack_throttle_factor - new_throttle).abs() > THROTTLE_HYSTERESIS {
                    debug!(
                        "[{}] throttle factor updated: {:.2} -> {:.2}",
                        conn.address(),
                        conn.stats.ack_throttle_factor,
                        new_throttle
                    );
                    conn.stats.ack_throttle_factor = new_throttle;
                    any_change = true;
                }
            }
        } else {
            for conn in group.connections_mut().iter_mut() {
                if conn.stats.ack_throttle_factor != 1.0 {
                    conn.stats.ack_throttle_factor = 1.0;
                    any_change = true;
                }
            }
        }

        if any_change {
            info!("[group {tag}] connection parameters adjusted:");
            for conn in group.connections() {
                info!(
                    "  [{}] weight: {}%, throttle: {:.2}, error points: {}, bytes: {}, packets: {}, lost: {}",
                    conn.address(),
                    conn.stats.weight_percent,
                    conn.stats.ack_throttle_factor,
                    conn.stats.error_points,
                    conn.stats.bytes_received,
                    conn.stats.packets_received,
                    conn.stats.packets_lost
                );
            }
        }
    }
}

fn weight_for_error_points(error_points: u32) -> u8 {
    match error_points {
        p if p >= 40 => WEIGHT_CRITICAL,
        p if p >= 25 => WEIGHT_POOR,
        p if p >= 15 => WEIGHT_FAIR,
        p if p >= 10 => WEIGHT_DEGRADED,
        p if p >= 5 => WEIGHT_EXCELLENT,
        _ => WEIGHT_FULL,
    }
}
