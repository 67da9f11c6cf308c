use std::net::SocketAddr;

use crate::protocol::{
    CONN_TIMEOUT, KEEPALIVE_STALENESS_THRESHOLD, RECV_ACK_INT, RTT_HISTORY_SIZE, WEIGHT_FULL,
};

/// Per-connection counters and score state.
///
/// The receiver-side counters are always populated; the sender-side fields
/// only carry data once an extended keepalive has been parsed for this
/// connection.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    // Receiver-side metrics
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: u32,
    /// NAKs seen since the last quality evaluation; triggers opportunistic
    /// re-evaluation when it spikes.
    pub nack_count: u16,

    // Snapshot at the last quality evaluation (for rate computation)
    pub last_bytes_received: u64,
    pub last_packets_received: u64,
    pub last_packets_lost: u32,
    pub last_eval_time: u64, // ms

    // Score state
    pub error_points: u32,
    pub weight_percent: u8,
    pub ack_throttle_factor: f64,
    pub last_ack_sent_time: u64, // ms

    // Sender-side telemetry from extended keepalives
    pub rtt_us: u64,
    pub rtt_history: [u64; RTT_HISTORY_SIZE],
    pub rtt_history_idx: usize,
    pub last_keepalive: u64, // sec, 0 = never
    pub window: i32,
    pub in_flight: i32,
    pub sender_nak_count: u32,
    pub last_sender_nak_count: u32,
    pub sender_bitrate_bps: u32,

    /// Latches true on the first valid extended keepalive and stays true,
    /// so capable senders are recognised even while actively transmitting
    /// (and therefore not sending keepalives).
    pub sender_supports_extended_keepalives: bool,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self {
            bytes_received: 0,
            packets_received: 0,
            packets_lost: 0,
            nack_count: 0,
            last_bytes_received: 0,
            last_packets_received: 0,
            last_packets_lost: 0,
            last_eval_time: 0,
            error_points: 0,
            weight_percent: WEIGHT_FULL,
            ack_throttle_factor: 1.0,
            last_ack_sent_time: 0,
            rtt_us: 0,
            rtt_history: [0; RTT_HISTORY_SIZE],
            rtt_history_idx: 0,
            last_keepalive: 0,
            window: 0,
            in_flight: 0,
            sender_nak_count: 0,
            last_sender_nak_count: 0,
            sender_bitrate_bps: 0,
            sender_supports_extended_keepalives: false,
        }
    }
}

impl ConnectionStats {
    /// Whether recent, meaningful sender telemetry is available for quality
    /// evaluation. When false the evaluator falls back to receiver-only
    /// metrics (bandwidth + packet loss).
    pub fn has_valid_sender_telemetry(&self, current_time: u64) -> bool {
        if self.last_keepalive == 0 {
            return false;
        }
        if current_time.saturating_sub(self.last_keepalive) > KEEPALIVE_STALENESS_THRESHOLD {
            return false;
        }
        self.rtt_us > 0 || self.window > 0
    }
}

/// One physical uplink to a client.
#[derive(Debug)]
pub struct Connection {
    addr: SocketAddr,
    last_rcvd: u64, // sec
    /// Ring of the most recent SRT sequence numbers; flushed as an SRTLA ACK
    /// once full.
    pub(crate) recv_log: [u32; RECV_ACK_INT],
    pub(crate) recv_idx: usize,
    pub stats: ConnectionStats,
    /// 0 = not recovering.
    recovery_start: u64, // sec
    connection_start: u64, // sec
}

impl Connection {
    pub fn new(addr: SocketAddr, timestamp: u64) -> Self {
        Self {
            addr,
            last_rcvd: timestamp,
            recv_log: [0; RECV_ACK_INT],
            recv_idx: 0,
            stats: ConnectionStats::default(),
            recovery_start: 0,
            connection_start: timestamp,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    pub fn last_received(&self) -> u64 {
        self.last_rcvd
    }

    pub fn update_last_received(&mut self, ts: u64) {
        self.last_rcvd = ts;
    }

    pub fn is_timed_out(&self, current_time: u64) -> bool {
        self.last_rcvd + CONN_TIMEOUT < current_time
    }

    pub fn recovery_start(&self) -> u64 {
        self.recovery_start
    }

    pub fn set_recovery_start(&mut self, ts: u64) {
        self.recovery_start = ts;
    }

    pub fn connection_start(&self) -> u64 {
        self.connection_start
    }
}
