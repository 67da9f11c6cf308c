// SRTLA protocol type constants
pub const SRTLA_TYPE_KEEPALIVE: u16 = 0x9000;
pub const SRTLA_TYPE_ACK: u16 = 0x9100;
pub const SRTLA_TYPE_REG1: u16 = 0x9200;
pub const SRTLA_TYPE_REG2: u16 = 0x9201;
pub const SRTLA_TYPE_REG3: u16 = 0x9202;
pub const SRTLA_TYPE_REG_ERR: u16 = 0x9210;
pub const SRTLA_TYPE_REG_NGP: u16 = 0x9211;

// SRT protocol constants
pub const SRT_TYPE_HANDSHAKE: u16 = 0x8000;
pub const SRT_TYPE_ACK: u16 = 0x8002;
pub const SRT_TYPE_NAK: u16 = 0x8003;

// Packet size constants
pub const SRTLA_ID_LEN: usize = 32;
pub const SRTLA_TYPE_REG1_LEN: usize = 2 + SRTLA_ID_LEN / 2;
pub const SRTLA_TYPE_REG2_LEN: usize = 2 + SRTLA_ID_LEN;
pub const SRTLA_TYPE_REG3_LEN: usize = 2;

pub const MTU: usize = 1500;
pub const SRT_MIN_LEN: usize = 16;

/// SRT data packets acknowledged per SRTLA ACK.
pub const RECV_ACK_INT: usize = 10;
pub const SRTLA_ACK_LEN: usize = 4 + 4 * RECV_ACK_INT;

// Registry limits
pub const MAX_CONNS_PER_GROUP: usize = 16;
pub const MAX_GROUPS: usize = 200;

// Timeout constants (seconds, monotonic)
pub const CLEANUP_PERIOD: u64 = 3;
pub const GROUP_TIMEOUT: u64 = 4;
pub const CONN_TIMEOUT: u64 = 4;
pub const KEEPALIVE_PERIOD: u64 = 1;
pub const RECOVERY_CHANCE_PERIOD: u64 = 5;

/// Upper bound on the wait for a REG1-created group to become visible while
/// a REG2 for the same id is being handled on another uplink.
pub const REG2_WAIT_MS: u64 = 200;

// Quality evaluation constants
pub const CONN_QUALITY_EVAL_PERIOD: u64 = 5; // sec
pub const CONNECTION_GRACE_PERIOD: u64 = 10; // sec
pub const ACK_THROTTLE_INTERVAL: u64 = 100; // ms
pub const MIN_ACK_RATE: f64 = 0.2;
pub const MIN_ACCEPTABLE_TOTAL_BANDWIDTH_KBPS: f64 = 1000.0;
pub const GOOD_CONNECTION_THRESHOLD: f64 = 0.5;

// Weight buckets
pub const WEIGHT_FULL: u8 = 100;
pub const WEIGHT_EXCELLENT: u8 = 85;
pub const WEIGHT_DEGRADED: u8 = 70;
pub const WEIGHT_FAIR: u8 = 55;
pub const WEIGHT_POOR: u8 = 40;
pub const WEIGHT_CRITICAL: u8 = 10;

// RTT-based quality assessment thresholds (microseconds)
pub const RTT_THRESHOLD_CRITICAL_US: u64 = 500_000;
pub const RTT_THRESHOLD_HIGH_US: u64 = 200_000;
pub const RTT_THRESHOLD_MODERATE_US: u64 = 100_000;
pub const RTT_VARIANCE_THRESHOLD_US: f64 = 50_000.0;
pub const RTT_HISTORY_SIZE: usize = 5;
pub const KEEPALIVE_STALENESS_THRESHOLD: u64 = 2; // sec

// NAK rate thresholds (sender telemetry)
pub const NAK_RATE_CRITICAL: f64 = 0.20;
pub const NAK_RATE_HIGH: f64 = 0.10;
pub const NAK_RATE_MODERATE: f64 = 0.05;
pub const NAK_RATE_LOW: f64 = 0.01;

pub const WINDOW_UTILIZATION_CONGESTED: f64 = 0.95;
pub const BITRATE_DISCREPANCY_THRESHOLD: f64 = 0.20;

// NAK de-duplication
pub const NAK_HASH_PREFIX: usize = 128;
pub const NAK_SUPPRESS_MS: u64 = 100;
pub const NAK_MAX_REPEATS: u32 = 1;

// Socket buffer sizes (1 MB)
pub const RECV_BUF_SIZE: usize = 1024 * 1024;
pub const SEND_BUF_SIZE: usize = 1024 * 1024;

pub const SRT_SOCKET_INFO_PREFIX: &str = "/tmp/srtla-group-";

// Extended KEEPALIVE with sender telemetry
pub const SRTLA_KEEPALIVE_MAGIC: u16 = 0xc01f;
pub const SRTLA_KEEPALIVE_EXT_VERSION: u16 = 0x0001;
pub const SRTLA_KEEPALIVE_EXT_LEN: usize = 42;
