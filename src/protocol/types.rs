use super::constants::*;

/// Sender-side telemetry carried in an extended keepalive.
///
/// `rtt_us` is microseconds on the wire (64-bit big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderTelemetry {
    pub conn_id: u32,
    pub window: i32,
    pub in_flight: i32,
    pub rtt_us: u64,
    pub nak_count: u32,
    pub bitrate_bytes_per_sec: u32,
}

#[inline]
pub fn get_packet_type(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Extract the SRT sequence number from a data packet.
///
/// Returns `None` when the control bit (MSB of the first word) is set, i.e.
/// the datagram is not an SRT data packet.
#[inline]
pub fn get_srt_sequence_number(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    let sn = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if (sn & 0x8000_0000) == 0 { Some(sn) } else { None }
}

pub fn is_srtla_reg1(buf: &[u8]) -> bool {
    buf.len() == SRTLA_TYPE_REG1_LEN && get_packet_type(buf) == Some(SRTLA_TYPE_REG1)
}

pub fn is_srtla_reg2(buf: &[u8]) -> bool {
    buf.len() == SRTLA_TYPE_REG2_LEN && get_packet_type(buf) == Some(SRTLA_TYPE_REG2)
}

pub fn is_srtla_keepalive(buf: &[u8]) -> bool {
    get_packet_type(buf) == Some(SRTLA_TYPE_KEEPALIVE)
}

pub fn is_srt_ack(buf: &[u8]) -> bool {
    get_packet_type(buf) == Some(SRT_TYPE_ACK)
}

pub fn is_srt_nak(buf: &[u8]) -> bool {
    buf.len() >= SRT_MIN_LEN && get_packet_type(buf) == Some(SRT_TYPE_NAK)
}
