use super::constants::*;
use super::types::{SenderTelemetry, get_packet_type};

/// Extract sender telemetry from an extended keepalive packet.
///
/// Returns `None` if:
/// - the packet is shorter than the extended layout (42 bytes)
/// - it is not a KEEPALIVE packet
/// - the magic at bytes 10-11 doesn't match (plain keepalive)
/// - the version at bytes 12-13 doesn't match
pub fn parse_keepalive_telemetry(buf: &[u8]) -> Option<SenderTelemetry> {
    if buf.len() < SRTLA_KEEPALIVE_EXT_LEN {
        return None;
    }
    if get_packet_type(buf)? != SRTLA_TYPE_KEEPALIVE {
        return None;
    }

    let magic = u16::from_be_bytes([buf[10], buf[11]]);
    if magic != SRTLA_KEEPALIVE_MAGIC {
        return None;
    }

    let version = u16::from_be_bytes([buf[12], buf[13]]);
    if version != SRTLA_KEEPALIVE_EXT_VERSION {
        return None;
    }

    let conn_id = u32::from_be_bytes([buf[14], buf[15], buf[16], buf[17]]);
    let window = i32::from_be_bytes([buf[18], buf[19], buf[20], buf[21]]);
    let in_flight = i32::from_be_bytes([buf[22], buf[23], buf[24], buf[25]]);
    let rtt_us = u64::from_be_bytes([
        buf[26], buf[27], buf[28], buf[29], buf[30], buf[31], buf[32], buf[33],
    ]);
    let nak_count = u32::from_be_bytes([buf[34], buf[35], buf[36], buf[37]]);
    let bitrate_bytes_per_sec = u32::from_be_bytes([buf[38], buf[39], buf[40], buf[41]]);

    Some(SenderTelemetry {
        conn_id,
        window,
        in_flight,
        rtt_us,
        nak_count,
        bitrate_bytes_per_sec,
    })
}
