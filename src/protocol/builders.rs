use super::constants::*;
use super::types::SenderTelemetry;

/// Build a REG2 reply: the full 32-byte group id after the type header.
pub fn create_reg2_packet(id: &[u8; SRTLA_ID_LEN]) -> [u8; SRTLA_TYPE_REG2_LEN] {
    let mut pkt = [0u8; SRTLA_TYPE_REG2_LEN];
    pkt[0..2].copy_from_slice(&SRTLA_TYPE_REG2.to_be_bytes());
    pkt[2..].copy_from_slice(id);
    pkt
}

/// Build a bare control packet (REG3, REG_ERR, REG_NGP, keepalive).
pub fn create_control_packet(packet_type: u16) -> [u8; 2] {
    packet_type.to_be_bytes()
}

/// Build an SRTLA ACK from a full receive log.
///
/// The header is 4 bytes (type + 2 bytes of padding) so the ack list stays
/// 32-bit aligned, matching what senders parse.
pub fn create_ack_packet(acks: &[u32; RECV_ACK_INT]) -> [u8; SRTLA_ACK_LEN] {
    let mut pkt = [0u8; SRTLA_ACK_LEN];
    pkt[0..2].copy_from_slice(&SRTLA_TYPE_ACK.to_be_bytes());
    for (i, &ack) in acks.iter().enumerate() {
        let off = 4 + i * 4;
        pkt[off..off + 4].copy_from_slice(&ack.to_be_bytes());
    }
    pkt
}

/// Build an extended keepalive carrying sender telemetry.
///
/// The receiver never originates these (senders do); this builder exists for
/// tests and for interop tooling. Bytes 2-9 are reserved and left zeroed.
pub fn create_keepalive_packet_ext(info: SenderTelemetry) -> [u8; SRTLA_KEEPALIVE_EXT_LEN] {
    let mut pkt = [0u8; SRTLA_KEEPALIVE_EXT_LEN];
    pkt[0..2].copy_from_slice(&SRTLA_TYPE_KEEPALIVE.to_be_bytes());
    pkt[10..12].copy_from_slice(&SRTLA_KEEPALIVE_MAGIC.to_be_bytes());
    pkt[12..14].copy_from_slice(&SRTLA_KEEPALIVE_EXT_VERSION.to_be_bytes());
    pkt[14..18].copy_from_slice(&info.conn_id.to_be_bytes());
    pkt[18..22].copy_from_slice(&info.window.to_be_bytes());
    pkt[22..26].copy_from_slice(&info.in_flight.to_be_bytes());
    pkt[26..34].copy_from_slice(&info.rtt_us.to_be_bytes());
    pkt[34..38].copy_from_slice(&info.nak_count.to_be_bytes());
    pkt[38..42].copy_from_slice(&info.bitrate_bytes_per_sec.to_be_bytes());
    pkt
}
