#[cfg(test)]
mod tests {
    use crate::protocol::*;

    #[test]
    fn test_get_packet_type() {
        let buf = [0x90, 0x00, 0x01, 0x02];
        assert_eq!(get_packet_type(&buf), Some(SRTLA_TYPE_KEEPALIVE));

        let buf = [0x80, 0x02, 0x01, 0x02];
        assert_eq!(get_packet_type(&buf), Some(SRT_TYPE_ACK));

        assert_eq!(get_packet_type(&[]), None);
        assert_eq!(get_packet_type(&[0x90]), None);
    }

    #[test]
    fn test_get_srt_sequence_number() {
        // Control bit clear: a data packet
        let buf = [0x00, 0x00, 0x10, 0x00];
        assert_eq!(get_srt_sequence_number(&buf), Some(0x1000));

        // Control bit set: not a data packet
        let buf = [0x80, 0x00, 0x10, 0x00];
        assert_eq!(get_srt_sequence_number(&buf), None);

        let buf = [0x00, 0x00, 0x00, 0x00];
        assert_eq!(get_srt_sequence_number(&buf), Some(0));

        assert_eq!(get_srt_sequence_number(&[0x00, 0x00]), None);
        assert_eq!(get_srt_sequence_number(&[]), None);
    }

    #[test]
    fn test_reg_packet_classifiers() {
        let mut reg1 = vec![0u8; SRTLA_TYPE_REG1_LEN];
        reg1[0..2].copy_from_slice(&SRTLA_TYPE_REG1.to_be_bytes());
        assert!(is_srtla_reg1(&reg1));
        // Wrong length is rejected even with the right type
        assert!(!is_srtla_reg1(&reg1[..SRTLA_TYPE_REG1_LEN - 1]));

        let mut reg2 = vec![0u8; SRTLA_TYPE_REG2_LEN];
        reg2[0..2].copy_from_slice(&SRTLA_TYPE_REG2.to_be_bytes());
        assert!(is_srtla_reg2(&reg2));
        assert!(!is_srtla_reg2(&reg1));
    }

    #[test]
    fn test_create_reg2_packet() {
        let id = [0x24; SRTLA_ID_LEN];
        let pkt = create_reg2_packet(&id);

        assert_eq!(pkt.len(), SRTLA_TYPE_REG2_LEN);
        assert_eq!(get_packet_type(&pkt), Some(SRTLA_TYPE_REG2));
        assert!(pkt[2..].iter().all(|&b| b == 0x24));
        assert!(is_srtla_reg2(&pkt));
    }

    #[test]
    fn test_create_control_packet() {
        let pkt = create_control_packet(SRTLA_TYPE_REG3);
        assert_eq!(pkt.len(), SRTLA_TYPE_REG3_LEN);
        assert_eq!(get_packet_type(&pkt), Some(SRTLA_TYPE_REG3));

        let pkt = create_control_packet(SRTLA_TYPE_KEEPALIVE);
        assert!(is_srtla_keepalive(&pkt));
    }

    #[test]
    fn test_create_ack_packet_layout() {
        let mut acks = [0u32; RECV_ACK_INT];
        for (i, slot) in acks.iter_mut().enumerate() {
            *slot = 100 + i as u32;
        }
        let pkt = create_ack_packet(&acks);

        assert_eq!(pkt.len(), SRTLA_ACK_LEN);
        assert_eq!(get_packet_type(&pkt), Some(SRTLA_TYPE_ACK));
        // Two padding bytes keep the ack list 32-bit aligned
        assert_eq!(&pkt[2..4], &[0, 0]);

        for i in 0..RECV_ACK_INT {
            let off = 4 + i * 4;
            let ack = u32::from_be_bytes([pkt[off], pkt[off + 1], pkt[off + 2], pkt[off + 3]]);
            assert_eq!(ack, 100 + i as u32);
        }
    }

    #[test]
    fn test_nak_classifier_requires_min_length() {
        let mut nak = vec![0u8; SRT_MIN_LEN];
        nak[0..2].copy_from_slice(&SRT_TYPE_NAK.to_be_bytes());
        assert!(is_srt_nak(&nak));
        assert!(!is_srt_nak(&nak[..SRT_MIN_LEN - 1]));
    }

    #[test]
    fn test_extended_keepalive_truncated() {
        let info = SenderTelemetry {
            conn_id: 7,
            window: 20_000,
            in_flight: 3,
            rtt_us: 80_000,
            nak_count: 0,
            bitrate_bytes_per_sec: 500_000,
        };
        let pkt = create_keepalive_packet_ext(info);

        // One byte short of the extended layout: parsed as a plain keepalive
        assert!(parse_keepalive_telemetry(&pkt[..SRTLA_KEEPALIVE_EXT_LEN - 1]).is_none());
        assert!(is_srtla_keepalive(&pkt[..SRTLA_KEEPALIVE_EXT_LEN - 1]));
    }

    #[test]
    fn test_extended_keepalive_rtt_is_64_bit() {
        let info = SenderTelemetry {
            conn_id: 1,
            window: 1,
            in_flight: 1,
            rtt_us: u64::from(u32::MAX) + 12_345,
            nak_count: 1,
            bitrate_bytes_per_sec: 1,
        };
        let parsed = parse_keepalive_telemetry(&create_keepalive_packet_ext(info)).unwrap();
        assert_eq!(parsed.rtt_us, u64::from(u32::MAX) + 12_345);
    }
}
