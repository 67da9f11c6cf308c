#[cfg(test)]
mod tests {
    use crate::nak_dedup::{NakCache, hash_nak_payload};
    use crate::protocol::{NAK_HASH_PREFIX, SRT_MIN_LEN, SRT_TYPE_NAK};

    fn nak_packet(payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; SRT_MIN_LEN + payload.len()];
        pkt[0..2].copy_from_slice(&SRT_TYPE_NAK.to_be_bytes());
        pkt[SRT_MIN_LEN..].copy_from_slice(payload);
        pkt
    }

    #[test]
    fn test_first_sighting_accepted() {
        let mut cache = NakCache::new();
        let hash = hash_nak_payload(&nak_packet(&[1, 2, 3, 4]), NAK_HASH_PREFIX);
        assert!(cache.should_accept(hash, 1_000));
    }

    #[test]
    fn test_replay_within_window_rejected() {
        let mut cache = NakCache::new();
        let hash = hash_nak_payload(&nak_packet(&[1, 2, 3, 4]), NAK_HASH_PREFIX);
        assert!(cache.should_accept(hash, 1_000));
        assert!(!cache.should_accept(hash, 1_050));
        assert!(!cache.should_accept(hash, 1_099));
    }

    #[test]
    fn test_repeat_budget() {
        let mut cache = NakCache::new();
        let hash = hash_nak_payload(&nak_packet(&[9, 9, 9]), NAK_HASH_PREFIX);

        assert!(cache.should_accept(hash, 1_000));
        // Past the suppression window: one repeat allowed
        assert!(cache.should_accept(hash, 1_200));
        // Budget spent: rejected forever after, however late
        assert!(!cache.should_accept(hash, 2_000));
        assert!(!cache.should_accept(hash, 60_000));
    }

    #[test]
    fn test_clock_reversal_rejected() {
        let mut cache = NakCache::new();
        let hash = hash_nak_payload(&nak_packet(&[5]), NAK_HASH_PREFIX);
        assert!(cache.should_accept(hash, 1_000));
        assert!(!cache.should_accept(hash, 900));
    }

    #[test]
    fn test_distinct_payloads_do_not_collide() {
        let mut cache = NakCache::new();
        let h1 = hash_nak_payload(&nak_packet(&[1, 2, 3]), NAK_HASH_PREFIX);
        let h2 = hash_nak_payload(&nak_packet(&[1, 2, 4]), NAK_HASH_PREFIX);
        assert_ne!(h1, h2);
        assert!(cache.should_accept(h1, 1_000));
        assert!(cache.should_accept(h2, 1_000));
    }

    #[test]
    fn test_hash_truncates_to_prefix() {
        // Two payloads identical in the first 128 bytes hash the same
        let mut a = vec![0xabu8; 200];
        let mut b = vec![0xabu8; 200];
        a[150] = 0x01;
        b[150] = 0x02;
        assert_eq!(
            hash_nak_payload(&nak_packet(&a), NAK_HASH_PREFIX),
            hash_nak_payload(&nak_packet(&b), NAK_HASH_PREFIX)
        );

        // A difference inside the prefix changes the hash
        let mut c = vec![0xabu8; 200];
        c[10] = 0x01;
        assert_ne!(
            hash_nak_payload(&nak_packet(&a), NAK_HASH_PREFIX),
            hash_nak_payload(&nak_packet(&c), NAK_HASH_PREFIX)
        );
    }

    #[test]
    fn test_header_only_packet_hashes_to_zero() {
        assert_eq!(hash_nak_payload(&nak_packet(&[]), NAK_HASH_PREFIX), 0);
        assert_eq!(hash_nak_payload(&[], NAK_HASH_PREFIX), 0);
    }
}
