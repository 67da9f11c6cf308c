//! End-to-end tests driving the reactor over real localhost UDP sockets.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use tokio::net::UdpSocket;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::{Duration, Instant, timeout};

    use crate::protocol::*;
    use crate::quality::MetricsCollector;
    use crate::receiver::{SrtHandler, SrtlaHandler, run_with_socket};
    use crate::registry::ConnectionRegistry;
    use crate::utils::now_ms;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);
    const SILENCE_TIMEOUT: Duration = Duration::from_millis(300);

    struct Harness {
        receiver_addr: SocketAddr,
        server: UdpSocket,
        reactor: tokio::task::JoinHandle<()>,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.reactor.abort();
        }
    }

    async fn start_receiver() -> Harness {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let srt_addr = server.local_addr().unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = socket.local_addr().unwrap();

        let reactor = tokio::spawn(async move {
            let _ = run_with_socket(socket, srt_addr).await;
        });

        Harness {
            receiver_addr,
            server,
            reactor,
        }
    }

    async fn new_client(harness: &Harness) -> UdpSocket {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(harness.receiver_addr).await.unwrap();
        client
    }

    async fn recv_raw(sock: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; MTU];
        let n = timeout(RECV_TIMEOUT, sock.recv(&mut buf))
            .await
            .expect("recv timed out")
            .unwrap();
        buf.truncate(n);
        buf
    }

    /// Receive the next datagram, skipping bare keepalive prompts that the
    /// reactor's cleanup tick may interleave on an idle uplink.
    async fn recv(sock: &UdpSocket) -> Vec<u8> {
        loop {
            let pkt = recv_raw(sock).await;
            if pkt.len() == 2 && is_srtla_keepalive(&pkt) {
                continue;
            }
            return pkt;
        }
    }

    async fn recv_from(sock: &UdpSocket) -> (Vec<u8>, SocketAddr) {
        let mut buf = vec![0u8; MTU];
        let (n, peer) = timeout(RECV_TIMEOUT, sock.recv_from(&mut buf))
            .await
            .expect("recv timed out")
            .unwrap();
        buf.truncate(n);
        (buf, peer)
    }

    async fn assert_silent(sock: &UdpSocket) {
        let mut buf = vec![0u8; MTU];
        assert!(
            timeout(SILENCE_TIMEOUT, sock.recv(&mut buf)).await.is_err(),
            "expected no datagram"
        );
    }

    /// Like `assert_silent`, but for client uplinks: the reactor's cleanup
    /// tick may legitimately prompt an idle uplink with a keepalive, so
    /// those are ignored.
    async fn assert_no_data(sock: &UdpSocket) {
        let deadline = tokio::time::Instant::now() + SILENCE_TIMEOUT;
        loop {
            let mut buf = vec![0u8; MTU];
            match tokio::time::timeout_at(deadline, sock.recv(&mut buf)).await {
                Err(_) => return,
                Ok(Ok(n)) => assert!(
                    is_srtla_keepalive(&buf[..n]),
                    "unexpected datagram of {n} bytes"
                ),
                Ok(Err(err)) => panic!("recv failed: {err}"),
            }
        }
    }

    fn reg1_packet(client_half: &[u8; 16]) -> Vec<u8> {
        let mut pkt = vec![0u8; SRTLA_TYPE_REG1_LEN];
        pkt[0..2].copy_from_slice(&SRTLA_TYPE_REG1.to_be_bytes());
        pkt[2..].copy_from_slice(client_half);
        pkt
    }

    fn reg2_packet(id: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; SRTLA_TYPE_REG2_LEN];
        pkt[0..2].copy_from_slice(&SRTLA_TYPE_REG2.to_be_bytes());
        pkt[2..].copy_from_slice(id);
        pkt
    }

    fn data_packet(sn: u32) -> Vec<u8> {
        let mut pkt = vec![0u8; SRT_MIN_LEN];
        pkt[0..4].copy_from_slice(&sn.to_be_bytes());
        pkt
    }

    fn control_packet_16(packet_type: u16) -> Vec<u8> {
        let mut pkt = vec![0u8; SRT_MIN_LEN];
        pkt[0..2].copy_from_slice(&packet_type.to_be_bytes());
        pkt
    }

    fn nak_packet(payload: &[u8]) -> Vec<u8> {
        let mut pkt = control_packet_16(SRT_TYPE_NAK);
        pkt.extend_from_slice(payload);
        pkt
    }

    /// Run the REG1/REG2/REG3 handshake on `client`, returning the group id.
    async fn register_group(client: &UdpSocket, client_half: &[u8; 16]) -> [u8; SRTLA_ID_LEN] {
        client.send(&reg1_packet(client_half)).await.unwrap();

        let reg2 = recv(client).await;
        assert_eq!(get_packet_type(&reg2), Some(SRTLA_TYPE_REG2));
        assert_eq!(reg2.len(), SRTLA_TYPE_REG2_LEN);
        assert_eq!(&reg2[2..18], client_half.as_slice());

        let mut id = [0u8; SRTLA_ID_LEN];
        id.copy_from_slice(&reg2[2..]);

        client.send(&reg2_packet(&id)).await.unwrap();
        let reg3 = recv(client).await;
        assert_eq!(get_packet_type(&reg3), Some(SRTLA_TYPE_REG3));

        id
    }

    /// Join an existing group from a second uplink using the full id.
    async fn join_group(client: &UdpSocket, id: &[u8; SRTLA_ID_LEN]) {
        client.send(&reg2_packet(id)).await.unwrap();
        let reg3 = recv(client).await;
        assert_eq!(get_packet_type(&reg3), Some(SRTLA_TYPE_REG3));
    }

    #[tokio::test]
    async fn test_registration_and_ack_pipeline() {
        let harness = start_receiver().await;
        let client = new_client(&harness).await;

        let client_half: [u8; 16] = core::array::from_fn(|i| i as u8);
        register_group(&client, &client_half).await;

        for sn in 100..110u32 {
            client.send(&data_packet(sn)).await.unwrap();
        }

        // All ten data packets reach the SRT server in arrival order
        for sn in 100..110u32 {
            let fwd = recv(&harness.server).await;
            assert_eq!(fwd, data_packet(sn));
        }

        // The tenth packet fills the receive log and flushes one SRTLA ACK
        let ack = recv(&client).await;
        assert_eq!(ack.len(), SRTLA_ACK_LEN);
        assert_eq!(get_packet_type(&ack), Some(SRTLA_TYPE_ACK));
        for i in 0..RECV_ACK_INT {
            let off = 4 + i * 4;
            let sn = u32::from_be_bytes([ack[off], ack[off + 1], ack[off + 2], ack[off + 3]]);
            assert_eq!(sn, 100 + i as u32);
        }
    }

    #[tokio::test]
    async fn test_second_uplink_joins_and_duplicates_are_forwarded() {
        let harness = start_receiver().await;
        let uplink_a = new_client(&harness).await;
        let uplink_b = new_client(&harness).await;

        let id = register_group(&uplink_a, &[0x42; 16]).await;
        join_group(&uplink_b, &id).await;

        // Identical SRT data on both uplinks: the aggregator does not
        // suppress duplicate data packets
        uplink_a.send(&data_packet(500)).await.unwrap();
        uplink_b.send(&data_packet(500)).await.unwrap();
        assert_eq!(recv(&harness.server).await, data_packet(500));
        assert_eq!(recv(&harness.server).await, data_packet(500));
    }

    #[tokio::test]
    async fn test_duplicate_nak_suppressed_across_uplinks() {
        let harness = start_receiver().await;
        let uplink_a = new_client(&harness).await;
        let uplink_b = new_client(&harness).await;

        let id = register_group(&uplink_a, &[0x43; 16]).await;
        join_group(&uplink_b, &id).await;

        let nak = nak_packet(&[0xaa; 32]);
        uplink_a.send(&nak).await.unwrap();
        uplink_b.send(&nak).await.unwrap();

        // Only the first copy reaches the SRT server
        assert_eq!(recv(&harness.server).await, nak);
        assert_silent(&harness.server).await;
    }

    #[tokio::test]
    async fn test_reg2_for_unknown_id_gets_ngp_after_wait() {
        let harness = start_receiver().await;
        let client = new_client(&harness).await;

        let started = Instant::now();
        client.send(&reg2_packet(&[0x77; SRTLA_ID_LEN])).await.unwrap();
        let reply = recv(&client).await;
        let elapsed = started.elapsed();

        assert_eq!(get_packet_type(&reply), Some(SRTLA_TYPE_REG_NGP));
        assert!(
            elapsed >= Duration::from_millis(180),
            "NGP arrived after {elapsed:?}, expected the full wait"
        );
    }

    #[tokio::test]
    async fn test_reg1_from_registered_address_rejected() {
        let harness = start_receiver().await;
        let client = new_client(&harness).await;

        register_group(&client, &[0x01; 16]).await;

        client.send(&reg1_packet(&[0x02; 16])).await.unwrap();
        let reply = recv(&client).await;
        assert_eq!(get_packet_type(&reply), Some(SRTLA_TYPE_REG_ERR));
    }

    #[tokio::test]
    async fn test_reg2_for_foreign_group_rejected() {
        let harness = start_receiver().await;
        let uplink_a = new_client(&harness).await;
        let uplink_c = new_client(&harness).await;

        register_group(&uplink_a, &[0x0a; 16]).await;
        let foreign_id = register_group(&uplink_c, &[0x0c; 16]).await;

        // A is owned by its own group; joining C's group must fail
        uplink_a.send(&reg2_packet(&foreign_id)).await.unwrap();
        let reply = recv(&uplink_a).await;
        assert_eq!(get_packet_type(&reply), Some(SRTLA_TYPE_REG_ERR));
    }

    #[tokio::test]
    async fn test_keepalive_echoed_verbatim() {
        let harness = start_receiver().await;
        let client = new_client(&harness).await;
        register_group(&client, &[0x05; 16]).await;

        let keepalive = create_keepalive_packet_ext(SenderTelemetry {
            conn_id: 3,
            window: 20_000,
            in_flight: 12,
            rtt_us: 45_000,
            nak_count: 2,
            bitrate_bytes_per_sec: 1_000_000,
        });
        client.send(&keepalive).await.unwrap();
        assert_eq!(recv(&client).await, keepalive.to_vec());

        // Plain 2-byte keepalives are echoed the same way
        let plain = create_control_packet(SRTLA_TYPE_KEEPALIVE);
        client.send(&plain).await.unwrap();
        assert_eq!(recv_raw(&client).await, plain.to_vec());
    }

    #[tokio::test]
    async fn test_srt_ack_fans_out_and_replies_stay_address_sticky() {
        let harness = start_receiver().await;
        let uplink_a = new_client(&harness).await;
        let uplink_b = new_client(&harness).await;

        let id = register_group(&uplink_a, &[0x44; 16]).await;
        join_group(&uplink_b, &id).await;

        // Data on A creates the group's SRT socket and pins last_address to A
        uplink_a.send(&data_packet(1)).await.unwrap();
        let (fwd, group_peer) = recv_from(&harness.server).await;
        assert_eq!(fwd, data_packet(1));

        // A server ACK is fanned out to every uplink
        let ack = control_packet_16(SRT_TYPE_ACK);
        harness.server.send_to(&ack, group_peer).await.unwrap();
        assert_eq!(recv(&uplink_a).await, ack);
        assert_eq!(recv(&uplink_b).await, ack);

        // Any other server packet follows the most recent data uplink only
        let other = control_packet_16(0x8005);
        harness.server.send_to(&other, group_peer).await.unwrap();
        assert_eq!(recv(&uplink_a).await, other);
        assert_no_data(&uplink_b).await;
    }

    #[tokio::test]
    async fn test_control_packets_forwarded_but_not_logged() {
        let harness = start_receiver().await;
        let client = new_client(&harness).await;
        register_group(&client, &[0x06; 16]).await;

        // Ten packets with the control bit set: forwarded, but they never
        // fill the receive log, so no SRTLA ACK is emitted
        for _ in 0..RECV_ACK_INT {
            client.send(&control_packet_16(0x8005)).await.unwrap();
            recv(&harness.server).await;
        }
        assert_no_data(&client).await;
    }

    /// Handler-level fixture: the reactor is not running, so tests drive
    /// `process_packet` directly with fabricated timestamps.
    struct HandlerFixture {
        srtla: SrtlaHandler,
        srt: SrtHandler,
        metrics: MetricsCollector,
        registry: ConnectionRegistry,
        client: UdpSocket,
        client_addr: SocketAddr,
        _server: UdpSocket,
    }

    async fn handler_fixture() -> HandlerFixture {
        let srtla_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (event_tx, _event_rx) = unbounded_channel();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(srtla_socket.local_addr().unwrap()).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        HandlerFixture {
            srtla: SrtlaHandler::new(srtla_socket.clone()),
            srt: SrtHandler::new(srtla_socket, server.local_addr().unwrap(), event_tx),
            metrics: MetricsCollector,
            registry: ConnectionRegistry::new(),
            client,
            client_addr,
            _server: server,
        }
    }

    impl HandlerFixture {
        async fn process(&mut self, buf: &[u8], ts: u64) {
            self.srtla
                .process_packet(&mut self.registry, &self.srt, &self.metrics, buf, self.client_addr, ts)
                .await;
        }

        async fn register(&mut self, ts: u64) {
            self.process(&reg1_packet(&[0x50; 16]), ts).await;
            let reg2 = recv(&self.client).await;
            let echo = reg2_packet(&reg2[2..]);
            self.process(&echo, ts).await;
            let reg3 = recv(&self.client).await;
            assert_eq!(get_packet_type(&reg3), Some(SRTLA_TYPE_REG3));
        }
    }

    #[tokio::test]
    async fn test_ack_throttling_suppresses_but_resets_log() {
        let mut fx = handler_fixture().await;
        fx.register(10).await;

        // Make sure the monotonic ms clock is non-zero before stamping
        tokio::time::sleep(Duration::from_millis(10)).await;
        {
            let conn = &mut fx.registry.groups_mut()[0].connections_mut()[0];
            conn.stats.ack_throttle_factor = 0.2;
            conn.stats.last_ack_sent_time = now_ms();
        }

        // A full receive log within the stretched ACK interval: suppressed
        for sn in 0..RECV_ACK_INT as u32 {
            fx.process(&data_packet(sn), 10).await;
        }
        assert_silent(&fx.client).await;

        // The log index reset even though the ACK was dropped
        let conn = &fx.registry.groups()[0].connections()[0];
        assert_eq!(conn.recv_idx, 0);

        // Back at full rate the next flush goes out
        {
            let conn = &mut fx.registry.groups_mut()[0].connections_mut()[0];
            conn.stats.ack_throttle_factor = 1.0;
        }
        for sn in 10..10 + RECV_ACK_INT as u32 {
            fx.process(&data_packet(sn), 10).await;
        }
        let ack = recv(&fx.client).await;
        assert_eq!(get_packet_type(&ack), Some(SRTLA_TYPE_ACK));
    }

    #[tokio::test]
    async fn test_resumed_connection_enters_recovery() {
        let mut fx = handler_fixture().await;
        fx.register(10).await;

        // Silent past CONN_TIMEOUT, then a packet arrives
        fx.process(&create_control_packet(SRTLA_TYPE_KEEPALIVE), 20).await;

        let conn = &fx.registry.groups()[0].connections()[0];
        assert_eq!(conn.recovery_start(), 20);
        assert_eq!(conn.last_received(), 20);
    }

    #[tokio::test]
    async fn test_keepalive_telemetry_updates_connection() {
        let mut fx = handler_fixture().await;
        fx.register(10).await;

        let keepalive = create_keepalive_packet_ext(SenderTelemetry {
            conn_id: 9,
            window: 15_000,
            in_flight: 140,
            rtt_us: 250_000,
            nak_count: 7,
            bitrate_bytes_per_sec: 750_000,
        });
        fx.process(&keepalive, 11).await;

        let stats = &fx.registry.groups()[0].connections()[0].stats;
        assert_eq!(stats.rtt_us, 250_000);
        assert_eq!(stats.window, 15_000);
        assert_eq!(stats.in_flight, 140);
        assert_eq!(stats.sender_nak_count, 7);
        assert_eq!(stats.sender_bitrate_bps, 750_000);
        assert!(stats.sender_supports_extended_keepalives);
        assert_eq!(stats.rtt_history[0], 250_000);
    }

    #[tokio::test]
    async fn test_max_groups_boundary() {
        let mut fx = handler_fixture().await;

        // Fill the registry from fabricated source addresses
        for i in 0..MAX_GROUPS {
            let src: SocketAddr = format!("127.0.0.1:{}", 20_000 + i).parse().unwrap();
            let half: [u8; 16] = core::array::from_fn(|j| (i >> (8 * (j % 2))) as u8);
            fx.srtla
                .process_packet(
                    &mut fx.registry,
                    &fx.srt,
                    &fx.metrics,
                    &reg1_packet(&half),
                    src,
                    10,
                )
                .await;
        }
        assert_eq!(fx.registry.group_count(), MAX_GROUPS);

        // One more client is turned away
        fx.process(&reg1_packet(&[0x60; 16]), 10).await;
        let reply = recv(&fx.client).await;
        assert_eq!(get_packet_type(&reply), Some(SRTLA_TYPE_REG_ERR));

        // After the empty groups expire, registration works again
        fx.registry.cleanup_inactive(15, |_| {});
        assert_eq!(fx.registry.group_count(), 0);

        fx.process(&reg1_packet(&[0x60; 16]), 15).await;
        let reply = recv(&fx.client).await;
        assert_eq!(get_packet_type(&reply), Some(SRTLA_TYPE_REG2));
    }
}
