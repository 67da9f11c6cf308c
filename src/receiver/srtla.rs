//! SRTLA ingress: registration, demultiplexing, keepalives, and the ACK
//! pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, error, info, trace};

use super::srt::SrtHandler;
use crate::nak_dedup::hash_nak_payload;
use crate::protocol::*;
use crate::quality::{MetricsCollector, QualityEvaluator};
use crate::registry::{Connection, ConnectionGroup, ConnectionRegistry};
use crate::utils::{now_ms, now_secs};

pub struct SrtlaHandler {
    socket: Arc<UdpSocket>,
}

impl SrtlaHandler {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    /// Demultiplex one datagram from the shared SRTLA socket.
    pub async fn process_packet(
        &self,
        registry: &mut ConnectionRegistry,
        srt: &SrtHandler,
        metrics: &MetricsCollector,
        buf: &[u8],
        src: SocketAddr,
        current_time: u64,
    ) {
        if is_srtla_reg1(buf) {
            self.register_group(registry, buf, src, current_time).await;
            return;
        }

        if is_srtla_reg2(buf) {
            self.register_connection(registry, buf, src, current_time)
                .await;
            return;
        }

        // Everything else requires a registered connection.
        let Some((gidx, Some(cidx))) = registry.find_by_address(&src) else {
            return;
        };

        {
            let group = &mut registry.groups_mut()[gidx];
            let tag = group.tag();
            let conn = &mut group.connections_mut()[cidx];

            let was_timed_out = conn.is_timed_out(current_time);
            conn.update_last_received(current_time);

            if conn.recovery_start() == 0 && was_timed_out {
                conn.set_recovery_start(current_time);
                info!("[{src}] [group {tag}] connection is recovering");
            }
        }

        if is_srtla_keepalive(buf) {
            let group = &mut registry.groups_mut()[gidx];
            self.handle_keepalive(group, cidx, buf, src).await;
            return;
        }

        if buf.len() < SRT_MIN_LEN {
            return;
        }

        let forward_failed = {
            let group = &mut registry.groups_mut()[gidx];
            let tag = group.tag();
            group.set_last_address(src);
            metrics.on_packet_received(&mut group.connections_mut()[cidx].stats, buf.len());

            if is_srt_nak(buf) {
                let hash = hash_nak_payload(buf, NAK_HASH_PREFIX);
                if !group.nak_cache.should_accept(hash, now_ms()) {
                    info!("[{src}] [group {tag}] duplicate NAK packet suppressed");
                    return;
                }

                metrics.on_nak_detected(&mut group.connections_mut()[cidx].stats, 1);
                info!(
                    "[{src}] [group {tag}] received NAK packet, total loss: {}",
                    group.connections()[cidx].stats.packets_lost
                );

                // A NAK burst triggers an early re-score; the evaluator's own
                // period guard prevents excessive runs.
                if group.connections()[cidx].stats.nack_count > 5
                    && group.last_quality_eval + 1 < current_time
                {
                    QualityEvaluator.evaluate_group(group, current_time);
                }
            }

            if let Some(sn) = get_srt_sequence_number(buf) {
                self.register_packet(group, cidx, sn).await;
            }

            srt.forward_to_srt_server(group, buf).await.is_err()
        };

        if forward_failed {
            let tag = registry.groups()[gidx].tag();
            error!("[group {tag}] failed to forward SRTLA packet, terminating the group");
            registry.remove_group_at(gidx);
        }
    }

    /// Prompt an idle connection with a bare keepalive.
    pub async fn send_keepalive(&self, conn_addr: SocketAddr) {
        let pkt = create_control_packet(SRTLA_TYPE_KEEPALIVE);
        match self.socket.send_to(&pkt, conn_addr).await {
            Ok(n) if n == pkt.len() => debug!("[{conn_addr}] sent keepalive packet"),
            _ => error!("[{conn_addr}] failed to send keepalive packet"),
        }
    }

    /// REG1: create a group, answer with REG2 carrying the full id.
    async fn register_group(
        &self,
        registry: &mut ConnectionRegistry,
        buf: &[u8],
        src: SocketAddr,
        current_time: u64,
    ) {
        if registry.group_count() >= MAX_GROUPS {
            self.send_control(SRTLA_TYPE_REG_ERR, src).await;
            error!("[{src}] group registration failed: max groups reached");
            return;
        }

        if registry.find_by_address(&src).is_some() {
            self.send_control(SRTLA_TYPE_REG_ERR, src).await;
            error!("[{src}] group registration failed: remote address already registered");
            return;
        }

        let mut group = ConnectionGroup::new(&buf[2..2 + SRTLA_ID_LEN / 2], current_time);
        group.set_last_address(src);

        let pkt = create_reg2_packet(group.id());
        match self.socket.send_to(&pkt, src).await {
            Ok(n) if n == pkt.len() => {}
            _ => {
                error!("[{src}] group registration failed: send error");
                return;
            }
        }

        info!("[{src}] [group {}] group registered", group.tag());
        registry.add_group(group);
    }

    /// REG2: attach a connection to an existing group, confirm with REG3.
    ///
    /// REG1 and REG2 can race in from different uplinks, so an unknown id is
    /// polled for up to `REG2_WAIT_MS` before giving up with REG_NGP.
    async fn register_connection(
        &self,
        registry: &mut ConnectionRegistry,
        buf: &[u8],
        src: SocketAddr,
        current_time: u64,
    ) {
        let id = &buf[2..2 + SRTLA_ID_LEN];

        let deadline = Instant::now() + Duration::from_millis(REG2_WAIT_MS);
        let mut found = registry.position_by_id(id);
        while found.is_none() && Instant::now() < deadline {
            sleep(Duration::from_millis(5)).await;
            found = registry.position_by_id(id);
        }

        let Some(gidx) = found else {
            self.send_control(SRTLA_TYPE_REG_NGP, src).await;
            error!("[{src}] connection registration failed: no group found");
            return;
        };

        if let Some((owner_gidx, _)) = registry.find_by_address(&src)
            && owner_gidx != gidx
        {
            self.send_control(SRTLA_TYPE_REG_ERR, src).await;
            error!("[{src}] connection registration failed: provided group id mismatch");
            return;
        }

        let group = &mut registry.groups_mut()[gidx];
        let tag = group.tag();
        let already_registered = group.position_by_address(&src).is_some();

        if !already_registered && group.connections().len() >= MAX_CONNS_PER_GROUP {
            self.send_control(SRTLA_TYPE_REG_ERR, src).await;
            error!("[{src}] [group {tag}] connection registration failed: max group conns reached");
            return;
        }

        let pkt = create_control_packet(SRTLA_TYPE_REG3);
        match self.socket.send_to(&pkt, src).await {
            Ok(n) if n == pkt.len() => {}
            _ => {
                error!("[{src}] [group {tag}] connection registration failed: socket send error");
                return;
            }
        }

        if !already_registered {
            group.add_connection(Connection::new(src, current_time));
        }
        group.write_socket_info_file();
        group.set_last_address(src);

        info!("[{src}] [group {tag}] connection registered");
    }

    /// Log an SRT data packet's sequence number; once the receive log fills,
    /// flush it as one SRTLA ACK unless throttling holds it back.
    ///
    /// A suppressed ACK is dropped, not queued: the log index resets either
    /// way and those sequence numbers are never acknowledged.
    async fn register_packet(&self, group: &mut ConnectionGroup, cidx: usize, sn: u32) {
        let tag = group.tag();
        let conn = &mut group.connections_mut()[cidx];

        conn.recv_log[conn.recv_idx] = sn;
        conn.recv_idx += 1;
        if conn.recv_idx < RECV_ACK_INT {
            return;
        }
        conn.recv_idx = 0;

        let current_ms = now_ms();
        let factor = conn.stats.ack_throttle_factor;
        if factor > 0.0 && factor < 1.0 {
            let min_interval = (ACK_THROTTLE_INTERVAL as f64 / factor) as u64;
            if conn.stats.last_ack_sent_time > 0
                && current_ms < conn.stats.last_ack_sent_time + min_interval
            {
                trace!(
                    "[{}] [group {tag}] ACK throttled, next in {} ms (factor: {factor:.2})",
                    conn.address(),
                    conn.stats.last_ack_sent_time + min_interval - current_ms
                );
                return;
            }
        }

        let pkt = create_ack_packet(&conn.recv_log);
        let addr = conn.address();
        match self.socket.send_to(&pkt, addr).await {
            Ok(n) if n == pkt.len() => {
                conn.stats.last_ack_sent_time = current_ms;
                trace!("[{addr}] [group {tag}] sent SRTLA ACK (throttle factor: {factor:.2})");
            }
            _ => error!("[{addr}] [group {tag}] failed to send the SRTLA ACK"),
        }
    }

    /// Update telemetry from an extended keepalive (when present) and echo
    /// the exact original bytes back to the sender.
    async fn handle_keepalive(
        &self,
        group: &mut ConnectionGroup,
        cidx: usize,
        buf: &[u8],
        src: SocketAddr,
    ) {
        let tag = group.tag();
        let conn = &mut group.connections_mut()[cidx];

        if let Some(info) = parse_keepalive_telemetry(buf) {
            update_connection_telemetry(conn, &info, now_secs());
            info!(
                "[{src}] [group {tag}] per-connection keepalive: id={}, bw: {:.2} kbits/s, window={}, in-flight={}, rtt={}us, naks={}",
                info.conn_id,
                f64::from(info.bitrate_bytes_per_sec) * 8.0 / 1000.0,
                info.window,
                info.in_flight,
                info.rtt_us,
                info.nak_count
            );
        } else {
            debug!(
                "[{src}] [group {tag}] keepalive without sender telemetry, quality evaluation will use receiver-only metrics"
            );
        }

        match self.socket.send_to(buf, src).await {
            Ok(n) if n == buf.len() => {}
            _ => error!("[{src}] [group {tag}] failed to echo SRTLA keepalive"),
        }
    }

    async fn send_control(&self, packet_type: u16, addr: SocketAddr) {
        let pkt = create_control_packet(packet_type);
        if self.socket.send_to(&pkt, addr).await.is_err() {
            error!("[{addr}] failed to send control packet {packet_type:#06x}");
        }
    }
}

fn update_connection_telemetry(conn: &mut Connection, info: &SenderTelemetry, current_time: u64) {
    let stats = &mut conn.stats;

    stats.rtt_history[stats.rtt_history_idx] = info.rtt_us;
    stats.rtt_history_idx = (stats.rtt_history_idx + 1) % RTT_HISTORY_SIZE;
    stats.rtt_us = info.rtt_us;

    stats.window = info.window;
    stats.in_flight = info.in_flight;
    stats.sender_nak_count = info.nak_count;
    stats.sender_bitrate_bps = info.bitrate_bytes_per_sec;

    stats.last_keepalive = current_time;
    stats.sender_supports_extended_keepalives = true;
}
