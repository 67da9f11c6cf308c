//! The receiver reactor: one task owns all registry state and drives it from
//! socket readiness plus a coarse periodic tick.
//!
//! The shared SRTLA socket is read directly in the select loop. Each group's
//! SRT socket is drained by a small spawned reader that forwards datagrams
//! over a channel tagged with the group id; the reactor resolves the id
//! through the registry, so an event can never reach a destroyed group.

mod srt;
mod srtla;

use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use smallvec::SmallVec;
pub use srt::{SrtEvent, SrtHandler};
pub use srtla::SrtlaHandler;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{self, Duration};
use tracing::{error, info};

use crate::protocol::{MTU, RECV_BUF_SIZE, SEND_BUF_SIZE};
use crate::quality::{LoadBalancer, MetricsCollector, QualityEvaluator};
use crate::registry::ConnectionRegistry;
use crate::utils::now_secs;

/// Bind the shared SRTLA ingress socket: dual-stack IPv6 with explicit
/// buffer sizes. All failures here are fatal for the process.
pub fn bind_srtla_socket(port: u16) -> Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .context("create SRTLA socket")?;
    sock.set_only_v6(false).context("clear IPV6_V6ONLY")?;
    sock.set_recv_buffer_size(RECV_BUF_SIZE)
        .context("set receive buffer size")?;
    sock.set_send_buffer_size(SEND_BUF_SIZE)
        .context("set send buffer size")?;
    sock.set_nonblocking(true).context("set nonblocking")?;

    let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    sock.bind(&addr.into())
        .with_context(|| format!("bind SRTLA socket to [::]:{port}"))?;

    let std_sock: std::net::UdpSocket = sock.into();
    UdpSocket::from_std(std_sock).context("register SRTLA socket with the runtime")
}

pub async fn run_receiver(srtla_port: u16, srt_addr: SocketAddr) -> Result<()> {
    let socket = bind_srtla_socket(srtla_port)?;
    info!("listening for SRTLA on [::]:{srtla_port}");
    run_with_socket(socket, srt_addr).await
}

/// The reactor proper. Takes a pre-bound SRTLA socket so tests can run it on
/// an ephemeral port.
pub async fn run_with_socket(socket: UdpSocket, srt_addr: SocketAddr) -> Result<()> {
    let socket = Arc::new(socket);
    let (event_tx, mut event_rx) = unbounded_channel::<SrtEvent>();

    let mut registry = ConnectionRegistry::new();
    let srtla = SrtlaHandler::new(socket.clone());
    let srt = SrtHandler::new(socket.clone(), srt_addr, event_tx);
    let metrics = MetricsCollector;
    let evaluator = QualityEvaluator;
    let balancer = LoadBalancer;

    let mut recv_buf = vec![0u8; MTU];
    let mut tick = time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    info!("srtla_rec is now running");

    loop {
        tokio::select! {
            res = socket.recv_from(&mut recv_buf) => {
                match res {
                    Ok((n, src)) => {
                        srtla
                            .process_packet(&mut registry, &srt, &metrics, &recv_buf[..n], src, now_secs())
                            .await;
                    }
                    Err(err) => error!("failed to read an SRTLA packet: {err}"),
                }
            }
            Some(event) = event_rx.recv() => {
                srt.handle_srt_data(&mut registry, event).await;
            }
            _ = tick.tick() => {
                let current_time = now_secs();

                // The registry only records which connections have gone
                // idle; keepalives are sent after the borrow ends.
                let mut idle: SmallVec<SocketAddr, 8> = SmallVec::new();
                registry.cleanup_inactive(current_time, |conn| idle.push(conn.address()));
                for addr in idle {
                    srtla.send_keepalive(addr).await;
                }

                for group in registry.groups_mut() {
                    evaluator.evaluate_group(group, current_time);
                    balancer.adjust_weights(group, current_time);
                }
            }
        }
    }
}
