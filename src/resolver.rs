//! Resolution of the downstream SRT server address.
//!
//! Every DNS result is probed with an SRT handshake induction packet; the
//! first address that answers with a same-sized reply wins. If nothing
//! answers, the first resolved address is used with a warning so a server
//! that comes up later can still be reached.

use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

use crate::protocol::{MTU, RECV_BUF_SIZE, SEND_BUF_SIZE, SRT_TYPE_HANDSHAKE};

/// Full SRT handshake packet: 16-byte control header + 48-byte payload.
const SRT_HANDSHAKE_LEN: usize = 64;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

fn create_handshake_packet() -> [u8; SRT_HANDSHAKE_LEN] {
    let mut pkt = [0u8; SRT_HANDSHAKE_LEN];
    pkt[0..2].copy_from_slice(&SRT_TYPE_HANDSHAKE.to_be_bytes());
    // UDT version 4, ext field 2, handshake type 1 (induction request)
    pkt[16..20].copy_from_slice(&4u32.to_be_bytes());
    pkt[22..24].copy_from_slice(&2u16.to_be_bytes());
    pkt[36..40].copy_from_slice(&1u32.to_be_bytes());
    pkt
}

pub async fn resolve_srt_address(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .collect();
    if addrs.is_empty() {
        bail!("no DNS results for {host}:{port}");
    }

    let handshake = create_handshake_packet();

    for addr in &addrs {
        info!("trying to reach the SRT server at {addr}...");
        match probe_addr(*addr, &handshake).await {
            Ok(true) => {
                info!("SRT server confirmed at {addr}");
                return Ok(*addr);
            }
            Ok(false) => info!("no handshake response from {addr}"),
            Err(err) => info!("probe of {addr} failed: {err}"),
        }
    }

    let fallback = addrs[0];
    warn!(
        "failed to confirm that an SRT server is reachable at any address, proceeding with {fallback}"
    );
    Ok(fallback)
}

async fn probe_addr(addr: SocketAddr, handshake: &[u8]) -> Result<bool> {
    let socket = create_probe_socket(addr)?;
    socket
        .connect(addr)
        .await
        .with_context(|| format!("connect probe socket to {addr}"))?;

    let sent = socket.send(handshake).await.context("send handshake")?;
    if sent != handshake.len() {
        return Ok(false);
    }

    let mut buf = [0u8; MTU];
    match timeout(PROBE_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => Ok(n == handshake.len()),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Ok(false),
    }
}

fn create_probe_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let (domain, bind_addr): (_, SocketAddr) = if addr.is_ipv4() {
        (Domain::IPV4, "0.0.0.0:0".parse().unwrap())
    } else {
        (Domain::IPV6, "[::]:0".parse().unwrap())
    };

    let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("create socket")?;
    sock.set_recv_buffer_size(RECV_BUF_SIZE)
        .context("set receive buffer size")?;
    sock.set_send_buffer_size(SEND_BUF_SIZE)
        .context("set send buffer size")?;
    sock.set_nonblocking(true).context("set nonblocking")?;
    sock.bind(&bind_addr.into()).context("bind probe socket")?;

    let std_sock: std::net::UdpSocket = sock.into();
    UdpSocket::from_std(std_sock).context("register probe socket with the runtime")
}
