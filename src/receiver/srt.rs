//! Per-group SRT egress: a connected UDP socket to the downstream server.
//!
//! Egress failure is fatal for the group: if the server socket cannot be
//! created or a send comes up short, the session cannot continue and the
//! whole group is torn down (its clients will observe a timeout). Ingress
//! errors, by contrast, are logged and skipped.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use smallvec::SmallVec;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::protocol::{MTU, RECV_BUF_SIZE, SEND_BUF_SIZE, SRT_MIN_LEN, is_srt_ack};
use crate::registry::{ConnectionGroup, ConnectionRegistry, GroupId};

/// A datagram read from a group's SRT socket, delivered to the reactor.
///
/// Keyed by group id rather than any reference to the group, so an event
/// that outlives its group resolves to nothing instead of dangling.
pub struct SrtEvent {
    pub group_id: GroupId,
    pub bytes: SmallVec<u8, 64>,
}

pub struct SrtHandler {
    srtla_socket: Arc<UdpSocket>,
    srt_addr: SocketAddr,
    event_tx: UnboundedSender<SrtEvent>,
}

impl SrtHandler {
    pub fn new(
        srtla_socket: Arc<UdpSocket>,
        srt_addr: SocketAddr,
        event_tx: UnboundedSender<SrtEvent>,
    ) -> Self {
        Self {
            srtla_socket,
            srt_addr,
            event_tx,
        }
    }

    /// Forward one datagram to the SRT server, creating the group socket on
    /// first use. Any failure here means the caller must destroy the group.
    pub async fn forward_to_srt_server(
        &self,
        group: &mut ConnectionGroup,
        buf: &[u8],
    ) -> Result<()> {
        self.ensure_group_socket(group).await?;

        let socket = group.srt_socket().expect("socket just ensured");
        let sent = socket.send(buf).await.context("send to SRT server")?;
        if sent != buf.len() {
            bail!("short send to SRT server ({sent} of {} bytes)", buf.len());
        }
        Ok(())
    }

    /// Handle a datagram that arrived from a group's SRT socket.
    ///
    /// Server ACKs fan out to every uplink (each client link needs them);
    /// everything else follows the most recent data uplink ("address
    /// sticky"). A short or failed read terminates the group.
    pub async fn handle_srt_data(&self, registry: &mut ConnectionRegistry, event: SrtEvent) {
        let Some(gidx) = registry.position_by_id(&event.group_id) else {
            // Stale event for a group that was destroyed after the datagram
            // was queued.
            return;
        };

        if event.bytes.len() < SRT_MIN_LEN {
            let tag = registry.groups()[gidx].tag();
            error!("[group {tag}] failed to read the SRT socket, terminating the group");
            registry.remove_group_at(gidx);
            return;
        }

        let group = &registry.groups()[gidx];
        let tag = group.tag();

        if is_srt_ack(&event.bytes) {
            let addrs: SmallVec<SocketAddr, 4> =
                group.connections().iter().map(|c| c.address()).collect();
            for addr in addrs {
                match self.srtla_socket.send_to(&event.bytes, addr).await {
                    Ok(n) if n == event.bytes.len() => {}
                    _ => error!("[{addr}] [group {tag}] failed to send the SRT ack"),
                }
            }
        } else if let Some(addr) = group.last_address() {
            match self.srtla_socket.send_to(&event.bytes, addr).await {
                Ok(n) if n == event.bytes.len() => {}
                _ => error!("[{addr}] [group {tag}] failed to send the SRT packet"),
            }
        }
    }

    async fn ensure_group_socket(&self, group: &mut ConnectionGroup) -> Result<()> {
        if group.srt_socket().is_some() {
            return Ok(());
        }

        let socket = create_srt_socket(self.srt_addr).context("create SRT socket")?;
        let socket = Arc::new(socket);
        let local_port = socket.local_addr().context("SRT socket local addr")?.port();

        let reader = spawn_srt_reader(*group.id(), group.tag(), socket.clone(), self.event_tx.clone());
        group.set_srt_socket(socket, local_port, reader);

        info!(
            "[group {}] created SRT socket, local port {local_port}",
            group.tag()
        );
        group.write_socket_info_file();
        Ok(())
    }
}

fn create_srt_socket(srt_addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if srt_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("create socket")?;
    sock.set_recv_buffer_size(RECV_BUF_SIZE)
        .context("set receive buffer size")?;
    sock.set_send_buffer_size(SEND_BUF_SIZE)
        .context("set send buffer size")?;
    sock.set_nonblocking(true).context("set nonblocking")?;
    sock.connect(&srt_addr.into())
        .with_context(|| format!("connect to SRT server {srt_addr}"))?;

    let std_sock: std::net::UdpSocket = sock.into();
    UdpSocket::from_std(std_sock).context("register SRT socket with the runtime")
}

/// Move datagrams from the group's SRT socket into the reactor channel.
///
/// Read errors are surfaced as an empty event; the reactor treats anything
/// shorter than `SRT_MIN_LEN` as fatal for the group.
fn spawn_srt_reader(
    group_id: GroupId,
    tag: String,
    socket: Arc<UdpSocket>,
    event_tx: UnboundedSender<SrtEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MTU];
        loop {
            match socket.recv(&mut buf).await {
                Ok(n) => {
                    let event = SrtEvent {
                        group_id,
                        bytes: SmallVec::from_slice_copy(&buf[..n]),
                    };
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("[group {tag}] SRT socket recv error: {err}");
                    if event_tx
                        .send(SrtEvent {
                            group_id,
                            bytes: SmallVec::new(),
                        })
                        .is_err()
                    {
                        break;
                    }
                    // Brief pause so a persistent error cannot spin the task.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}
