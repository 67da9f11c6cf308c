use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::connection::Connection;
use crate::nak_dedup::NakCache;
use crate::protocol::{SRT_SOCKET_INFO_PREFIX, SRTLA_ID_LEN};

pub type GroupId = [u8; SRTLA_ID_LEN];

/// One logical SRTLA client: a set of uplink connections feeding a single
/// downstream SRT session.
pub struct ConnectionGroup {
    id: GroupId,
    conns: Vec<Connection>,
    created_at: u64, // sec
    /// Peer address of the most recent non-keepalive data packet; non-ACK
    /// replies from the SRT server are routed back through it.
    last_addr: Option<SocketAddr>,
    /// Lazily created on first egress, retained until group destruction.
    srt_socket: Option<Arc<UdpSocket>>,
    srt_local_port: u16,
    srt_reader: Option<JoinHandle<()>>,
    pub nak_cache: NakCache,
    pub total_target_bandwidth: u64, // bytes/sec, refreshed per evaluation
    pub last_quality_eval: u64,      // sec
    pub last_load_balance_eval: u64, // sec
    pub load_balancing_enabled: bool,
}

impl ConnectionGroup {
    /// Create a group from the client half of the id (REG1 body). The server
    /// half is drawn from the OS CSPRNG and returned to the client in REG2.
    pub fn new(client_id_half: &[u8], timestamp: u64) -> Self {
        let mut id = [0u8; SRTLA_ID_LEN];
        let half = SRTLA_ID_LEN / 2;
        id[..half].copy_from_slice(&client_id_half[..half]);
        rand::rng().fill_bytes(&mut id[half..]);

        Self {
            id,
            conns: Vec::new(),
            created_at: timestamp,
            last_addr: None,
            srt_socket: None,
            srt_local_port: 0,
            srt_reader: None,
            nak_cache: NakCache::new(),
            total_target_bandwidth: 0,
            last_quality_eval: 0,
            last_load_balance_eval: 0,
            load_balancing_enabled: true,
        }
    }

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Short hex tag for log correlation.
    pub fn tag(&self) -> String {
        let mut out = String::with_capacity(8);
        for byte in &self.id[..4] {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn connections(&self) -> &[Connection] {
        &self.conns
    }

    pub fn connections_mut(&mut self) -> &mut Vec<Connection> {
        &mut self.conns
    }

    pub fn add_connection(&mut self, conn: Connection) {
        self.conns.push(conn);
    }

    pub fn position_by_address(&self, addr: &SocketAddr) -> Option<usize> {
        self.conns.iter().position(|c| c.address() == *addr)
    }

    pub fn last_address(&self) -> Option<SocketAddr> {
        self.last_addr
    }

    pub fn set_last_address(&mut self, addr: SocketAddr) {
        self.last_addr = Some(addr);
    }

    pub fn srt_socket(&self) -> Option<&Arc<UdpSocket>> {
        self.srt_socket.as_ref()
    }

    pub fn set_srt_socket(&mut self, socket: Arc<UdpSocket>, local_port: u16, reader: JoinHandle<()>) {
        self.srt_socket = Some(socket);
        self.srt_local_port = local_port;
        self.srt_reader = Some(reader);
    }

    pub fn srt_local_port(&self) -> u16 {
        self.srt_local_port
    }

    fn socket_info_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", SRT_SOCKET_INFO_PREFIX, self.srt_local_port))
    }

    /// Rewrite the sidecar file listing one client IP per line. No-op until
    /// the SRT socket exists (the file is named after its local port).
    pub fn write_socket_info_file(&self) {
        if self.srt_socket.is_none() {
            return;
        }
        if let Err(e) = self.write_socket_info_to(&self.socket_info_path()) {
            warn!("[group {}] failed to write socket info file: {e}", self.tag());
        } else {
            info!("[group {}] wrote socket info file", self.tag());
        }
    }

    /// Atomic replace so concurrent readers never observe a partial file.
    pub(crate) fn write_socket_info_to(&self, path: &Path) -> std::io::Result<()> {
        let mut contents = String::new();
        for conn in &self.conns {
            let _ = writeln!(contents, "{}", conn.address().ip());
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)
    }

    pub fn remove_socket_info_file(&self) {
        if self.srt_socket.is_none() {
            return;
        }
        let _ = std::fs::remove_file(self.socket_info_path());
        info!("[group {}] removed socket info file", self.tag());
    }
}

impl Drop for ConnectionGroup {
    fn drop(&mut self) {
        if let Some(reader) = self.srt_reader.take() {
            reader.abort();
        }
        self.remove_socket_info_file();
    }
}
