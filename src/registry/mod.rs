//! Process-wide collection of groups and their member connections.

mod connection;
mod group;

use std::net::SocketAddr;

pub use connection::{Connection, ConnectionStats};
pub use group::{ConnectionGroup, GroupId};
use tracing::{debug, info};

use crate::protocol::{
    CLEANUP_PERIOD, CONN_TIMEOUT, GROUP_TIMEOUT, KEEPALIVE_PERIOD, RECOVERY_CHANCE_PERIOD,
    SRTLA_ID_LEN,
};

/// Compare two group ids without data-dependent early exit, so response
/// timing leaks nothing about how much of a guessed id matched.
fn constant_time_id_eq(a: &[u8; SRTLA_ID_LEN], b: &[u8]) -> bool {
    if b.len() != SRTLA_ID_LEN {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Default)]
pub struct ConnectionRegistry {
    groups: Vec<ConnectionGroup>,
    last_cleanup: u64, // sec
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[ConnectionGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [ConnectionGroup] {
        &mut self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn add_group(&mut self, group: ConnectionGroup) {
        self.groups.push(group);
    }

    pub fn remove_group_at(&mut self, idx: usize) {
        self.groups.remove(idx);
    }

    pub fn position_by_id(&self, id: &[u8]) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| constant_time_id_eq(g.id(), id))
    }

    pub fn find_group_by_id(&mut self, id: &[u8]) -> Option<&mut ConnectionGroup> {
        let idx = self.position_by_id(id)?;
        Some(&mut self.groups[idx])
    }

    /// Locate the owner of a peer address.
    ///
    /// Returns `(group index, Some(connection index))` when a member
    /// connection matches, or `(group index, None)` when the address only
    /// matches a group's `last_address` (used to route SRT egress replies).
    pub fn find_by_address(&self, addr: &SocketAddr) -> Option<(usize, Option<usize>)> {
        for (gidx, group) in self.groups.iter().enumerate() {
            if let Some(cidx) = group.position_by_address(addr) {
                return Some((gidx, Some(cidx)));
            }
            if group.last_address() == Some(*addr) {
                return Some((gidx, None));
            }
        }
        None
    }

    /// Reap timed-out connections and expired empty groups, advance the
    /// recovery state machine, and prompt keepalives for idle connections.
    ///
    /// Internally rate-limited to once per `CLEANUP_PERIOD`; calling more
    /// often is a no-op. Only this path destroys state during steady-state
    /// operation.
    pub fn cleanup_inactive(&mut self, current_time: u64, mut keepalive: impl FnMut(&Connection)) {
        if self.last_cleanup + CLEANUP_PERIOD > current_time {
            return;
        }
        self.last_cleanup = current_time;

        if self.groups.is_empty() {
            return;
        }

        debug!("starting a cleanup run");

        let total_groups = self.groups.len();
        let mut total_connections = 0usize;
        let mut removed_groups = 0usize;
        let mut removed_connections = 0usize;

        self.groups.retain_mut(|group| {
            let before = group.connections().len();
            total_connections += before;
            let tag = group.tag();

            group.connections_mut().retain_mut(|conn| {
                if conn.recovery_start() > 0 {
                    if conn.last_received() > conn.recovery_start() {
                        if current_time - conn.recovery_start() > RECOVERY_CHANCE_PERIOD {
                            info!(
                                "[{}] [group {}] connection recovery completed",
                                conn.address(),
                                tag
                            );
                            conn.set_recovery_start(0);
                        }
                    } else if conn.recovery_start() + RECOVERY_CHANCE_PERIOD < current_time {
                        info!(
                            "[{}] [group {}] connection recovery failed",
                            conn.address(),
                            tag
                        );
                        conn.set_recovery_start(0);
                    }
                }

                if conn.last_received() + CONN_TIMEOUT < current_time {
                    info!(
                        "[{}] [group {}] connection removed (timed out)",
                        conn.address(),
                        tag
                    );
                    removed_connections += 1;
                    return false;
                }

                if conn.last_received() + KEEPALIVE_PERIOD < current_time {
                    keepalive(conn);
                }
                true
            });

            if group.connections().is_empty() && group.created_at() + GROUP_TIMEOUT < current_time {
                info!("[group {}] group removed (no connections)", tag);
                removed_groups += 1;
                return false;
            }

            if before != group.connections().len() {
                group.write_socket_info_file();
            }
            true
        });

        debug!(
            "cleanup run ended: counted {} groups and {} connections, removed {} groups and {} connections",
            total_groups, total_connections, removed_groups, removed_connections
        );
    }
}
