//! SRTLA Receiver Library
//!
//! This library implements the receiving side of SRTLA (SRT transport proxy
//! with link aggregation): it terminates bonded client uplinks, recombines
//! them into a single SRT flow towards a downstream server, and feeds
//! per-link ACK throttling back so senders steer traffic away from degraded
//! uplinks.

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod nak_dedup;
pub mod protocol;
pub mod quality;
pub mod receiver;
pub mod registry;
pub mod resolver;
pub mod utils;

#[cfg(test)]
pub mod tests;

// Re-export commonly used items
pub use protocol::*;
pub use registry::{Connection, ConnectionGroup, ConnectionRegistry};
pub use utils::{now_ms, now_secs};
