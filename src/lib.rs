//! A simplified reliable byte-stream transport compatible with the segment
//! format of TCP over IPv4, running on top of an injected network layer.
//!
//! The crate is organized leaves-first, following the weight the protocol
//! itself gives each piece:
//!
//! - [`codec`] packs/unpacks the fixed 20-byte header and computes the
//!   IPv4-pseudo-header checksum.
//! - [`server`] demultiplexes inbound segments by 4-tuple and drives the
//!   three-way handshake.
//! - [`connection`] is the per-connection reliability and
//!   congestion-control state machine: sequence bookkeeping, the
//!   retransmission queue and its timer, RTT estimation, the congestion
//!   window, and FIN-based close.
//!
//! The core never touches real wall-clock time or a real socket on its
//! own: every time-sensitive or I/O operation takes an explicit `now:
//! Instant` and a `&mut dyn `[`network::NetworkLayer`]` so the whole state
//! machine can be driven deterministically from tests.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod network;
mod seq;
pub mod server;

pub use config::{Config, IssPolicy};
pub use connection::{Connection, Receiver};
pub use error::Error;
pub use network::{LoopbackNetwork, NetworkLayer};
pub use server::{AcceptMonitor, Quad, Server};
