use std::net::Ipv4Addr;

use crate::server::Quad;

/// Failure modes that can be returned from fallible operations.
///
/// Most protocol-level discards (wrong port, bad checksum from an unknown
/// peer, an unknown 4-tuple) are *not* represented here: the spec requires
/// those to be silently dropped or merely logged, never surfaced as an
/// error (see spec §7). This enum only covers operations with a genuine
/// failure outcome to report to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("segment is only {len} bytes, shorter than the 20-byte header")]
    ShortSegment { len: usize },

    #[error("checksum mismatch for segment from {src}: computed {computed:#06x}, expected zero")]
    ChecksumMismatch { src: Ipv4Addr, computed: u16 },

    #[error("'{0}' is not a valid dotted-quad IPv4 address")]
    InvalidAddress(String),

    #[error("connection {0:?} no longer exists")]
    ConnectionClosed(Quad),
}
