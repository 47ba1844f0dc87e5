//! The network-layer interface the core consumes.
//!
//! The real network (a raw socket, a TUN device, a simulated link) is an
//! external collaborator and is deliberately not specified beyond this
//! trait: it must be able to emit a datagram to an address, and it must
//! tell the server whether to skip checksum verification (useful for
//! networks, simulated or otherwise, that already guarantee integrity).

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

/// Consumed by [`crate::server::Server`] and [`crate::connection::Connection`]
/// to emit segments. Implementations are expected to be cheap to call from
/// inside segment handling; there are no suspension points in this crate
/// (spec §5), so `send` must not block indefinitely.
pub trait NetworkLayer {
    /// Transmits one already-checksummed segment to `dest_addr`.
    fn send(&mut self, segment: Vec<u8>, dest_addr: Ipv4Addr);

    /// When true, the server skips checksum verification on arrival. Real
    /// networks that already validate integrity below this layer (or test
    /// harnesses that want to inject corrupt segments without the server
    /// discarding them) set this to `true`.
    fn ignore_checksum(&self) -> bool {
        false
    }
}

/// An in-memory [`NetworkLayer`] used by tests and the bundled demo: it
/// records every segment handed to it instead of transmitting it anywhere,
/// and can be told to drop the next N sends to simulate loss.
#[derive(Debug, Default)]
pub struct LoopbackNetwork {
    pub sent: Vec<(Vec<u8>, Ipv4Addr)>,
    pub ignore_checksum: bool,
    drop_next: usize,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls to [`NetworkLayer::send`] are silently swallowed
    /// (not appended to `sent`), simulating segment loss.
    pub fn drop_next(&mut self, n: usize) {
        self.drop_next = n;
    }
}

impl NetworkLayer for LoopbackNetwork {
    fn send(&mut self, segment: Vec<u8>, dest_addr: Ipv4Addr) {
        if self.drop_next > 0 {
            self.drop_next -= 1;
            return;
        }
        self.sent.push((segment, dest_addr));
    }

    fn ignore_checksum(&self) -> bool {
        self.ignore_checksum
    }
}

/// Lets a test keep a handle on the [`LoopbackNetwork`] it hands to a
/// [`crate::server::Server`] (which otherwise takes sole ownership of its
/// `Box<dyn NetworkLayer>`), so it can inspect what was sent afterward.
impl NetworkLayer for Rc<RefCell<LoopbackNetwork>> {
    fn send(&mut self, segment: Vec<u8>, dest_addr: Ipv4Addr) {
        self.borrow_mut().send(segment, dest_addr);
    }

    fn ignore_checksum(&self) -> bool {
        self.borrow().ignore_checksum()
    }
}
