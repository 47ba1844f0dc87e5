//! The demultiplexing server: owns the listening port and the mapping from
//! 4-tuple to [`Connection`], and is the only place that mapping is
//! mutated (spec §5 Shared resources).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::codec::{self, calc_checksum, read_header};
use crate::config::Config;
use crate::connection::{ConnAction, Connection};
use crate::error::Error;
use crate::network::NetworkLayer;

/// The ordered 4-tuple identifying a connection: (remote address, remote
/// port, local address, local port) — spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub remote_addr: Ipv4Addr,
    pub remote_port: u16,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
}

/// `cb(connection, network)` is invoked exactly once per accepted
/// connection, synchronously, from inside [`Server::receive`].
pub type AcceptMonitor = Box<dyn FnMut(&mut Connection, &mut dyn NetworkLayer)>;

pub struct Server {
    port: u16,
    network: Box<dyn NetworkLayer>,
    config: Config,
    connections: HashMap<Quad, Connection>,
    accept_monitor: Option<AcceptMonitor>,
}

impl Server {
    pub fn new(network: Box<dyn NetworkLayer>, port: u16) -> Self {
        Self::with_config(network, port, Config::default())
    }

    pub fn with_config(network: Box<dyn NetworkLayer>, port: u16, config: Config) -> Self {
        Server {
            port,
            network,
            config,
            connections: HashMap::new(),
            accept_monitor: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_connection(&self, quad: &Quad) -> bool {
        self.connections.contains_key(quad)
    }

    /// Looks up an accepted connection by its 4-tuple, the "handle" spec §9
    /// calls for in place of a connection holding a back reference to its
    /// server.
    pub fn connection_mut(&mut self, quad: &Quad) -> Option<&mut Connection> {
        self.connections.get_mut(quad)
    }

    /// Registers the callback invoked once per newly accepted connection.
    pub fn register_accept_monitor(&mut self, cb: AcceptMonitor) {
        self.accept_monitor = Some(cb);
    }

    /// Enqueues `data` for reliable delivery on the named connection.
    pub fn send(&mut self, quad: &Quad, data: &[u8], now: Instant) -> Result<(), Error> {
        let conn = self
            .connections
            .get_mut(quad)
            .ok_or(Error::ConnectionClosed(*quad))?;
        conn.send(data, now, self.network.as_mut());
        Ok(())
    }

    /// Initiates local close on the named connection.
    pub fn close_connection(&mut self, quad: &Quad, now: Instant) -> Result<(), Error> {
        let conn = self
            .connections
            .get_mut(quad)
            .ok_or(Error::ConnectionClosed(*quad))?;
        conn.close(now, self.network.as_mut());
        Ok(())
    }

    /// Entry point invoked by the network layer for every inbound IPv4
    /// payload addressed to this host, regardless of destination port
    /// (wrong-port segments are discarded inside, per spec §4.2 step 1).
    pub fn receive(
        &mut self,
        src_addr: &str,
        dst_addr: &str,
        segment: &[u8],
        now: Instant,
    ) -> Result<(), Error> {
        let src_addr = codec::parse_addr(src_addr)?;
        let dst_addr = codec::parse_addr(dst_addr)?;

        let header = match read_header(segment) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!(%src_addr, %err, "dropping unparseable segment");
                return Ok(());
            }
        };

        if header.dst_port != self.port {
            return Ok(());
        }

        if !self.network.ignore_checksum() {
            let computed = calc_checksum(segment, src_addr, dst_addr);
            if computed != 0 {
                let err = Error::ChecksumMismatch {
                    src: src_addr,
                    computed,
                };
                tracing::warn!(src_port = header.src_port, %err, "discarding segment");
                return Ok(());
            }
        }

        let payload = &segment[header.header_len().min(segment.len())..];

        let quad = Quad {
            remote_addr: src_addr,
            remote_port: header.src_port,
            local_addr: dst_addr,
            local_port: header.dst_port,
        };

        if header.syn() {
            self.accept(quad, header.seq, src_addr, dst_addr);
            return Ok(());
        }

        if let Some(conn) = self.connections.get_mut(&quad) {
            let action = conn.on_segment(&header, payload, now, self.network.as_mut());
            if action == ConnAction::Remove {
                self.connections.remove(&quad);
            }
        } else {
            tracing::debug!(?quad, "segment for unknown connection");
        }

        Ok(())
    }

    fn accept(&mut self, quad: Quad, peer_seq: u32, src_addr: Ipv4Addr, dst_addr: Ipv4Addr) {
        let iss = self.config.next_iss();

        let synack = codec::build_segment(
            quad.local_port,
            quad.remote_port,
            iss,
            peer_seq.wrapping_add(1),
            codec::FLAG_SYN | codec::FLAG_ACK,
            &[],
            dst_addr,
            src_addr,
        );
        self.network.send(synack, src_addr);

        let connection = Connection::new(quad, iss, peer_seq, &self.config);
        self.connections.insert(quad, connection);

        let conn_mut = self.connections.get_mut(&quad).expect("just inserted");
        if let Some(cb) = self.accept_monitor.as_mut() {
            cb(conn_mut, self.network.as_mut());
        }
    }

    /// Drives the retransmission timer for every live connection. Callers
    /// invoke this periodically (spec §5: timers execute as ordinary
    /// callbacks scheduled by the event loop).
    pub fn on_tick(&mut self, now: Instant) {
        for conn in self.connections.values_mut() {
            conn.on_tick(now, self.network.as_mut());
        }
    }
}
