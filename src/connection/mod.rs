//! Per-connection reliability and congestion-control state machine.
//!
//! A [`Connection`] is created by [`crate::server::Server`] when a SYN
//! arrives for an unknown 4-tuple; from then on the server forwards every
//! segment for that tuple here via [`Connection::on_segment`], and drives
//! the retransmission timer via [`Connection::on_tick`]. The application
//! reaches the connection through [`Connection::send`] and
//! [`Connection::close`], and is reached back through the callback
//! registered with [`Connection::register_receiver`].

mod cwnd;
mod retransmit;
mod rtt;

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::codec::{self, Header, FLAG_ACK, FLAG_FIN, FLAG_SYN};
use crate::config::Config;
use crate::network::NetworkLayer;
use crate::server::Quad;

use cwnd::CongestionWindow;
use retransmit::{Record, RetransmitQueue};
use rtt::RttEstimator;

/// `cb(connection, payload, network)`. An empty `payload` signals that the
/// peer has sent a FIN (half-close); `connection` is passed back so the
/// callback can drive the connection (e.g. an echo handler calling `send`)
/// without the connection needing to own a reference to itself.
pub type Receiver = Box<dyn FnMut(&mut Connection, &[u8], &mut dyn NetworkLayer)>;

/// Mirrors the synchronized states from spec §4.3. `SYN_RECEIVED` is not
/// represented: a [`Connection`] only comes into existence after the server
/// has already sent the SYN+ACK and advanced `send_unack`/`send_next`, so
/// that state is never externally observable (spec §4.2 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Established,
    CloseWait,
    Closed,
}

/// Signals to [`crate::server::Server`] whether the connection that just
/// handled a segment should be dropped from the server's mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnAction {
    Continue,
    Remove,
}

pub struct Connection {
    quad: Quad,
    state: State,

    send_next: u32,
    send_unack: u32,
    recv_next: u32,

    retransmit: RetransmitQueue,
    cwnd: CongestionWindow,
    rtt: RttEstimator,
    mss: usize,

    /// Application bytes handed to [`Connection::send`] that have not yet
    /// been segmented out, because doing so would push bytes in flight past
    /// `cwnd` (spec §4.3 Send path, the cwnd-respecting SHOULD clause).
    backlog: VecDeque<u8>,

    receiver: Option<Receiver>,
}

impl Connection {
    /// Constructs a connection that has just completed the server side of
    /// the handshake: `iss` is this side's initial sequence number (already
    /// sent in the SYN+ACK), `peer_seq` is the sequence number carried by
    /// the client's SYN.
    pub(crate) fn new(quad: Quad, iss: u32, peer_seq: u32, config: &Config) -> Self {
        Connection {
            quad,
            state: State::Established,
            send_next: iss.wrapping_add(1),
            send_unack: iss.wrapping_add(1),
            recv_next: peer_seq.wrapping_add(1),
            retransmit: RetransmitQueue::new(),
            cwnd: CongestionWindow::new(config.mss, config.dup_ack_threshold),
            rtt: RttEstimator::new(config),
            mss: config.mss,
            backlog: VecDeque::new(),
            receiver: None,
        }
    }

    pub fn quad(&self) -> Quad {
        self.quad
    }

    pub fn send_next(&self) -> u32 {
        self.send_next
    }

    pub fn send_unack(&self) -> u32 {
        self.send_unack
    }

    pub fn recv_next(&self) -> u32 {
        self.recv_next
    }

    pub fn cwnd_bytes(&self) -> u32 {
        self.cwnd.bytes()
    }

    /// The current retransmission timeout, as maintained by the RTT
    /// estimator. Exposed so callers (and tests) can observe whether an RTT
    /// sample actually moved the estimate.
    pub fn rto(&self) -> std::time::Duration {
        self.rtt.rto()
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Registers the callback invoked with every in-order byte range
    /// delivered to this connection, and once more with an empty payload
    /// when the peer's FIN is processed.
    pub fn register_receiver(&mut self, cb: Receiver) {
        self.receiver = Some(cb);
    }

    fn invoke_receiver(&mut self, payload: &[u8], network: &mut dyn NetworkLayer) {
        if let Some(mut cb) = self.receiver.take() {
            cb(self, payload, network);
            self.receiver = Some(cb);
        }
    }

    fn build(&self, seq: u32, ack: u32, flags: u16, payload: &[u8]) -> Vec<u8> {
        codec::build_segment(
            self.quad.local_port,
            self.quad.remote_port,
            seq,
            ack,
            flags,
            payload,
            self.quad.local_addr,
            self.quad.remote_addr,
        )
    }

    fn send_pure_ack(&self, network: &mut dyn NetworkLayer) {
        let segment = self.build(self.send_next, self.recv_next, FLAG_ACK, &[]);
        network.send(segment, self.quad.remote_addr);
    }

    /// Segments out as much of `backlog` as `cwnd` currently allows,
    /// enqueuing each chunk on the retransmit queue and arming the timer if
    /// it isn't already running.
    fn pump(&mut self, now: Instant, network: &mut dyn NetworkLayer) {
        loop {
            let in_flight = self.retransmit.bytes_in_flight();
            let budget = self.cwnd.bytes().saturating_sub(in_flight) as usize;
            let chunk_len = self.backlog.len().min(self.mss).min(budget);
            if chunk_len == 0 {
                break;
            }

            let chunk: Vec<u8> = self.backlog.drain(..chunk_len).collect();
            let segment = self.build(self.send_next, self.recv_next, FLAG_ACK, &chunk);
            network.send(segment.clone(), self.quad.remote_addr);

            self.retransmit.push(Record {
                seq: self.send_next,
                seq_len: chunk_len as u32,
                segment,
                dest_addr: self.quad.remote_addr,
                sent_at: Some(now),
            });
            self.send_next = self.send_next.wrapping_add(chunk_len as u32);

            if !self.retransmit.timer_running() {
                self.retransmit.arm_timer(now, self.rtt.rto());
            }
        }
    }

    /// Enqueues application bytes for reliable delivery, splitting them
    /// into MSS-sized chunks (spec §4.3 Send path).
    pub fn send(&mut self, data: &[u8], now: Instant, network: &mut dyn NetworkLayer) {
        self.backlog.extend(data.iter().copied());
        self.pump(now, network);
    }

    /// Initiates local close: sends FIN+ACK and awaits its acknowledgment
    /// through the normal retransmit path.
    pub fn close(&mut self, now: Instant, network: &mut dyn NetworkLayer) {
        let segment = self.build(self.send_next, self.recv_next, FLAG_FIN | FLAG_ACK, &[]);
        network.send(segment.clone(), self.quad.remote_addr);

        self.retransmit.push(Record {
            seq: self.send_next,
            seq_len: 1,
            segment,
            dest_addr: self.quad.remote_addr,
            sent_at: Some(now),
        });
        self.send_next = self.send_next.wrapping_add(1);

        if !self.retransmit.timer_running() {
            self.retransmit.arm_timer(now, self.rtt.rto());
        }
    }

    /// Handles one segment already demultiplexed to this connection.
    pub(crate) fn on_segment(
        &mut self,
        header: &Header,
        payload: &[u8],
        now: Instant,
        network: &mut dyn NetworkLayer,
    ) -> ConnAction {
        if header.ack_set() {
            self.on_ack(header.ack, payload.is_empty(), now, network);
        }

        if !payload.is_empty() {
            if header.seq != self.recv_next {
                tracing::debug!(
                    quad = ?self.quad,
                    expected = self.recv_next,
                    got = header.seq,
                    "dropping out-of-order segment"
                );
                self.send_pure_ack(network);
            } else {
                self.invoke_receiver(payload, network);
                self.recv_next = self.recv_next.wrapping_add(payload.len() as u32);
                self.send_pure_ack(network);
            }
        }

        if header.fin() {
            self.recv_next = self.recv_next.wrapping_add(1);
            self.send_pure_ack(network);
            self.state = State::CloseWait;
            self.invoke_receiver(&[], network);
            self.state = State::Closed;
            return ConnAction::Remove;
        }

        ConnAction::Continue
    }

    fn on_ack(&mut self, ack: u32, payload_empty: bool, now: Instant, network: &mut dyn NetworkLayer) {
        if crate::seq::wrapping_lt(self.send_unack, ack) {
            self.send_unack = ack;
            let drained = self.retransmit.drain_through(ack);
            let acked_bytes: u32 = drained.iter().map(|r| r.seq_len).sum();

            if let Some(sample) = drained.iter().rev().find_map(|r| r.sent_at) {
                self.rtt.sample(now.duration_since(sample));
            }

            if self.retransmit.is_empty() {
                self.retransmit.cancel_timer();
            } else {
                self.retransmit.arm_timer(now, self.rtt.rto());
            }

            self.cwnd.on_new_ack(acked_bytes);
            self.pump(now, network);
        } else if payload_empty && ack == self.send_unack {
            if self.cwnd.on_duplicate_ack() {
                if let Some(record) = self.retransmit.retransmit_head() {
                    tracing::debug!(quad = ?self.quad, seq = record.seq, "fast retransmit on triple duplicate ack");
                    network.send(record.segment.clone(), record.dest_addr);
                }
                self.cwnd.on_loss();
                if !self.retransmit.is_empty() {
                    self.retransmit.arm_timer(now, self.rtt.rto());
                }
            }
        }
    }

    /// Called periodically by the server; retransmits head-of-queue if the
    /// retransmission timer has expired.
    pub(crate) fn on_tick(&mut self, now: Instant, network: &mut dyn NetworkLayer) {
        if !self.retransmit.is_timer_expired(now) {
            return;
        }

        match self.retransmit.retransmit_head() {
            Some(record) => {
                tracing::debug!(quad = ?self.quad, seq = record.seq, "retransmitting after rto expiry");
                network.send(record.segment.clone(), record.dest_addr);
                self.cwnd.on_loss();
                self.retransmit.arm_timer(now, self.rtt.rto());
            }
            None => {
                tracing::error!(quad = ?self.quad, "retransmission timer fired on an empty queue");
                self.retransmit.cancel_timer();
            }
        }

        self.pump(now, network);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("quad", &self.quad)
            .field("state", &self.state)
            .field("send_next", &self.send_next)
            .field("send_unack", &self.send_unack)
            .field("recv_next", &self.recv_next)
            .field("cwnd", &self.cwnd.bytes())
            .finish()
    }
}
