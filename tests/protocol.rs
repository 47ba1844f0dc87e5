//! End-to-end scenarios driving `Server`/`Connection` purely through their
//! public API, each with its own explicit `Instant` in place of a real
//! clock and a `LoopbackNetwork` in place of a real socket.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tinytcp::network::LoopbackNetwork;
use tinytcp::{codec, Config, Quad, Server};

const CLIENT_ADDR: &str = "10.0.0.2";
const SERVER_ADDR: &str = "10.0.0.1";
const CLIENT_PORT: u16 = 4000;
const SERVER_PORT: u16 = 9090;

fn client_quad() -> Quad {
    Quad {
        remote_addr: CLIENT_ADDR.parse().unwrap(),
        remote_port: CLIENT_PORT,
        local_addr: SERVER_ADDR.parse().unwrap(),
        local_port: SERVER_PORT,
    }
}

fn client_segment(seq: u32, ack: u32, flags: u16, payload: &[u8]) -> Vec<u8> {
    codec::build_segment(
        CLIENT_PORT,
        SERVER_PORT,
        seq,
        ack,
        flags,
        payload,
        CLIENT_ADDR.parse().unwrap(),
        SERVER_ADDR.parse().unwrap(),
    )
}

fn server_with_fixed_iss(iss: u32) -> Server {
    Server::with_config(
        Box::new(LoopbackNetwork::new()),
        SERVER_PORT,
        Config::with_fixed_iss(iss),
    )
}

/// Like [`server_with_fixed_iss`], but keeps a handle on the
/// [`LoopbackNetwork`] so the test can inspect exactly what was put on the
/// wire after `Server` has taken ownership of it.
fn server_with_shared_network(iss: u32) -> (Server, Rc<RefCell<LoopbackNetwork>>) {
    let net = Rc::new(RefCell::new(LoopbackNetwork::new()));
    let server = Server::with_config(
        Box::new(net.clone()),
        SERVER_PORT,
        Config::with_fixed_iss(iss),
    );
    (server, net)
}

/// client SYN {seq=1000}; server emits SYN+ACK {seq=iss, ack=1001}; after
/// the client's ACK {seq=1001, ack=iss+1} the connection is established
/// with recv_next=1001, send_unack=send_next=iss+1 (spec §8 "Handshake").
#[test]
fn handshake_establishes_one_connection_with_expected_sequence_state() {
    let mut server = server_with_fixed_iss(500);
    let now = Instant::now();

    server
        .receive(
            CLIENT_ADDR,
            SERVER_ADDR,
            &client_segment(1000, 0, codec::FLAG_SYN, &[]),
            now,
        )
        .unwrap();
    assert_eq!(server.connection_count(), 1);
    assert!(server.has_connection(&client_quad()));
    assert_eq!(server.connection_mut(&client_quad()).unwrap().recv_next(), 1001);

    server
        .receive(
            CLIENT_ADDR,
            SERVER_ADDR,
            &client_segment(1001, 501, codec::FLAG_ACK, &[]),
            now,
        )
        .unwrap();

    let conn = server.connection_mut(&client_quad()).unwrap();
    assert_eq!(conn.recv_next(), 1001);
    assert_eq!(conn.send_unack(), 501);
    assert_eq!(conn.send_next(), 501);
}

fn establish(server: &mut Server, now: Instant) {
    server
        .receive(
            CLIENT_ADDR,
            SERVER_ADDR,
            &client_segment(0, 0, codec::FLAG_SYN, &[]),
            now,
        )
        .unwrap();
    server
        .receive(
            CLIENT_ADDR,
            SERVER_ADDR,
            &client_segment(1, 1, codec::FLAG_ACK, &[]),
            now,
        )
        .unwrap();
}

/// Bytes delivered to the receiver callback appear exactly once and in
/// order; a segment that repeats an already-consumed sequence number (here,
/// a retransmitted duplicate) is dropped rather than delivered twice.
#[test]
fn in_order_data_is_delivered_once_each() {
    let mut server = server_with_fixed_iss(0);
    let delivered: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let delivered_clone = delivered.clone();
    server.register_accept_monitor(Box::new(move |conn, _net| {
        let delivered = delivered_clone.clone();
        conn.register_receiver(Box::new(move |_conn, payload, _net| {
            delivered.lock().unwrap().extend_from_slice(payload);
        }));
    }));
    let now = Instant::now();
    establish(&mut server, now);

    let data = client_segment(1, 1, codec::FLAG_ACK, b"hello");
    server.receive(CLIENT_ADDR, SERVER_ADDR, &data, now).unwrap();
    assert_eq!(&delivered.lock().unwrap()[..], b"hello");

    // Same segment arrives again (the client never saw our ACK); recv_next
    // has already moved past this sequence number, so it is dropped.
    server.receive(CLIENT_ADDR, SERVER_ADDR, &data, now).unwrap();
    assert_eq!(&delivered.lock().unwrap()[..], b"hello");
}

/// A segment whose sequence number leaves a gap before `recv_next` is
/// dropped, not buffered or delivered out of order.
#[test]
fn gapped_segment_is_dropped() {
    let mut server = server_with_fixed_iss(0);
    let delivered = Arc::new(Mutex::new(Vec::<u8>::new()));
    let delivered_clone = delivered.clone();
    server.register_accept_monitor(Box::new(move |conn, _net| {
        let delivered = delivered_clone.clone();
        conn.register_receiver(Box::new(move |_conn, payload, _net| {
            delivered.lock().unwrap().extend_from_slice(payload);
        }));
    }));
    let now = Instant::now();
    establish(&mut server, now);

    let gapped = client_segment(100, 1, codec::FLAG_ACK, b"oops");
    server.receive(CLIENT_ADDR, SERVER_ADDR, &gapped, now).unwrap();

    assert!(delivered.lock().unwrap().is_empty());
}

/// An echo service wired through `register_receiver` calling back into
/// `Server::send` bounces application bytes straight back, demonstrating
/// the send path end to end (no assertion hook is needed beyond the
/// absence of a panic and the connection surviving the round trip).
#[test]
fn echo_handler_can_send_from_inside_the_receiver_callback() {
    let mut server = server_with_fixed_iss(0);
    let quad = client_quad();
    server.register_accept_monitor(Box::new(|conn, _net| {
        conn.register_receiver(Box::new(|conn, payload, network| {
            if !payload.is_empty() {
                conn.send(payload, Instant::now(), network);
            }
        }));
    }));
    let now = Instant::now();
    establish(&mut server, now);

    let data = client_segment(1, 1, codec::FLAG_ACK, b"ping");
    server.receive(CLIENT_ADDR, SERVER_ADDR, &data, now).unwrap();

    let conn = server.connection_mut(&quad).unwrap();
    assert_eq!(conn.send_next(), 1 + "ping".len() as u32);
}

/// Data handed to an established connection via `Server::send` that
/// exceeds the current congestion window is held back; once the RTO fires
/// with no ACK, the head-of-queue segment is retransmitted byte-identical
/// to the original and the window is halved (spec §8 Property 5).
#[test]
fn unacked_data_is_retransmitted_after_timeout_and_halves_cwnd() {
    let (mut server, net) = server_with_shared_network(0);
    let quad = client_quad();
    let now = Instant::now();
    establish(&mut server, now);

    let cwnd_before = server.connection_mut(&quad).unwrap().cwnd_bytes();
    server.send(&quad, b"unacked application payload", now).unwrap();
    let original = net.borrow().sent.last().unwrap().0.clone();

    let later = now + Duration::from_secs(2);
    server.on_tick(later);

    let conn = server.connection_mut(&quad).unwrap();
    assert!(conn.cwnd_bytes() < cwnd_before, "cwnd must shrink on timeout");

    let retransmitted = net.borrow().sent.last().unwrap().0.clone();
    assert_eq!(
        retransmitted, original,
        "retransmitted segment must be byte-identical to the original"
    );
}

/// After a cumulative ACK for `A` drains the queue, `send_unack == A` and
/// nothing is re-emitted on the next timer tick, since the queue it would
/// have retransmitted from is now empty (spec §8 Property 4).
#[test]
fn cumulative_ack_drains_queue_and_suppresses_further_retransmission() {
    let (mut server, net) = server_with_shared_network(0);
    let quad = client_quad();
    let now = Instant::now();
    establish(&mut server, now);

    server.send(&quad, b"payload to be fully acked", now).unwrap();
    let send_next = server.connection_mut(&quad).unwrap().send_next();

    let ack = client_segment(1, send_next, codec::FLAG_ACK, &[]);
    server.receive(CLIENT_ADDR, SERVER_ADDR, &ack, now).unwrap();

    assert_eq!(server.connection_mut(&quad).unwrap().send_unack(), send_next);

    let sent_before = net.borrow().sent.len();
    server.on_tick(now + Duration::from_secs(10));
    assert_eq!(
        net.borrow().sent.len(),
        sent_before,
        "a drained queue must not retransmit on the next tick"
    );
}

/// Karn's rule (spec §3, §4.3, §8 Property 6): a retransmitted segment has
/// its `sent_at` cleared, so the ACK that eventually drains it must not be
/// turned into an RTT sample. Here the gap between the forced retransmit
/// and its ACK is far larger than the real RTT would ever be; if it were
/// sampled, `rto` would balloon well past its pre-retransmit value.
#[test]
fn karns_rule_suppresses_rtt_sample_on_retransmitted_segment() {
    let (mut server, net) = server_with_shared_network(0);
    let quad = client_quad();
    let now = Instant::now();
    establish(&mut server, now);

    server.send(&quad, b"karn's rule payload", now).unwrap();
    let rto_before_retransmit = server.connection_mut(&quad).unwrap().rto();
    let sent_before_retransmit = net.borrow().sent.len();

    // Force a retransmit: the head-of-queue record's `sent_at` is cleared
    // (retransmit.rs's `retransmit_head`), disqualifying it as an RTT
    // sample per Karn's rule.
    let after_rto = now + rto_before_retransmit + Duration::from_millis(1);
    server.on_tick(after_rto);
    assert_eq!(
        net.borrow().sent.len(),
        sent_before_retransmit + 1,
        "the RTO must have fired exactly one retransmission"
    );

    // The draining ACK arrives much later than any genuine RTT, which
    // would massively inflate `rto` if it were sampled.
    let send_next = server.connection_mut(&quad).unwrap().send_next();
    let much_later = after_rto + Duration::from_secs(30);
    let ack = client_segment(1, send_next, codec::FLAG_ACK, &[]);
    server
        .receive(CLIENT_ADDR, SERVER_ADDR, &ack, much_later)
        .unwrap();

    let rto_after_ack = server.connection_mut(&quad).unwrap().rto();
    assert_eq!(
        rto_after_ack, rto_before_retransmit,
        "rto must be unchanged: the retransmitted segment's ACK must not be sampled"
    );
}

/// Three duplicate ACKs for the same unacknowledged byte halve the
/// congestion window without waiting for the retransmission timer.
#[test]
fn triple_duplicate_ack_halves_cwnd_without_waiting_for_timeout() {
    let mut server = server_with_fixed_iss(0);
    let quad = client_quad();
    let now = Instant::now();
    establish(&mut server, now);

    server.send(&quad, b"abc", now).unwrap();
    let send_unack = server.connection_mut(&quad).unwrap().send_unack();
    let cwnd_before = server.connection_mut(&quad).unwrap().cwnd_bytes();

    let dup = client_segment(1, send_unack, codec::FLAG_ACK, &[]);
    for _ in 0..3 {
        server.receive(CLIENT_ADDR, SERVER_ADDR, &dup, now).unwrap();
    }

    let conn = server.connection_mut(&quad).unwrap();
    assert!(conn.cwnd_bytes() < cwnd_before);
}

/// A FIN from the peer drives the connection through half-close to fully
/// closed and the server removes it from its mapping (spec §4.2 teardown,
/// §4.3 FIN handling).
#[test]
fn peer_fin_tears_down_the_connection() {
    let mut server = server_with_fixed_iss(0);
    let now = Instant::now();
    establish(&mut server, now);
    assert_eq!(server.connection_count(), 1);

    let fin = client_segment(1, 1, codec::FLAG_FIN | codec::FLAG_ACK, &[]);
    server.receive(CLIENT_ADDR, SERVER_ADDR, &fin, now).unwrap();

    assert_eq!(server.connection_count(), 0);
}

/// Local close sends a FIN+ACK that consumes one sequence number and rides
/// the ordinary retransmission path like any other outgoing segment.
#[test]
fn local_close_advances_send_next_and_is_retransmitted_like_data() {
    let mut server = server_with_fixed_iss(0);
    let quad = client_quad();
    let now = Instant::now();
    establish(&mut server, now);

    let before = server.connection_mut(&quad).unwrap().send_next();
    server.close_connection(&quad, now).unwrap();
    assert_eq!(server.connection_mut(&quad).unwrap().send_next(), before + 1);

    let cwnd_before = server.connection_mut(&quad).unwrap().cwnd_bytes();
    server.on_tick(now + Duration::from_secs(2));
    assert!(server.connection_mut(&quad).unwrap().cwnd_bytes() < cwnd_before);
}

/// Malformed addresses are reported to the caller; everything else (wrong
/// port, bad checksum, unknown 4-tuple) is silently discarded (spec §7).
#[test]
fn invalid_address_is_reported_as_an_error() {
    let mut server = server_with_fixed_iss(0);
    let result = server.receive("not-an-address", SERVER_ADDR, &[], Instant::now());
    assert!(result.is_err());
}
