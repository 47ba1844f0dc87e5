//! A scripted echo server: accepts one connection, echoes every chunk of
//! data it receives, and closes the connection once the peer sends a FIN.
//!
//! There is no real network device backing this binary (unlike the
//! original TUN-based demo this crate grew out of): it drives the server
//! with a `LoopbackNetwork` and feeds it a hand-built sequence of segments
//! standing in for a client, printing what the server would have put on
//! the wire at each step.

use std::net::Ipv4Addr;
use std::time::Instant;

use tinytcp::network::LoopbackNetwork;
use tinytcp::{codec, Config, Quad, Server};

const SERVER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 10, 10, 10);
const CLIENT_ADDR: Ipv4Addr = Ipv4Addr::new(10, 10, 10, 20);
const SERVER_PORT: u16 = 9090;
const CLIENT_PORT: u16 = 40000;

fn client_segment(seq: u32, ack: u32, flags: u16, payload: &[u8]) -> Vec<u8> {
    codec::build_segment(
        CLIENT_PORT,
        SERVER_PORT,
        seq,
        ack,
        flags,
        payload,
        CLIENT_ADDR,
        SERVER_ADDR,
    )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut server = Server::with_config(
        Box::new(LoopbackNetwork::new()),
        SERVER_PORT,
        Config::with_fixed_iss(1000),
    );

    server.register_accept_monitor(Box::new(|conn, _network| {
        println!(">>> connection accepted from {:?}", conn.quad());
        conn.register_receiver(Box::new(|conn, payload, network| {
            if payload.is_empty() {
                println!(">>> peer closed their side");
                return;
            }
            println!(">>> received {} bytes, echoing", payload.len());
            conn.send(payload, Instant::now(), network);
        }));
    }));

    let quad = Quad {
        remote_addr: CLIENT_ADDR,
        remote_port: CLIENT_PORT,
        local_addr: SERVER_ADDR,
        local_port: SERVER_PORT,
    };

    let now = Instant::now();
    println!(">>> waiting for incoming connection...");
    server
        .receive(
            &CLIENT_ADDR.to_string(),
            &SERVER_ADDR.to_string(),
            &client_segment(1000, 0, codec::FLAG_SYN, &[]),
            now,
        )
        .expect("valid segment");

    server
        .receive(
            &CLIENT_ADDR.to_string(),
            &SERVER_ADDR.to_string(),
            &client_segment(1001, 1001, codec::FLAG_ACK, &[]),
            now,
        )
        .expect("valid segment");

    server
        .receive(
            &CLIENT_ADDR.to_string(),
            &SERVER_ADDR.to_string(),
            &client_segment(1001, 1001, codec::FLAG_ACK, b"hello from the client"),
            now,
        )
        .expect("valid segment");

    let echoed_seq = server.connection_mut(&quad).unwrap().send_unack();
    server
        .receive(
            &CLIENT_ADDR.to_string(),
            &SERVER_ADDR.to_string(),
            &client_segment(
                1023,
                echoed_seq.wrapping_add("hello from the client".len() as u32),
                codec::FLAG_ACK,
                &[],
            ),
            now,
        )
        .expect("valid segment");

    server
        .receive(
            &CLIENT_ADDR.to_string(),
            &SERVER_ADDR.to_string(),
            &client_segment(1023, 1001, codec::FLAG_FIN | codec::FLAG_ACK, &[]),
            now,
        )
        .expect("valid segment");

    println!(
        ">>> connections remaining: {}",
        server.connection_count()
    );
}
