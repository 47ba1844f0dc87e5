//! Runtime-tunable knobs layered on top of the fixed wire constants in
//! [`crate::codec`]. Grouped in a plain struct constructed with [`Default`]
//! rather than loaded from a file: nothing at this layer has a use for a
//! configuration file or environment variables, only for numbers a test
//! wants to pin down.

use std::time::Duration;

/// Chooses the initial sequence number a new [`crate::connection::Connection`]
/// starts from. The spec leaves this unconstrained (§9 Open Questions):
/// deterministic is useful for tests, random is the production default.
#[derive(Debug, Clone, Copy)]
pub enum IssPolicy {
    /// Always return the same value. Intended for tests and reproducible
    /// demos, never for a production listener shared by untrusted peers.
    Fixed(u32),
    /// Draw a fresh value from the OS RNG for every handshake.
    Random,
}

impl Default for IssPolicy {
    fn default() -> Self {
        IssPolicy::Random
    }
}

/// Per-server / per-connection tunables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum payload bytes per segment. Defaults to [`crate::codec::MSS`].
    pub mss: usize,
    /// RTO before any RTT sample has been taken.
    pub initial_rto: Duration,
    /// Floor applied to the RTO after every recomputation, so a single fast
    /// sample can't collapse it to an unusably small value.
    pub min_rto: Duration,
    /// Ceiling applied to the RTO, so sustained loss can't grow it without
    /// bound.
    pub max_rto: Duration,
    /// Consecutive duplicate ACKs required to trigger the fast
    /// retransmit/halve action (spec §4.3).
    pub dup_ack_threshold: u32,
    /// How initial sequence numbers are chosen.
    pub iss_policy: IssPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mss: crate::codec::MSS,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(60),
            dup_ack_threshold: 3,
            iss_policy: IssPolicy::default(),
        }
    }
}

impl Config {
    /// A config with a fixed ISS, convenient for deterministic tests and
    /// demos that want to assert on exact sequence numbers.
    pub fn with_fixed_iss(iss: u32) -> Self {
        Config {
            iss_policy: IssPolicy::Fixed(iss),
            ..Config::default()
        }
    }

    pub(crate) fn next_iss(&self) -> u32 {
        match self.iss_policy {
            IssPolicy::Fixed(iss) => iss,
            IssPolicy::Random => rand::random(),
        }
    }
}
