//! Handshake and transport counters.
//!
//! Counters use `AtomicU64` because the two directions of a secured
//! duplex, and many channels sharing one sink, update them concurrently.
//! `render()` emits Prometheus text format under the conventional names.

use std::sync::atomic::{AtomicU64, Ordering};

/// Five counters covering the life of a secure channel.
#[derive(Default)]
pub struct NoiseMetrics {
    handshake_successes: AtomicU64,
    handshake_errors: AtomicU64,
    encrypted_packets: AtomicU64,
    decrypted_packets: AtomicU64,
    decrypt_errors: AtomicU64,
}

impl NoiseMetrics {
    /// Creates a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_handshake_success(&self) {
        self.handshake_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handshake_error(&self) {
        self.handshake_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_encrypted_packet(&self) {
        self.encrypted_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decrypted_packet(&self) {
        self.decrypted_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decrypt_error(&self) {
        self.decrypt_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful handshakes.
    pub fn handshake_successes(&self) -> u64 {
        self.handshake_successes.load(Ordering::Relaxed)
    }

    /// Failed handshakes.
    pub fn handshake_errors(&self) -> u64 {
        self.handshake_errors.load(Ordering::Relaxed)
    }

    /// Transport records sealed.
    pub fn encrypted_packets(&self) -> u64 {
        self.encrypted_packets.load(Ordering::Relaxed)
    }

    /// Transport records opened.
    pub fn decrypted_packets(&self) -> u64 {
        self.decrypted_packets.load(Ordering::Relaxed)
    }

    /// Transport records that failed AEAD verification.
    pub fn decrypt_errors(&self) -> u64 {
        self.decrypt_errors.load(Ordering::Relaxed)
    }

    /// Renders all counters in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(512);
        for (name, value) in [
            (
                "libp2p_noise_xxhandshake_successes_total",
                self.handshake_successes(),
            ),
            (
                "libp2p_noise_xxhandshake_error_total",
                self.handshake_errors(),
            ),
            (
                "libp2p_noise_encrypted_packets_total",
                self.encrypted_packets(),
            ),
            (
                "libp2p_noise_decrypted_packets_total",
                self.decrypted_packets(),
            ),
            ("libp2p_noise_decrypt_errors_total", self.decrypt_errors()),
        ] {
            out.push_str("# TYPE ");
            out.push_str(name);
            out.push_str(" counter\n");
            out.push_str(name);
            out.push(' ');
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }
}
