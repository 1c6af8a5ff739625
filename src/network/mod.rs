//! Network subsystem for the audio-data transport
//!
//! The engine only needs an outbound `send`; inbound datagrams are fed to
//! [`crate::AudioEngine::on_receive`] by whoever owns the socket.

pub mod udp;

use bytes::Bytes;

pub use udp::{create_socket, UdpTransport};

/// Outbound message channel for encoded audio envelopes
pub trait Transport: Send + Sync {
    /// Send one envelope. Failures are the transport's to log; the capture
    /// path never blocks or retries.
    fn send(&self, payload: Bytes);
}
