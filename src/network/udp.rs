//! UDP socket setup and datagram transport

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::NetworkConfig;
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::network::Transport;

/// Bind a UDP socket with the configured buffer sizes
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.udp_port)
        .parse()
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", config.bind_address, e)))?;

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    // Buffer sizes are hints; the OS may cap them
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        tracing::warn!("Could not set send buffer size: {}", e);
    }
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!("Could not set receive buffer size: {}", e);
    }

    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    tracing::info!("UDP socket bound to {}", addr);
    Ok(socket.into())
}

/// Sends envelopes as datagrams to a single peer
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn try_send(&self, payload: &[u8]) -> Result<(), NetworkError> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(NetworkError::PacketTooLarge(payload.len()));
        }
        self.socket
            .send_to(payload, self.peer)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// `(packets, bytes, errors)` sent so far
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.packets_sent.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.send_errors.load(Ordering::Relaxed),
        )
    }
}

impl Transport for UdpTransport {
    fn send(&self, payload: Bytes) {
        match self.try_send(&payload) {
            Ok(()) => {
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(payload.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                // Log the first failure and then sparsely
                let errors = self.send_errors.fetch_add(1, Ordering::Relaxed);
                if errors % 500 == 0 {
                    tracing::warn!(errors = errors + 1, "Failed to send audio packet: {}", e);
                }
            }
        }
    }
}
