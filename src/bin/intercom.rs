//! Intercom voice client
//!
//! Captures the microphone, sends it to the configured peer over UDP and
//! plays back whatever the peer sends.
//!
//! Usage: `intercom [peer-address] [config-path]`

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intercom_voice::{
    audio::list_devices,
    config::AppConfig,
    constants::MAX_DATAGRAM_SIZE,
    engine::{AudioEngine, CpalBackend},
    network::{create_socket, UdpTransport},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting intercom voice client");

    let peer_arg = std::env::args().nth(1);
    let config_path = std::env::args().nth(2).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref());

    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let peer: SocketAddr = peer_arg
        .or_else(|| config.network.peer.clone())
        .unwrap_or_else(|| format!("127.0.0.1:{}", config.network.udp_port))
        .parse()
        .context("Invalid peer address")?;

    let socket = create_socket(&config.network)?;
    let recv_socket = tokio::net::UdpSocket::from_std({
        let clone = socket.try_clone()?;
        clone.set_nonblocking(true)?;
        clone
    })?;
    let transport = Arc::new(UdpTransport::new(socket, peer));

    tracing::info!(
        "Codec {}, jitter target {}ms (auto: {}), peer {}",
        config.engine.codec,
        config.engine.jitter.target_ms,
        config.engine.jitter.auto_adjust,
        peer
    );

    let engine = Arc::new(AudioEngine::new(
        config.engine.clone(),
        Arc::new(CpalBackend::new(config.devices.clone())),
        transport.clone(),
    ));

    // Log events as JSON lines
    let events = engine.subscribe();
    std::thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            for event in events {
                match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!(target: "intercom::events", "{}", json),
                    Err(e) => tracing::warn!("Unserializable event: {}", e),
                }
            }
        })?;

    engine.start().context("Failed to start audio session")?;

    let receiver = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        if from != peer {
                            tracing::trace!("Ignoring datagram from {}", from);
                            continue;
                        }
                        engine.on_receive(&buf[..len]);
                    }
                    Err(e) => {
                        tracing::warn!("Receive error: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    };

    let stats = {
        let engine = engine.clone();
        let transport = transport.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let stats = engine.stats();
                let (packets_sent, bytes_sent, send_errors) = transport.stats();
                if let Some(jitter) = stats.jitter {
                    tracing::info!(
                        "Stats: {} sent ({:.1} KB, {} errors), {} received, {} dropped, {} underruns, target {}ms, state {:?}",
                        packets_sent,
                        bytes_sent as f64 / 1024.0,
                        send_errors,
                        jitter.received,
                        jitter.dropped(),
                        jitter.underruns,
                        jitter.target_ms,
                        jitter.state
                    );
                }
            }
        })
    };

    tracing::info!("Running - press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    receiver.abort();
    stats.abort();
    engine.stop();

    Ok(())
}
