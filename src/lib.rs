//! # Intercom Voice
//!
//! Real-time voice pipeline for an intercom client: microphone capture,
//! encoding, transmission over an unreliable channel and smooth playback
//! reconstructed by an adaptive jitter buffer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── CAPTURE PATH ───────────────────────────────┐
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────────────┐    │
//! │  │ Microphone │──▶│  Format    │──▶│ Gain Stage │──▶│ Opus (960 accum) │    │
//! │  │ (hw rate)  │   │ Converter  │   │ + meter    │   │ or PCM 8/12/16   │    │
//! │  └────────────┘   └────────────┘   └────────────┘   └────────┬─────────┘    │
//! │                                                              │ base64       │
//! │                                                              ▼              │
//! │                                                      ┌──────────────┐       │
//! │                                                      │  Transport   │       │
//! │                                                      └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────── PLAYBACK PATH ──────────────────────────────┐
//! │  ┌──────────────┐   ┌──────────────────────────────────┐                    │
//! │  │  Transport   │──▶│  Jitter Buffer (single lock)     │                    │
//! │  └──────────────┘   │  Idle ─▶ Buffering ─▶ Playing    │                    │
//! │                     │  overflow / look-ahead / policy  │                    │
//! │                     └────────────────┬─────────────────┘                    │
//! │                                      │ ordered dispatch (lock released)     │
//! │                                      ▼                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────────┐      │
//! │  │ Decode     │──▶│ Volume     │──▶│  Format    │──▶│ Playback Sink  │      │
//! │  │ Opus / PCM │   │            │   │ Converter  │   │ (completion cb)│      │
//! │  └────────────┘   └────────────┘   └────────────┘   └───────┬────────┘      │
//! │                                                             │               │
//! │                    completion ─────────────────────────────-┘               │
//! │                    (re-enters the jitter buffer)                            │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod jitter;
pub mod network;
pub mod protocol;

pub use engine::AudioEngine;
pub use error::{Error, Result};
pub use events::AudioEvent;

/// Application-wide constants
pub mod constants {
    /// Sample rate shared by the network and processing formats
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Channel count of the network and processing formats (mono)
    pub const CHANNELS: u16 = 1;

    /// Opus frame duration in milliseconds
    pub const FRAME_DURATION_MS: u32 = 20;

    /// Samples per Opus frame (20ms at 48kHz)
    pub const FRAME_SIZE: usize = 960;

    /// Largest packet libopus can produce for a single frame
    pub const MAX_OPUS_PACKET: usize = 4000;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 32_000;

    /// Lower jitter target bound in milliseconds
    pub const MIN_JITTER_MS: u32 = 40;

    /// Upper jitter target bound in milliseconds
    pub const MAX_JITTER_MS: u32 = 500;

    /// Default jitter target in milliseconds
    pub const DEFAULT_JITTER_MS: u32 = 100;

    /// Interval of the scheduler evaluation tick
    pub const TICK_INTERVAL_MS: u64 = 20;

    /// Default UDP port for voice packets
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// Largest UDP payload; raw PCM capture buffers can exceed the MTU
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;
}
