//! Configuration structs, defaults and TOML persistence
//!
//! Every struct is `Serialize + Deserialize + Default + Clone` and marked
//! `#[serde(default)]`, so a partial file on disk fills the gaps with
//! defaults. Values read from disk or set at runtime pass through
//! [`EngineConfig::validated`] before they reach the pipeline.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::CodecMode;
use crate::constants::{DEFAULT_BITRATE, DEFAULT_JITTER_MS, DEFAULT_UDP_PORT, MAX_JITTER_MS, MIN_JITTER_MS};
use crate::error::{Error, Result};

/// Opus bitrate bounds accepted by libopus
pub const MIN_BITRATE: u32 = 6_000;
pub const MAX_BITRATE: u32 = 510_000;

/// Largest accepted mic gain / playback volume multiplier
pub const MAX_GAIN: f32 = 8.0;

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    pub devices: DeviceConfig,
}

impl AppConfig {
    /// Platform config location, e.g. `~/.config/intercom-voice/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "OpenIntercom", "intercom-voice")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut config: AppConfig =
            toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.engine = config.engine.validated();
        Ok(config)
    }

    /// Load `path` (or the default location), falling back to defaults when
    /// the file is missing or unreadable
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Self::default(),
        };

        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring config: {}", e);
                Self::default()
            }
        }
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Options recognized by the audio engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Payload codec on the wire
    pub codec: CodecMode,
    /// Opus target bitrate in bits per second
    pub opus_bitrate_bps: u32,
    /// Microphone gain multiplier
    pub mic_gain: f32,
    /// Playback volume multiplier
    pub playback_volume: f32,
    /// Jitter buffer tuning
    pub jitter: JitterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            codec: CodecMode::Opus,
            opus_bitrate_bps: DEFAULT_BITRATE,
            mic_gain: 1.0,
            playback_volume: 2.0,
            jitter: JitterConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp every value into its accepted range
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        self.opus_bitrate_bps = self.opus_bitrate_bps.clamp(MIN_BITRATE, MAX_BITRATE);
        self.mic_gain = validate_gain(self.mic_gain).unwrap_or(defaults.mic_gain);
        self.playback_volume = validate_gain(self.playback_volume).unwrap_or(defaults.playback_volume);
        self.jitter = self.jitter.validated();
        self
    }

    /// Encoder settings derived from this config
    pub fn opus_config(&self) -> OpusConfig {
        OpusConfig {
            bitrate: self.opus_bitrate_bps,
            ..OpusConfig::default()
        }
    }
}

/// Clamp a gain multiplier to `[0, MAX_GAIN]`; non-finite values are rejected
pub fn validate_gain(gain: f32) -> Option<f32> {
    if gain.is_finite() {
        Some(gain.clamp(0.0, MAX_GAIN))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// JitterConfig
// ---------------------------------------------------------------------------

/// Auto-adjust strategy of the jitter buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentStrategy {
    /// Grow on underrun, shrink slowly after a stable period
    #[default]
    Reactive,
    /// Grow or shrink from the spread of packet inter-arrival times
    Variance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Initial target delay in milliseconds
    pub target_ms: u32,
    /// Let the adjustment policy move the target
    pub auto_adjust: bool,
    pub adjustment: AdjustmentStrategy,
    /// Queue duration above `target * overflow_factor` triggers trimming
    pub overflow_factor: f32,
    /// Packets never trimmed by the overflow policy
    pub min_retained: usize,
    /// Maximum buffers in flight at the sink
    pub max_scheduled: usize,
    /// Unscheduled packets kept while the sink is at `max_scheduled`
    pub lookahead_reserve: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            target_ms: DEFAULT_JITTER_MS,
            auto_adjust: true,
            adjustment: AdjustmentStrategy::Reactive,
            overflow_factor: 2.0,
            min_retained: 3,
            max_scheduled: 5,
            lookahead_reserve: 3,
        }
    }
}

impl JitterConfig {
    pub fn validated(mut self) -> Self {
        self.target_ms = clamp_target_ms(self.target_ms);
        self.overflow_factor = if self.overflow_factor.is_finite() {
            self.overflow_factor.clamp(1.5, 2.0)
        } else {
            2.0
        };
        self.min_retained = self.min_retained.max(1);
        self.max_scheduled = self.max_scheduled.max(1);
        self
    }
}

/// Clamp a requested target delay to `[MIN_JITTER_MS, MAX_JITTER_MS]`
pub fn clamp_target_ms(ms: u32) -> u32 {
    ms.clamp(MIN_JITTER_MS, MAX_JITTER_MS)
}

// ---------------------------------------------------------------------------
// OpusConfig
// ---------------------------------------------------------------------------

/// Bitrate presets offered to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitratePreset {
    Eco,
    Normal,
    Quality,
}

impl BitratePreset {
    pub fn bitrate(self) -> u32 {
        match self {
            BitratePreset::Eco => 16_000,
            BitratePreset::Normal => 32_000,
            BitratePreset::Quality => 64_000,
        }
    }
}

/// Opus encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    pub bitrate: u32,
    pub vbr: bool,
    /// In-band forward error correction
    pub fec: bool,
    /// Expected packet loss percentage (used with FEC)
    pub packet_loss_perc: u8,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            vbr: true,
            fec: false,
            packet_loss_perc: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Network / devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub udp_port: u16,
    /// Remote intercom endpoint, `host:port`
    pub peer: Option<String>,
    /// Socket buffer sizes in bytes
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            udp_port: DEFAULT_UDP_PORT,
            peer: None,
            send_buffer_size: 256 * 1024,
            recv_buffer_size: 256 * 1024,
        }
    }
}

/// Audio device selection; `None` means the system default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}
