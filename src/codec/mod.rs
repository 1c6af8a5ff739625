//! Voice codecs
//!
//! Two families share the wire: Opus (compressed, fixed 20ms frames) and
//! raw PCM reduced to 8, 12 or 16 bits per sample for bandwidth control
//! when compression is disabled.

pub mod context;
pub mod decoder;
pub mod encoder;
pub mod pcm;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{CHANNELS, FRAME_DURATION_MS, SAMPLE_RATE};
use crate::error::Error;

pub use context::CodecContext;
pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;

/// Payload representation carried by audio packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecMode {
    #[default]
    Opus,
    Pcm8,
    Pcm12,
    Pcm16,
}

impl CodecMode {
    pub fn is_compressed(self) -> bool {
        matches!(self, CodecMode::Opus)
    }

    /// Bits per sample on the wire, `None` for Opus
    pub fn bits_per_sample(self) -> Option<u32> {
        match self {
            CodecMode::Opus => None,
            CodecMode::Pcm8 => Some(8),
            CodecMode::Pcm12 => Some(12),
            CodecMode::Pcm16 => Some(16),
        }
    }

    /// Playback duration of `packets` packets totalling `bytes` bytes.
    ///
    /// Opus packets are counted as one nominal frame each instead of being
    /// decoded; raw PCM durations are exact.
    pub fn duration_ms(self, packets: usize, bytes: usize) -> u32 {
        match self.bits_per_sample() {
            None => packets as u32 * FRAME_DURATION_MS,
            Some(bits) => {
                let bits_per_second = SAMPLE_RATE as u64 * CHANNELS as u64 * bits as u64;
                (bytes as u64 * 8 * 1000 / bits_per_second) as u32
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodecMode::Opus => "opus",
            CodecMode::Pcm8 => "pcm8",
            CodecMode::Pcm12 => "pcm12",
            CodecMode::Pcm16 => "pcm16",
        }
    }
}

impl fmt::Display for CodecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opus" => Ok(CodecMode::Opus),
            "pcm8" => Ok(CodecMode::Pcm8),
            "pcm12" => Ok(CodecMode::Pcm12),
            "pcm16" | "pcm" => Ok(CodecMode::Pcm16),
            other => Err(Error::Config(format!("Unknown codec: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_duration_is_per_packet() {
        assert_eq!(CodecMode::Opus.duration_ms(5, 123), 100);
        assert_eq!(CodecMode::Opus.duration_ms(0, 0), 0);
    }

    #[test]
    fn test_pcm_duration_from_bytes() {
        // 20ms at 48kHz mono = 960 samples
        assert_eq!(CodecMode::Pcm16.duration_ms(1, 1920), 20);
        assert_eq!(CodecMode::Pcm8.duration_ms(1, 960), 20);
        assert_eq!(CodecMode::Pcm12.duration_ms(1, 1440), 20);
        assert_eq!(CodecMode::Pcm16.duration_ms(3, 3 * 1920), 60);
    }

    #[test]
    fn test_parse_codec() {
        assert_eq!("opus".parse::<CodecMode>().unwrap(), CodecMode::Opus);
        assert_eq!("PCM12".parse::<CodecMode>().unwrap(), CodecMode::Pcm12);
        assert!("mp3".parse::<CodecMode>().is_err());
    }
}
