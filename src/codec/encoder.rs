//! Opus encoder wrapper
//!
//! Fixed operating point: 48kHz mono, 20ms frames, VOIP application.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::config::OpusConfig;
use crate::constants::{FRAME_SIZE, MAX_OPUS_PACKET, SAMPLE_RATE};
use crate::error::CodecError;

/// Opus encoder configured for voice
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create a new voice encoder with the specified configuration
    pub fn new(config: OpusConfig) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, &config)?;

        Ok(Self {
            encoder,
            config,
            encode_buffer: vec![0u8; MAX_OPUS_PACKET],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &OpusConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        Ok(())
    }

    /// Encode exactly one 960-sample frame
    pub fn encode(&mut self, frame: &[i16]) -> Result<Bytes, CodecError> {
        if frame.len() != FRAME_SIZE {
            return Err(CodecError::InvalidFrameSize(frame.len()));
        }

        let size = self
            .encoder
            .encode(frame, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    /// Update bitrate on the live encoder
    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<(), CodecError> {
        self.encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        self.config.bitrate = bitrate;
        Ok(())
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        assert_eq!(encoder.config().bitrate, 32_000);
    }

    #[test]
    fn test_encoding_silence() {
        let mut encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        let encoded = encoder.encode(&[0i16; FRAME_SIZE]).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.len() < FRAME_SIZE * 2);
        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn test_rejects_partial_frame() {
        let mut encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        assert!(matches!(
            encoder.encode(&[0i16; 480]),
            Err(CodecError::InvalidFrameSize(480))
        ));
    }

    #[test]
    fn test_bitrate_update() {
        let mut encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        encoder.set_bitrate(64_000).unwrap();
        assert_eq!(encoder.config().bitrate, 64_000);
    }
}
