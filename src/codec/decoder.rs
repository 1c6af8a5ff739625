//! Opus decoder wrapper

use opus::{Channels, Decoder};

use crate::constants::{FRAME_SIZE, SAMPLE_RATE};
use crate::error::CodecError;

/// Largest frame a single Opus packet can carry (120ms at 48kHz)
const MAX_FRAME_SAMPLES: usize = SAMPLE_RATE as usize * 120 / 1000;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    /// Packets the decoder rejected
    frames_failed: u64,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new(SAMPLE_RATE, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            decode_buffer: vec![0i16; MAX_FRAME_SAMPLES],
            frames_decoded: 0,
            frames_failed: 0,
        })
    }

    /// Decode one packet to mono 16-bit samples
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        let samples = match self.decoder.decode(data, &mut self.decode_buffer, false) {
            Ok(samples) => samples,
            Err(e) => {
                self.frames_failed += 1;
                return Err(CodecError::DecodingFailed(e.to_string()));
            }
        };

        self.frames_decoded += 1;
        Ok(self.decode_buffer[..samples].to_vec())
    }

    /// Reset decoder state
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    /// Nominal samples per decoded frame
    pub fn frame_size(&self) -> usize {
        FRAME_SIZE
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_failed: self.frames_failed,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_failed: u64,
}
