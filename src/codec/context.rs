//! Compressed codec resources for one session
//!
//! A `CodecContext` exists only while Opus is the active codec. It is created
//! on session start or when switching to Opus, and dropped on stop or when
//! switching away, so a half-initialized context is never reused.

use bytes::Bytes;

use crate::audio::buffer::FrameAccumulator;
use crate::codec::{OpusDecoder, OpusEncoder};
use crate::config::OpusConfig;
use crate::constants::FRAME_SIZE;
use crate::error::CodecError;

pub struct CodecContext {
    encoder: OpusEncoder,
    decoder: OpusDecoder,
    accumulator: FrameAccumulator,
}

impl CodecContext {
    pub fn new(config: OpusConfig) -> Result<Self, CodecError> {
        let encoder = OpusEncoder::new(config)?;
        let decoder = OpusDecoder::new()?;

        tracing::debug!(bitrate = encoder.config().bitrate, "Opus codec context created");

        Ok(Self {
            encoder,
            decoder,
            accumulator: FrameAccumulator::new(FRAME_SIZE),
        })
    }

    /// Feed captured samples and encode every frame that is now complete.
    ///
    /// A frame that fails to encode is logged and skipped; the rest of the
    /// batch is still returned.
    pub fn encode(&mut self, samples: &[i16]) -> Vec<Bytes> {
        let frames = self.accumulator.push_and_drain(samples);
        let mut packets = Vec::with_capacity(frames.len());

        for frame in frames {
            match self.encoder.encode(&frame) {
                Ok(packet) => packets.push(packet),
                Err(e) => tracing::warn!("Dropping capture frame: {}", e),
            }
        }

        packets
    }

    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, CodecError> {
        self.decoder.decode(packet)
    }

    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<(), CodecError> {
        self.encoder.set_bitrate(bitrate)
    }

    /// Samples waiting for the next full frame
    pub fn pending_samples(&self) -> usize {
        self.accumulator.pending()
    }

    pub fn encoder(&self) -> &OpusEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &OpusDecoder {
        &self.decoder
    }
}

impl Drop for CodecContext {
    fn drop(&mut self) {
        tracing::debug!(
            frames_encoded = self.encoder.stats().frames_encoded,
            frames_decoded = self.decoder.stats().frames_decoded,
            "Opus codec context released"
        );
    }
}
