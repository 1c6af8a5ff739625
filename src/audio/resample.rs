//! Streaming sample-rate conversion
//!
//! Wraps a rubato FFT resampler for mono audio. Input is accumulated across
//! calls and processed in fixed chunks, so buffer boundaries from the device
//! never show up as gaps or phase jumps in the output.

use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Resampler};

use crate::constants::SAMPLE_RATE;
use crate::error::FormatError;

/// 10ms at 48kHz; two chunks per codec frame
const CHUNK_FRAMES: usize = 480;

/// Lowest latency setting for the FFT resampler
const SUB_CHUNKS: usize = 1;

const MONO: usize = 1;

/// Mono resampler that keeps state between buffers
pub struct StreamResampler {
    resampler: Fft<f32>,
    /// Input not yet consumed by a full chunk
    pending: Vec<f32>,
    work_in: Vec<Vec<f32>>,
    work_out: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, FormatError> {
        // The 48kHz side gets the fixed chunk so it lines up with codec frames
        let fixed = if to_rate == SAMPLE_RATE {
            FixedSync::Output
        } else {
            FixedSync::Input
        };

        let resampler = Fft::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_FRAMES,
            SUB_CHUNKS,
            MONO,
            fixed,
        )
        .map_err(|e| FormatError::Resampler(format!("{} Hz -> {} Hz: {}", from_rate, to_rate, e)))?;

        let input_frames_max = resampler.input_frames_max();
        let output_frames_max = resampler.output_frames_max();

        Ok(Self {
            resampler,
            pending: Vec::new(),
            work_in: vec![vec![0.0; input_frames_max]],
            work_out: vec![vec![0.0; output_frames_max]],
        })
    }

    /// Input frames held back until the next chunk is complete
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed mono samples, returning whatever output is ready. May be empty.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, FormatError> {
        self.pending.extend_from_slice(samples);
        let mut output = Vec::new();

        while self.pending.len() >= self.resampler.input_frames_next() {
            let frames_needed = self.resampler.input_frames_next();
            self.work_in[0][..frames_needed].copy_from_slice(&self.pending[..frames_needed]);
            self.pending.drain(..frames_needed);

            let input = SequentialSliceOfVecs::new(&self.work_in[..], MONO, frames_needed)
                .map_err(|e| FormatError::Resampler(e.to_string()))?;
            let output_frames = self.resampler.output_frames_next();
            let mut out = SequentialSliceOfVecs::new_mut(&mut self.work_out[..], MONO, output_frames)
                .map_err(|e| FormatError::Resampler(e.to_string()))?;

            let (_, written) = self
                .resampler
                .process_into_buffer(&input, &mut out, None)
                .map_err(|e| FormatError::Resampler(e.to_string()))?;

            output.extend_from_slice(&self.work_out[0][..written]);
        }

        Ok(output)
    }
}
