//! Ring accumulator bridging capture buffers to fixed codec frames
//!
//! Capture callbacks deliver whatever size the hardware picked; the Opus
//! encoder only accepts exact 960-sample frames. Samples that do not fill a
//! whole frame stay here until the next callback, they are never padded.

use std::collections::VecDeque;

/// Accumulates mono samples and hands them out in fixed-size frames
pub struct FrameAccumulator {
    pending: VecDeque<i16>,
    frame_size: usize,
    /// Frames handed out so far
    frames_produced: u64,
}

impl FrameAccumulator {
    /// Create an accumulator for frames of `frame_size` samples
    pub fn new(frame_size: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(frame_size * 4),
            frame_size,
            frames_produced: 0,
        }
    }

    /// Append captured samples
    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend(samples.iter().copied());
    }

    /// Take the next complete frame, if one is available
    pub fn pop_frame(&mut self) -> Option<Vec<i16>> {
        if self.frame_size == 0 || self.pending.len() < self.frame_size {
            return None;
        }
        self.frames_produced += 1;
        Some(self.pending.drain(..self.frame_size).collect())
    }

    /// Append `samples` and take every frame that is now complete
    pub fn push_and_drain(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.push(samples);
        let mut frames = Vec::with_capacity(self.pending.len() / self.frame_size.max(1));
        while let Some(frame) = self.pop_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    /// Discard leftover samples
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
