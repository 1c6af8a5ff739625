//! Sample format conversion
//!
//! Three formats meet in the pipeline: whatever the hardware delivers, the
//! network format (mono i16 48kHz) and the processing format (mono f32
//! 48kHz). [`convert`] changes representation and channel layout in one pure
//! call; [`FormatConverter`] adds rate conversion for a continuous stream. A
//! buffer that cannot be converted is rejected whole; callers drop it instead
//! of forwarding partial samples.

use serde::{Deserialize, Serialize};

use crate::audio::resample::StreamResampler;
use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::FormatError;

/// Sample representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    I16,
    F32,
}

/// Rate, channel count and representation of an interleaved buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub kind: SampleKind,
}

impl StreamFormat {
    pub const fn new(sample_rate: u32, channels: u16, kind: SampleKind) -> Self {
        Self {
            sample_rate,
            channels,
            kind,
        }
    }
}

/// Format carried on the wire
pub const NETWORK_FORMAT: StreamFormat = StreamFormat::new(SAMPLE_RATE, CHANNELS, SampleKind::I16);

/// Format used between decoding and the sink
pub const PROCESSING_FORMAT: StreamFormat = StreamFormat::new(SAMPLE_RATE, CHANNELS, SampleKind::F32);

/// An owned interleaved buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl Samples {
    pub fn kind(&self) -> SampleKind {
        match self {
            Samples::I16(_) => SampleKind::I16,
            Samples::F32(_) => SampleKind::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::I16(s) => s.len(),
            Samples::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_i16(self) -> Vec<i16> {
        match self {
            Samples::I16(s) => s,
            Samples::F32(s) => s.iter().map(|&v| f32_to_i16(v)).collect(),
        }
    }

    pub fn into_f32(self) -> Vec<f32> {
        match self {
            Samples::I16(s) => s.iter().map(|&v| i16_to_f32(v)).collect(),
            Samples::F32(s) => s,
        }
    }
}

pub fn i16_to_f32(v: i16) -> f32 {
    v as f32 / 32768.0
}

pub fn f32_to_i16(v: f32) -> i16 {
    (v * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert `input` from `from` to `to` at the same sample rate.
///
/// Identical formats return the input unchanged. Channel conversion supports
/// downmixing to mono and duplicating mono to N channels; other layouts are
/// rejected. A rate change needs state carried between buffers and goes
/// through [`FormatConverter`].
pub fn convert(input: Samples, from: &StreamFormat, to: &StreamFormat) -> Result<Samples, FormatError> {
    check_pair(from, to)?;
    check_input(&input, from)?;
    if from.sample_rate != to.sample_rate {
        return Err(FormatError::Unsupported(format!(
            "{} Hz -> {} Hz needs a streaming converter",
            from.sample_rate, to.sample_rate
        )));
    }
    if from == to {
        return Ok(input);
    }

    // Exact representation change only
    if from.channels == to.channels {
        return Ok(into_kind(input, to.kind));
    }

    let mono = downmix(&input.into_f32(), from.channels);
    Ok(into_kind(Samples::F32(upmix(mono, to.channels)), to.kind))
}

/// Converts a continuous stream between two formats, resampling when the
/// rates differ. Owned by one path (capture or playback) for a session.
pub struct FormatConverter {
    from: StreamFormat,
    to: StreamFormat,
    resampler: Option<StreamResampler>,
}

impl FormatConverter {
    pub fn new(from: StreamFormat, to: StreamFormat) -> Result<Self, FormatError> {
        check_pair(&from, &to)?;
        let resampler = if from.sample_rate != to.sample_rate {
            Some(StreamResampler::new(from.sample_rate, to.sample_rate)?)
        } else {
            None
        };
        Ok(Self { from, to, resampler })
    }

    /// Convert the next buffer of the stream. With resampling active the
    /// output may be shorter or empty while a chunk is still filling.
    pub fn process(&mut self, input: Samples) -> Result<Samples, FormatError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return convert(input, &self.from, &self.to);
        };
        check_input(&input, &self.from)?;

        let mono = downmix(&input.into_f32(), self.from.channels);
        let resampled = resampler.process(&mono)?;
        Ok(into_kind(Samples::F32(upmix(resampled, self.to.channels)), self.to.kind))
    }
}

fn check_pair(from: &StreamFormat, to: &StreamFormat) -> Result<(), FormatError> {
    if from.sample_rate == 0 || to.sample_rate == 0 || from.channels == 0 || to.channels == 0 {
        return Err(FormatError::Unsupported(format!("{:?} -> {:?}", from, to)));
    }
    if from.channels != to.channels && from.channels != 1 && to.channels != 1 {
        return Err(FormatError::Unsupported(format!(
            "{} -> {} channels",
            from.channels, to.channels
        )));
    }
    Ok(())
}

fn check_input(input: &Samples, from: &StreamFormat) -> Result<(), FormatError> {
    if input.kind() != from.kind {
        return Err(FormatError::KindMismatch);
    }
    if input.len() % from.channels as usize != 0 {
        return Err(FormatError::PartialFrame {
            len: input.len(),
            channels: from.channels,
        });
    }
    Ok(())
}

fn into_kind(samples: Samples, kind: SampleKind) -> Samples {
    match kind {
        SampleKind::I16 => Samples::I16(samples.into_i16()),
        SampleKind::F32 => Samples::F32(samples.into_f32()),
    }
}

/// Average interleaved channels down to mono
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Duplicate mono samples into every output channel
fn upmix(mono: Vec<f32>, channels: u16) -> Vec<f32> {
    if channels == 1 {
        return mono;
    }
    let n = channels as usize;
    let mut out = Vec::with_capacity(mono.len() * n);
    for sample in mono {
        out.extend(std::iter::repeat(sample).take(n));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEREO_44K_F32: StreamFormat = StreamFormat::new(44_100, 2, SampleKind::F32);

    #[test]
    fn test_identical_formats_are_untouched() {
        let input = Samples::I16(vec![1, -2, 3]);
        let out = convert(input.clone(), &NETWORK_FORMAT, &NETWORK_FORMAT).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_network_to_processing() {
        let out = convert(Samples::I16(vec![0, 16384, i16::MIN]), &NETWORK_FORMAT, &PROCESSING_FORMAT)
            .unwrap()
            .into_f32();
        assert_eq!(out, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_processing_to_network_clamps() {
        let out = convert(Samples::F32(vec![2.0, -2.0, 0.25]), &PROCESSING_FORMAT, &NETWORK_FORMAT)
            .unwrap()
            .into_i16();
        assert_eq!(out, vec![i16::MAX, i16::MIN, 8192]);
    }

    #[test]
    fn test_stereo_48k_to_network() {
        let stereo = StreamFormat::new(48_000, 2, SampleKind::F32);
        let out = convert(Samples::F32(vec![0.5, 0.0, -0.5, -0.5]), &stereo, &NETWORK_FORMAT)
            .unwrap()
            .into_i16();
        assert_eq!(out, vec![8192, -16384]);
    }

    #[test]
    fn test_mono_to_stereo_sink() {
        let sink = StreamFormat::new(48_000, 2, SampleKind::F32);
        let out = convert(Samples::F32(vec![0.1, 0.2]), &PROCESSING_FORMAT, &sink)
            .unwrap()
            .into_f32();
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_rate_change_needs_converter() {
        assert!(matches!(
            convert(Samples::F32(vec![0.0; 882]), &STEREO_44K_F32, &NETWORK_FORMAT),
            Err(FormatError::Unsupported(_))
        ));
    }

    #[test]
    fn test_converter_streams_capture_to_network() {
        let mut converter = FormatConverter::new(STEREO_44K_F32, NETWORK_FORMAT).unwrap();

        // One second of 44.1kHz stereo in device-sized buffers
        let mut produced = 0usize;
        for _ in 0..(44_100 / 441) {
            let out = converter.process(Samples::F32(vec![0.25; 441 * 2])).unwrap();
            assert_eq!(out.kind(), SampleKind::I16);
            produced += out.len();
        }
        assert_eq!(produced, 48_000);
    }

    #[test]
    fn test_converter_without_rate_change_is_direct() {
        let sink = StreamFormat::new(48_000, 2, SampleKind::F32);
        let mut converter = FormatConverter::new(NETWORK_FORMAT, sink).unwrap();
        let out = converter.process(Samples::I16(vec![16384])).unwrap().into_f32();
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_converter_upmixes_after_resampling() {
        let sink = StreamFormat::new(44_100, 2, SampleKind::F32);
        let mut converter = FormatConverter::new(NETWORK_FORMAT, sink).unwrap();
        let out = converter.process(Samples::I16(vec![0; 960])).unwrap().into_f32();
        assert_eq!(out.len(), 882 * 2);
    }

    #[test]
    fn test_converter_rejects_partial_frames() {
        let mut converter = FormatConverter::new(STEREO_44K_F32, NETWORK_FORMAT).unwrap();
        assert_eq!(
            converter.process(Samples::F32(vec![0.0; 3])).err(),
            Some(FormatError::PartialFrame { len: 3, channels: 2 })
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        let stereo = StreamFormat::new(48_000, 2, SampleKind::F32);
        assert_eq!(
            convert(Samples::F32(vec![0.0; 3]), &stereo, &NETWORK_FORMAT),
            Err(FormatError::PartialFrame { len: 3, channels: 2 })
        );
        assert_eq!(
            convert(Samples::I16(vec![0; 4]), &stereo, &NETWORK_FORMAT),
            Err(FormatError::KindMismatch)
        );

        let quad = StreamFormat::new(48_000, 4, SampleKind::F32);
        assert!(matches!(
            convert(Samples::F32(vec![0.0; 4]), &quad, &stereo),
            Err(FormatError::Unsupported(_))
        ));
    }
}
