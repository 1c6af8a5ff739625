//! Bit-depth reduction for raw PCM transport
//!
//! All transforms take and return 16-bit signed mono samples. They are lossy
//! but deterministic: decoding an encoded buffer lands within one
//! quantization step of the input (256 for 8-bit, 16 for 12-bit, exact for
//! 16-bit).

use super::CodecMode;

/// Encode 16-bit samples with the bit depth of `mode`.
///
/// Returns `None` for [`CodecMode::Opus`], which is not a PCM representation.
pub fn encode(mode: CodecMode, samples: &[i16]) -> Option<Vec<u8>> {
    match mode {
        CodecMode::Opus => None,
        CodecMode::Pcm8 => Some(encode_8bit(samples)),
        CodecMode::Pcm12 => Some(encode_12bit(samples)),
        CodecMode::Pcm16 => Some(encode_16bit(samples)),
    }
}

/// Decode a payload produced by [`encode`] back to 16-bit samples.
pub fn decode(mode: CodecMode, data: &[u8]) -> Option<Vec<i16>> {
    match mode {
        CodecMode::Opus => None,
        CodecMode::Pcm8 => Some(decode_8bit(data)),
        CodecMode::Pcm12 => Some(decode_12bit(data)),
        CodecMode::Pcm16 => Some(decode_16bit(data)),
    }
}

/// Unsigned-offset 8-bit quantization: `(s >> 8) + 128`
pub fn encode_8bit(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| ((s as i32 >> 8) + 128).clamp(0, 255) as u8)
        .collect()
}

pub fn decode_8bit(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| ((b as i32 - 128) << 8) as i16).collect()
}

/// Packs two 12-bit samples into three bytes.
///
/// ```text
/// byte0 = v1[7:0]
/// byte1 = v1[11:8] | v2[3:0] << 4
/// byte2 = v2[11:4]
/// ```
///
/// An odd trailing sample is dropped.
pub fn encode_12bit(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() / 2 * 3);
    for pair in samples.chunks_exact(2) {
        let v1 = ((pair[0] >> 4) as u16) & 0x0FFF;
        let v2 = ((pair[1] >> 4) as u16) & 0x0FFF;
        out.push((v1 & 0xFF) as u8);
        out.push(((v1 >> 8) as u8 & 0x0F) | (((v2 & 0x0F) as u8) << 4));
        out.push((v2 >> 4) as u8);
    }
    out
}

pub fn decode_12bit(data: &[u8]) -> Vec<i16> {
    let mut out = Vec::with_capacity(data.len() / 3 * 2);
    for triple in data.chunks_exact(3) {
        let v1 = triple[0] as u16 | ((triple[1] as u16 & 0x0F) << 8);
        let v2 = (triple[1] as u16 >> 4) | ((triple[2] as u16) << 4);
        out.push(sign_extend_12(v1) << 4);
        out.push(sign_extend_12(v2) << 4);
    }
    out
}

fn sign_extend_12(v: u16) -> i16 {
    if v & 0x0800 != 0 {
        (v | 0xF000) as i16
    } else {
        v as i16
    }
}

/// Little-endian 16-bit PCM
pub fn encode_16bit(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// A trailing odd byte is ignored
pub fn decode_16bit(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_12bit_scenario() {
        let encoded = encode_12bit(&[4096, -4096]);
        assert_eq!(encoded.len(), 3);

        let decoded = decode_12bit(&encoded);
        assert_eq!(decoded.len(), 2);
        assert!((decoded[0] as i32 - 4096).abs() < 16);
        assert!((decoded[1] as i32 + 4096).abs() < 16);
    }

    #[test]
    fn test_12bit_drops_odd_sample() {
        let encoded = encode_12bit(&[100, 200, 300]);
        assert_eq!(encoded.len(), 3);
        assert_eq!(decode_12bit(&encoded).len(), 2);
    }

    #[test]
    fn test_12bit_extremes() {
        let decoded = decode_12bit(&encode_12bit(&[i16::MIN, i16::MAX]));
        assert_eq!(decoded[0], i16::MIN);
        assert_eq!(decoded[1], i16::MAX & !0x0F);
    }

    #[test]
    fn test_8bit_known_values() {
        assert_eq!(encode_8bit(&[0, i16::MIN, i16::MAX, -1]), vec![128, 0, 255, 127]);
        assert_eq!(decode_8bit(&[128, 0, 255]), vec![0, i16::MIN, 127 << 8]);
    }

    #[test]
    fn test_16bit_exact_and_odd_byte() {
        let samples = vec![0, 1, -1, i16::MIN, i16::MAX, 12345];
        let mut encoded = encode_16bit(&samples);
        encoded.push(0xAB);
        assert_eq!(decode_16bit(&encoded), samples);
    }

    #[test]
    fn test_opus_is_not_pcm() {
        assert!(encode(CodecMode::Opus, &[1, 2]).is_none());
        assert!(decode(CodecMode::Opus, &[1, 2]).is_none());
    }

    proptest! {
        #[test]
        fn pcm8_error_within_one_step(samples in prop::collection::vec(any::<i16>(), 0..256)) {
            let decoded = decode_8bit(&encode_8bit(&samples));
            prop_assert_eq!(decoded.len(), samples.len());
            for (a, b) in samples.iter().zip(decoded.iter()) {
                prop_assert!((*a as i32 - *b as i32).abs() < 256);
            }
        }

        #[test]
        fn pcm12_error_within_one_step(samples in prop::collection::vec(any::<i16>(), 0..256)) {
            let decoded = decode_12bit(&encode_12bit(&samples));
            prop_assert_eq!(decoded.len(), samples.len() / 2 * 2);
            for (a, b) in samples.iter().zip(decoded.iter()) {
                prop_assert!((*a as i32 - *b as i32).abs() < 16);
            }
        }

        #[test]
        fn pcm16_is_exact(samples in prop::collection::vec(any::<i16>(), 0..256)) {
            let decoded = decode(CodecMode::Pcm16, &encode(CodecMode::Pcm16, &samples).unwrap()).unwrap();
            prop_assert_eq!(decoded, samples);
        }
    }
}
