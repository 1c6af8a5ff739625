//! Audio-data envelope
//!
//! Each encoded frame (one Opus packet or one raw PCM capture buffer) travels
//! as a standard base64 string. There is no sequence number: the receiver
//! treats arrival order as playback order.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

use crate::error::ProtocolError;

/// Wrap an encoded payload for the transport
pub fn encode_envelope(payload: &[u8]) -> Bytes {
    Bytes::from(STANDARD.encode(payload))
}

/// Unwrap a received envelope; surrounding whitespace is tolerated
pub fn decode_envelope(data: &[u8]) -> Result<Bytes, ProtocolError> {
    let text = data.trim_ascii();
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let payload = STANDARD.decode(text)?;
    if payload.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(Bytes::from(payload))
}
