//! Error types for the voice pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Compressed codec is not available in this session")]
    Unavailable,
}

/// Sample format conversion errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported conversion: {0}")]
    Unsupported(String),

    #[error("Buffer of {len} samples is not a whole number of {channels}-channel frames")]
    PartialFrame { len: usize, channels: u16 },

    #[error("Sample representation does not match the declared format")]
    KindMismatch,

    #[error("Resampler error: {0}")]
    Resampler(String),
}

/// Audio-data envelope errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("Empty payload")]
    Empty,
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
