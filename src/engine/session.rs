//! State of one running audio session
//!
//! A `Session` is shared by the capture callback, the network receive path
//! and the playback completion worker. Codec resources sit behind their own
//! lock and are only touched while the session is active; after teardown
//! every path turns into a no-op.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::audio::{apply_gain, FormatConverter, LevelMeter, Samples, StreamFormat, NETWORK_FORMAT};
use crate::codec::{pcm, CodecContext, CodecMode};
use crate::config::{EngineConfig, OpusConfig};
use crate::error::{CodecError, FormatError};
use crate::events::{AudioEvent, EventSink};
use crate::jitter::{AudioPacket, PacketRenderer};
use crate::network::Transport;
use crate::protocol::encode_envelope;

/// f32 stored as bits for lock-free reads from audio threads
struct AtomicGain(AtomicU32);

impl AtomicGain {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Active codec and, for Opus, its resources
struct CodecSlot {
    mode: CodecMode,
    opus: Option<CodecContext>,
    opus_config: OpusConfig,
    /// Opus failed to initialize; stays on PCM for the rest of the session
    opus_disabled: bool,
}

impl CodecSlot {
    fn new(requested: CodecMode, opus_config: OpusConfig) -> Self {
        let mut slot = Self {
            mode: CodecMode::Pcm16,
            opus: None,
            opus_config,
            opus_disabled: false,
        };
        // The initial request cannot be rejected: the fallback applies
        let _ = slot.switch(requested);
        slot
    }

    /// Move to `mode`. Selecting Opus always builds a fresh context.
    fn switch(&mut self, mode: CodecMode) -> Result<CodecMode, CodecError> {
        if !mode.is_compressed() {
            self.opus = None;
            self.mode = mode;
            return Ok(mode);
        }

        if self.opus_disabled {
            return Err(CodecError::Unavailable);
        }

        self.opus = None;
        match CodecContext::new(self.opus_config.clone()) {
            Ok(context) => {
                self.opus = Some(context);
                self.mode = CodecMode::Opus;
                Ok(CodecMode::Opus)
            }
            Err(e) => {
                tracing::warn!("Opus unavailable, falling back to 16-bit PCM: {}", e);
                self.opus_disabled = true;
                self.mode = CodecMode::Pcm16;
                Ok(CodecMode::Pcm16)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    packets_sent: AtomicU64,
    capture_dropped: AtomicU64,
    decode_failures: AtomicU64,
    stale_packets: AtomicU64,
}

/// Counter snapshot for [`super::EngineStats`]
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SessionStats {
    pub packets_sent: u64,
    /// Capture buffers lost to format conversion
    pub capture_dropped: u64,
    pub decode_failures: u64,
    /// Packets queued under a codec that is no longer active
    pub stale_packets: u64,
}

pub(crate) struct Session {
    active: AtomicBool,
    mic_gain: AtomicGain,
    playback_volume: AtomicGain,
    codec: Mutex<CodecSlot>,
    meter: Mutex<LevelMeter>,
    /// Device format to network format
    capture_converter: Mutex<FormatConverter>,
    /// Network format to sink format
    playback_converter: Mutex<FormatConverter>,
    transport: Arc<dyn Transport>,
    events: EventSink,
    counters: Counters,
}

impl Session {
    pub(crate) fn new(
        config: &EngineConfig,
        capture_format: StreamFormat,
        sink_format: StreamFormat,
        transport: Arc<dyn Transport>,
        events: EventSink,
    ) -> Result<Self, FormatError> {
        Ok(Self {
            active: AtomicBool::new(false),
            mic_gain: AtomicGain::new(config.mic_gain),
            playback_volume: AtomicGain::new(config.playback_volume),
            codec: Mutex::new(CodecSlot::new(config.codec, config.opus_config())),
            meter: Mutex::new(LevelMeter::default()),
            capture_converter: Mutex::new(FormatConverter::new(capture_format, NETWORK_FORMAT)?),
            playback_converter: Mutex::new(FormatConverter::new(NETWORK_FORMAT, sink_format)?),
            transport,
            events,
            counters: Counters::default(),
        })
    }

    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop every path and release the codec
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        let mut slot = self.codec.lock();
        slot.opus = None;
    }

    pub(crate) fn codec_mode(&self) -> CodecMode {
        self.codec.lock().mode
    }

    pub(crate) fn switch_codec(&self, mode: CodecMode) -> Result<CodecMode, CodecError> {
        let mut slot = self.codec.lock();
        if slot.mode == mode && (slot.opus.is_some() || !mode.is_compressed()) {
            return Ok(mode);
        }
        let effective = slot.switch(mode)?;
        tracing::info!(codec = %effective, "Codec switched");
        Ok(effective)
    }

    pub(crate) fn set_opus_bitrate(&self, bitrate: u32) {
        let mut slot = self.codec.lock();
        slot.opus_config.bitrate = bitrate;
        if let Some(context) = slot.opus.as_mut() {
            if let Err(e) = context.set_bitrate(bitrate) {
                tracing::warn!("Bitrate change rejected: {}", e);
            }
        }
    }

    pub(crate) fn set_mic_gain(&self, gain: f32) {
        self.mic_gain.set(gain);
    }

    pub(crate) fn set_playback_volume(&self, volume: f32) {
        self.playback_volume.set(volume);
    }

    pub(crate) fn stats(&self) -> SessionStats {
        let c = &self.counters;
        SessionStats {
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            capture_dropped: c.capture_dropped.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            stale_packets: c.stale_packets.load(Ordering::Relaxed),
        }
    }

    /// Capture path: convert, gain, meter, encode, send
    pub(crate) fn process_capture(&self, samples: Samples) {
        if !self.is_active() {
            return;
        }

        let converted = self.capture_converter.lock().process(samples);
        let mut pcm = match converted {
            Ok(converted) => converted.into_i16(),
            Err(e) => {
                self.counters.capture_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Dropping capture buffer: {}", e);
                return;
            }
        };
        if pcm.is_empty() {
            return;
        }

        apply_gain(&mut pcm, self.mic_gain.get());

        if let Some(level) = self.meter.lock().measure(&pcm, Instant::now()) {
            self.events.emit(AudioEvent::AudioLevel { level });
        }

        let packets: Vec<Bytes> = {
            let mut slot = self.codec.lock();
            if !self.is_active() {
                return;
            }
            match slot.mode {
                CodecMode::Opus => match slot.opus.as_mut() {
                    Some(context) => context.encode(&pcm),
                    None => Vec::new(),
                },
                mode => pcm::encode(mode, &pcm).map(Bytes::from).into_iter().collect(),
            }
        };

        for packet in packets.into_iter().filter(|p| !p.is_empty()) {
            self.transport.send(encode_envelope(&packet));
            self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn decode(&self, packet: &AudioPacket) -> Option<Vec<i16>> {
        let mut slot = self.codec.lock();
        if !self.is_active() {
            return None;
        }
        if packet.codec != slot.mode {
            self.counters.stale_packets.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let decoded = match slot.mode {
            CodecMode::Opus => slot.opus.as_mut()?.decode(&packet.payload).map_err(|e| e.to_string()),
            mode => pcm::decode(mode, &packet.payload).ok_or_else(|| format!("{} payload rejected", mode)),
        };

        match decoded {
            Ok(samples) => Some(samples),
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropping undecodable packet: {}", e);
                None
            }
        }
    }
}

impl PacketRenderer for Session {
    /// Receive path after the jitter buffer: decode, volume, sink format
    fn render(&self, packet: &AudioPacket) -> Option<Vec<f32>> {
        let mut pcm = self.decode(packet)?;
        if pcm.is_empty() {
            return None;
        }

        apply_gain(&mut pcm, self.playback_volume.get());

        let converted = self.playback_converter.lock().process(Samples::I16(pcm));
        match converted {
            Ok(samples) => Some(samples.into_f32()),
            Err(e) => {
                tracing::debug!("Dropping playback buffer: {}", e);
                None
            }
        }
    }
}
