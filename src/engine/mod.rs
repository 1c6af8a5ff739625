//! Audio engine facade
//!
//! Owns the session lifecycle: `start` opens the devices and wires
//! capture → gain → codec → transport and transport → jitter buffer →
//! codec → converter → sink; `stop` tears all of it down. One engine runs at
//! most one session at a time.

pub mod backend;
mod session;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{CaptureSource, PlaybackSink};
use crate::codec::CodecMode;
use crate::config::{clamp_target_ms, validate_gain, EngineConfig, MAX_BITRATE, MIN_BITRATE};
use crate::constants::TICK_INTERVAL_MS;
use crate::error::{AudioError, Error, Result};
use crate::events::{AudioEvent, EventSink};
use crate::jitter::{JitterStats, PlaybackScheduler};
use crate::network::Transport;
use crate::protocol::decode_envelope;

pub use backend::{AudioBackend, CpalBackend};
pub use session::SessionStats;
use session::Session;

/// Snapshot of the engine for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub running: bool,
    /// Codec in effect, which differs from the configured one after an
    /// Opus fallback
    pub codec: CodecMode,
    pub jitter: Option<JitterStats>,
    pub session: Option<SessionStats>,
    /// Received datagrams that were not valid envelopes
    pub invalid_packets: u64,
}

/// Everything that exists only while a session runs
struct Running {
    session: Arc<Session>,
    scheduler: PlaybackScheduler,
    capture: Box<dyn CaptureSource>,
    sink: Arc<dyn PlaybackSink>,
    tick_stop: Sender<()>,
    tick_thread: Option<JoinHandle<()>>,
}

pub struct AudioEngine {
    config: Mutex<EngineConfig>,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    events: EventSink,
    event_rx: Receiver<AudioEvent>,
    running: Mutex<Option<Running>>,
    invalid_packets: AtomicU64,
}

impl AudioEngine {
    pub fn new(config: EngineConfig, backend: Arc<dyn AudioBackend>, transport: Arc<dyn Transport>) -> Self {
        let (events, event_rx) = EventSink::channel();
        Self {
            config: Mutex::new(config.validated()),
            backend,
            transport,
            events,
            event_rx,
            running: Mutex::new(None),
            invalid_packets: AtomicU64::new(0),
        }
    }

    /// Start a session. Device failures are returned and leave nothing
    /// running.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let config = self.config.lock().clone();

        let sink = self.backend.open_playback()?;
        let mut capture = self.backend.open_capture()?;

        let capture_format = capture.format();
        let session = Arc::new(Session::new(
            &config,
            capture_format,
            sink.format(),
            self.transport.clone(),
            self.events.clone(),
        )?);
        let scheduler = PlaybackScheduler::new(
            config.jitter.clone(),
            session.codec_mode(),
            sink.clone(),
            session.clone(),
            self.events.clone(),
        );

        session.activate();

        if let Err(e) = sink.play() {
            session.deactivate();
            return Err(e.into());
        }

        let capture_session = session.clone();
        if let Err(e) = capture.start(Box::new(move |samples| {
            capture_session.process_capture(samples);
        })) {
            tracing::error!("Capture failed to start: {}", e);
            session.deactivate();
            sink.stop();
            return Err(e.into());
        }

        let (tick_stop, tick_rx) = bounded::<()>(1);
        let tick_thread = spawn_tick(scheduler.clone(), tick_rx).map_err(|e| {
            session.deactivate();
            capture.stop();
            sink.stop();
            e
        })?;

        tracing::info!(
            codec = %session.codec_mode(),
            jitter_ms = scheduler.target_ms(),
            capture_rate = capture_format.sample_rate,
            playback_rate = sink.format().sample_rate,
            "Audio session started"
        );

        *running = Some(Running {
            session,
            scheduler,
            capture,
            sink,
            tick_stop,
            tick_thread: Some(tick_thread),
        });
        Ok(())
    }

    /// End the session. Safe to call repeatedly, before `start`, and
    /// concurrently with receive or completion callbacks.
    pub fn stop(&self) {
        let Some(mut running) = self.running.lock().take() else {
            return;
        };

        running.session.deactivate();
        running.capture.stop();

        let _ = running.tick_stop.try_send(());
        if let Some(handle) = running.tick_thread.take() {
            let _ = handle.join();
        }

        running.scheduler.reset();
        running.sink.stop();

        tracing::info!("Audio session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Inbound datagram from the transport
    pub fn on_receive(&self, data: &[u8]) {
        let Some(scheduler) = self.scheduler() else {
            return;
        };

        match decode_envelope(data) {
            Ok(payload) => scheduler.enqueue(payload),
            Err(e) => {
                self.invalid_packets.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Ignoring datagram: {}", e);
            }
        }
    }

    /// Select the payload codec. Returns the codec now in effect.
    pub fn set_codec(&self, codec: CodecMode) -> Result<CodecMode> {
        let running = self.running.lock();
        let effective = match running.as_ref() {
            Some(r) => {
                let effective = r.session.switch_codec(codec)?;
                r.scheduler.set_codec(effective);
                effective
            }
            None => codec,
        };
        self.config.lock().codec = codec;
        Ok(effective)
    }

    pub fn set_opus_bitrate(&self, bitrate_bps: u32) -> u32 {
        let bitrate = bitrate_bps.clamp(MIN_BITRATE, MAX_BITRATE);
        self.config.lock().opus_bitrate_bps = bitrate;
        if let Some(r) = self.running.lock().as_ref() {
            r.session.set_opus_bitrate(bitrate);
        }
        bitrate
    }

    /// Manual jitter target. Returns the clamped value.
    pub fn set_jitter_target(&self, target_ms: u32) -> u32 {
        let applied = match self.scheduler() {
            Some(scheduler) => scheduler.set_target_ms(target_ms),
            None => clamp_target_ms(target_ms),
        };
        self.config.lock().jitter.target_ms = applied;
        applied
    }

    pub fn set_auto_jitter(&self, enabled: bool) {
        self.config.lock().jitter.auto_adjust = enabled;
        if let Some(scheduler) = self.scheduler() {
            scheduler.set_auto_adjust(enabled);
        }
    }

    /// Non-finite gains are rejected and the previous value kept
    pub fn set_mic_gain(&self, gain: f32) -> Result<f32> {
        let gain = validate_gain(gain).ok_or_else(|| Error::Config(format!("Invalid mic gain: {}", gain)))?;
        self.config.lock().mic_gain = gain;
        if let Some(r) = self.running.lock().as_ref() {
            r.session.set_mic_gain(gain);
        }
        Ok(gain)
    }

    pub fn set_playback_volume(&self, volume: f32) -> Result<f32> {
        let volume =
            validate_gain(volume).ok_or_else(|| Error::Config(format!("Invalid playback volume: {}", volume)))?;
        self.config.lock().playback_volume = volume;
        if let Some(r) = self.running.lock().as_ref() {
            r.session.set_playback_volume(volume);
        }
        Ok(volume)
    }

    /// The platform sink reported it ran dry
    pub fn report_underrun(&self) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.report_underrun();
        }
    }

    /// Event stream. Receivers share one queue; each event goes to one of
    /// them.
    pub fn subscribe(&self) -> Receiver<AudioEvent> {
        self.event_rx.clone()
    }

    pub fn config(&self) -> EngineConfig {
        self.config.lock().clone()
    }

    pub fn stats(&self) -> EngineStats {
        let running = self.running.lock();
        let invalid_packets = self.invalid_packets.load(Ordering::Relaxed);
        match running.as_ref() {
            Some(r) => EngineStats {
                running: true,
                codec: r.session.codec_mode(),
                jitter: Some(r.scheduler.stats()),
                session: Some(r.session.stats()),
                invalid_packets,
            },
            None => EngineStats {
                running: false,
                codec: self.config.lock().codec,
                jitter: None,
                session: None,
                invalid_packets,
            },
        }
    }

    fn scheduler(&self) -> Option<PlaybackScheduler> {
        self.running
            .lock()
            .as_ref()
            .filter(|r| r.session.is_active())
            .map(|r| r.scheduler.clone())
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_tick(scheduler: PlaybackScheduler, stop: Receiver<()>) -> Result<JoinHandle<()>> {
    let interval = Duration::from_millis(TICK_INTERVAL_MS);
    thread::Builder::new()
        .name("jitter-tick".to_string())
        .spawn(move || loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => scheduler.tick(),
                _ => break,
            }
        })
        .map_err(|e| Error::Audio(AudioError::StreamError(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureCallback, CompletionCallback, SampleKind, Samples, StreamFormat, NETWORK_FORMAT};
    use crate::codec::pcm;
    use crate::jitter::PlaybackState;
    use crate::protocol::encode_envelope;
    use bytes::Bytes;
    use std::sync::atomic::AtomicBool;

    type CallbackSlot = Arc<Mutex<Option<CaptureCallback>>>;

    struct MockCapture {
        callback: CallbackSlot,
        fail: bool,
    }

    impl CaptureSource for MockCapture {
        fn format(&self) -> StreamFormat {
            NETWORK_FORMAT
        }

        fn start(&mut self, callback: CaptureCallback) -> std::result::Result<(), AudioError> {
            if self.fail {
                return Err(AudioError::StreamError("device busy".into()));
            }
            *self.callback.lock() = Some(callback);
            Ok(())
        }

        fn stop(&mut self) {
            self.callback.lock().take();
        }
    }

    #[derive(Default)]
    struct MockSink {
        buffers: Mutex<Vec<Vec<f32>>>,
        callbacks: Mutex<Vec<CompletionCallback>>,
        playing: AtomicBool,
        stops: Mutex<usize>,
    }

    impl PlaybackSink for MockSink {
        fn format(&self) -> StreamFormat {
            StreamFormat::new(48_000, 1, SampleKind::F32)
        }

        fn schedule_buffer(&self, samples: Vec<f32>, on_complete: CompletionCallback) {
            self.buffers.lock().push(samples);
            self.callbacks.lock().push(on_complete);
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        fn play(&self) -> std::result::Result<(), AudioError> {
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
            *self.stops.lock() += 1;
        }
    }

    #[derive(Default)]
    struct MockBackend {
        callback: CallbackSlot,
        sink: Arc<MockSink>,
        fail_capture: bool,
    }

    impl MockBackend {
        fn feed(&self, samples: Vec<i16>) {
            if let Some(callback) = self.callback.lock().as_mut() {
                callback(Samples::I16(samples));
            }
        }
    }

    impl AudioBackend for MockBackend {
        fn open_capture(&self) -> std::result::Result<Box<dyn CaptureSource>, AudioError> {
            Ok(Box::new(MockCapture {
                callback: self.callback.clone(),
                fail: self.fail_capture,
            }))
        }

        fn open_playback(&self) -> std::result::Result<Arc<dyn PlaybackSink>, AudioError> {
            Ok(self.sink.clone())
        }
    }

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<Bytes>>,
    }

    impl Transport for MockTransport {
        fn send(&self, payload: Bytes) {
            self.sent.lock().push(payload);
        }
    }

    fn engine(config: EngineConfig) -> (AudioEngine, Arc<MockBackend>, Arc<MockTransport>) {
        let backend = Arc::new(MockBackend::default());
        let transport = Arc::new(MockTransport::default());
        let engine = AudioEngine::new(config, backend.clone(), transport.clone());
        (engine, backend, transport)
    }

    fn pcm16_config(target_ms: u32) -> EngineConfig {
        let mut config = EngineConfig {
            codec: CodecMode::Pcm16,
            playback_volume: 1.0,
            ..EngineConfig::default()
        };
        config.jitter.target_ms = target_ms;
        config
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (engine, backend, _) = engine(EngineConfig::default());
        engine.stop();
        assert!(!engine.is_running());

        engine.start().unwrap();
        assert!(engine.is_running());
        engine.stop();
        engine.stop();

        assert!(!engine.is_running());
        assert!(engine.stats().jitter.is_none());
        assert_eq!(*backend.sink.stops.lock(), 1);
    }

    #[test]
    fn test_capture_failure_leaves_nothing_running() {
        let backend = Arc::new(MockBackend {
            fail_capture: true,
            ..MockBackend::default()
        });
        let engine = AudioEngine::new(EngineConfig::default(), backend.clone(), Arc::new(MockTransport::default()));

        assert!(matches!(engine.start(), Err(Error::Audio(AudioError::StreamError(_)))));
        assert!(!engine.is_running());
        assert!(!backend.sink.is_playing());
    }

    #[test]
    fn test_pcm_loopback_reaches_sink() {
        let (engine, backend, transport) = engine(pcm16_config(40));
        engine.start().unwrap();

        backend.feed(vec![1000; 960]);
        backend.feed(vec![-1000; 960]);

        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(decode_envelope(&sent[0]).unwrap().len(), 1920);

        for envelope in &sent {
            engine.on_receive(envelope);
        }

        let buffers = backend.sink.buffers.lock().clone();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[0].len(), 960);
        assert!((buffers[0][0] - 1000.0 / 32768.0).abs() < 1e-6);
        assert!((buffers[1][0] + 1000.0 / 32768.0).abs() < 1e-6);

        let callbacks: Vec<_> = backend.sink.callbacks.lock().drain(..).collect();
        for on_complete in callbacks {
            on_complete();
        }
        let jitter = engine.stats().jitter.unwrap();
        assert_eq!(jitter.state, PlaybackState::Idle);
        assert_eq!(jitter.completed, 2);
    }

    #[test]
    fn test_opus_capture_is_framed() {
        let (engine, backend, transport) = engine(EngineConfig::default());
        engine.start().unwrap();
        assert_eq!(engine.stats().codec, CodecMode::Opus);

        backend.feed(vec![0; 480]);
        assert!(transport.sent.lock().is_empty());
        backend.feed(vec![0; 480]);
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[test]
    fn test_mic_gain_and_level_event() {
        let (engine, backend, transport) = engine(pcm16_config(100));
        let events = engine.subscribe();
        engine.start().unwrap();
        engine.set_mic_gain(2.0).unwrap();

        backend.feed(vec![8192; 960]);

        let payload = decode_envelope(&transport.sent.lock()[0]).unwrap();
        assert_eq!(pcm::decode(CodecMode::Pcm16, &payload).unwrap()[0], 16384);

        let level = events.try_iter().find_map(|e| match e {
            AudioEvent::AudioLevel { level } => Some(level),
            _ => None,
        });
        assert!((level.unwrap() - 16384.0 / 32767.0).abs() < 1e-4);
    }

    #[test]
    fn test_invalid_gain_keeps_previous() {
        let (engine, _, _) = engine(EngineConfig::default());
        assert!(engine.set_mic_gain(f32::NAN).is_err());
        assert_eq!(engine.config().mic_gain, 1.0);
        assert_eq!(engine.set_playback_volume(50.0).unwrap(), 8.0);
    }

    #[test]
    fn test_jitter_target_clamped_and_reported() {
        let (engine, _, _) = engine(EngineConfig::default());
        let events = engine.subscribe();

        assert_eq!(engine.set_jitter_target(10), 40);
        engine.start().unwrap();
        assert_eq!(engine.set_jitter_target(1_000), 500);

        assert!(events
            .try_iter()
            .any(|e| e == AudioEvent::BufferChanged { target_ms: 500, auto: false }));
        assert_eq!(engine.config().jitter.target_ms, 500);
    }

    #[test]
    fn test_codec_switch_flushes_queued_packets() {
        let (engine, backend, transport) = engine(pcm16_config(200));
        engine.start().unwrap();

        backend.feed(vec![1; 960]);
        engine.on_receive(&transport.sent.lock()[0].clone());
        assert_eq!(engine.stats().jitter.unwrap().queued_packets, 1);

        assert_eq!(engine.set_codec(CodecMode::Pcm8).unwrap(), CodecMode::Pcm8);
        let jitter = engine.stats().jitter.unwrap();
        assert_eq!(jitter.queued_packets, 0);
        assert_eq!(jitter.state, PlaybackState::Buffering);
    }

    #[test]
    fn test_corrupt_opus_packet_is_skipped() {
        let mut config = pcm16_config(40);
        config.codec = CodecMode::Opus;
        let (engine, backend, transport) = engine(config);
        engine.start().unwrap();

        backend.feed(vec![0; 960]);
        let good = transport.sent.lock()[0].clone();

        engine.on_receive(&encode_envelope(&[0xFF, 0x00]));
        engine.on_receive(&good);

        let buffers = backend.sink.buffers.lock().clone();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].len(), 960);

        let stats = engine.stats();
        assert_eq!(stats.session.unwrap().decode_failures, 1);
        let jitter = stats.jitter.unwrap();
        assert_eq!(jitter.render_failures, 1);
        assert_eq!(jitter.scheduled, 1);
    }

    #[test]
    fn test_stall_after_drain_grows_target() {
        let (engine, backend, transport) = engine(pcm16_config(40));
        engine.start().unwrap();

        backend.feed(vec![1; 960]);
        backend.feed(vec![1; 960]);
        backend.feed(vec![1; 960]);
        let sent = transport.sent.lock().clone();

        engine.on_receive(&sent[0]);
        engine.on_receive(&sent[1]);
        let callbacks: Vec<_> = backend.sink.callbacks.lock().drain(..).collect();
        for on_complete in callbacks {
            on_complete();
        }
        assert_eq!(engine.stats().jitter.unwrap().state, PlaybackState::Idle);

        std::thread::sleep(Duration::from_millis(100));
        engine.on_receive(&sent[2]);

        let jitter = engine.stats().jitter.unwrap();
        assert_eq!(jitter.underruns, 1);
        assert_eq!(jitter.target_ms, 90);
    }

    #[test]
    fn test_garbage_datagram_is_counted() {
        let (engine, _, _) = engine(EngineConfig::default());
        engine.start().unwrap();
        engine.on_receive(b"%%%");
        assert_eq!(engine.stats().invalid_packets, 1);
        assert_eq!(engine.stats().jitter.unwrap().received, 0);
    }

    #[test]
    fn test_receive_after_stop_is_ignored() {
        let (engine, _, _) = engine(pcm16_config(40));
        engine.start().unwrap();
        engine.stop();
        engine.on_receive(b"AAAA");
        assert!(!engine.is_running());
    }
}
