//! Playback scheduler
//!
//! Wraps a [`JitterBuffer`] in the single lock shared by the receive path and
//! the sink's completion path, and performs the side effects of every
//! evaluation once that lock is released.
//!
//! Packets leave the buffer through an outbox. Whoever wins the `pumping`
//! flag drains it; everyone else only appends. This keeps dispatch in
//! playback order even when a completion fires synchronously inside
//! `schedule_buffer` and re-enters the scheduler.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::audio::PlaybackSink;
use crate::codec::CodecMode;
use crate::config::JitterConfig;
use crate::events::EventSink;
use crate::jitter::buffer::{AudioPacket, Evaluation, JitterBuffer, JitterStats, PlaybackState};

/// Turns a queued packet into sink-ready samples.
///
/// Runs outside the jitter lock. `None` drops the packet; its sink slot is
/// released as if it had played.
pub trait PacketRenderer: Send + Sync {
    fn render(&self, packet: &AudioPacket) -> Option<Vec<f32>>;
}

struct Dispatch {
    packet: AudioPacket,
    generation: u64,
}

struct Shared {
    buffer: JitterBuffer,
    outbox: VecDeque<Dispatch>,
    /// Bumped on reset so completions from a previous session are ignored
    generation: u64,
}

struct Inner {
    shared: Mutex<Shared>,
    pumping: AtomicBool,
    sink: Arc<dyn PlaybackSink>,
    renderer: Arc<dyn PacketRenderer>,
    events: EventSink,
}

/// Thread-safe handle to the jitter buffer and its sink
#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<Inner>,
}

impl PlaybackScheduler {
    pub fn new(
        config: JitterConfig,
        codec: CodecMode,
        sink: Arc<dyn PlaybackSink>,
        renderer: Arc<dyn PacketRenderer>,
        events: EventSink,
    ) -> Self {
        let buffer = JitterBuffer::new(config, codec, Instant::now());
        tracing::debug!(
            target_ms = buffer.target_ms(),
            policy = buffer.policy_name(),
            "Playback scheduler created"
        );

        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    buffer,
                    outbox: VecDeque::new(),
                    generation: 0,
                }),
                pumping: AtomicBool::new(false),
                sink,
                renderer,
                events,
            }),
        }
    }

    /// Queue a packet received from the network
    pub fn enqueue(&self, payload: Bytes) {
        self.enqueue_at(payload, Instant::now());
    }

    pub fn enqueue_at(&self, payload: Bytes, now: Instant) {
        self.inner.apply(|s| s.buffer.push(payload, now));
    }

    /// Periodic evaluation: auto-adjust and stalled-tail start
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&self, now: Instant) {
        self.inner.apply(|s| s.buffer.tick(now));
    }

    /// The sink ran dry while audio was expected
    pub fn report_underrun(&self) {
        let now = Instant::now();
        self.inner.apply(|s| s.buffer.underrun(now));
    }

    /// Manual target override. Returns the clamped value now in effect.
    pub fn set_target_ms(&self, target_ms: u32) -> u32 {
        let now = Instant::now();
        let mut applied = 0;
        self.inner.apply(|s| {
            let eval = s.buffer.set_target(target_ms, now);
            applied = s.buffer.target_ms();
            eval
        });
        applied
    }

    pub fn set_auto_adjust(&self, enabled: bool) {
        let now = Instant::now();
        self.inner.shared.lock().buffer.set_auto_adjust(enabled, now);
    }

    /// Switch the payload codec, discarding packets of the previous one
    pub fn set_codec(&self, codec: CodecMode) {
        self.inner.apply(|s| s.buffer.set_codec(codec));
    }

    /// Forget all queued and in-flight audio
    pub fn reset(&self) {
        let now = Instant::now();
        let mut shared = self.inner.shared.lock();
        shared.generation += 1;
        shared.outbox.clear();
        shared.buffer.reset(now);
    }

    pub fn stats(&self) -> JitterStats {
        self.inner.shared.lock().buffer.stats()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.shared.lock().buffer.state()
    }

    pub fn target_ms(&self) -> u32 {
        self.inner.shared.lock().buffer.target_ms()
    }

    pub fn auto_adjust(&self) -> bool {
        self.inner.shared.lock().buffer.auto_adjust()
    }
}

impl Inner {
    /// Run one state machine operation under the lock, then act on it
    fn apply(self: &Arc<Self>, op: impl FnOnce(&mut Shared) -> Evaluation) {
        let (events, start_sink) = {
            let mut shared = self.shared.lock();
            let eval = op(&mut shared);
            let generation = shared.generation;
            shared
                .outbox
                .extend(eval.dispatch.into_iter().map(|packet| Dispatch { packet, generation }));
            (eval.events, eval.start_sink)
        };

        if start_sink {
            tracing::debug!("Jitter target reached, starting playback");
        }
        for event in events {
            self.events.emit(event);
        }

        self.pump();
    }

    fn pump(self: &Arc<Self>) {
        loop {
            if self
                .pumping
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // The active pump picks up what we queued
                return;
            }

            loop {
                let next = self.shared.lock().outbox.pop_front();
                match next {
                    Some(dispatch) => self.dispatch(dispatch),
                    None => break,
                }
            }

            self.pumping.store(false, Ordering::SeqCst);

            // An append may have raced with releasing the flag
            if self.shared.lock().outbox.is_empty() {
                return;
            }
        }
    }

    fn dispatch(self: &Arc<Self>, dispatch: Dispatch) {
        let Dispatch { packet, generation } = dispatch;

        let Some(samples) = self.renderer.render(&packet) else {
            self.shared.lock().buffer.record_render_failure();
            self.buffer_completed(generation);
            return;
        };

        if self.shared.lock().generation != generation {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(self);
        self.sink.schedule_buffer(
            samples,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.buffer_completed(generation);
                }
            }),
        );

        if !self.sink.is_playing() {
            if let Err(e) = self.sink.play() {
                tracing::error!("Failed to start playback: {}", e);
            }
        }
    }

    fn buffer_completed(self: &Arc<Self>, generation: u64) {
        let now = Instant::now();
        self.apply(|s| {
            if s.generation != generation {
                return Evaluation::default();
            }
            s.buffer.complete(now)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CompletionCallback, SampleKind, StreamFormat};
    use crate::error::AudioError;
    use crate::events::AudioEvent;
    use std::thread;
    use std::time::Duration;

    /// Records scheduled buffers; completions are fired by the test
    #[derive(Default)]
    struct MockSink {
        scheduled: Mutex<Vec<(Vec<f32>, Option<CompletionCallback>)>>,
        playing: AtomicBool,
        complete_immediately: bool,
    }

    impl MockSink {
        fn immediate() -> Self {
            Self {
                complete_immediately: true,
                ..Self::default()
            }
        }

        fn played(&self) -> Vec<f32> {
            self.scheduled.lock().iter().map(|(s, _)| s[0]).collect()
        }

        fn take_callbacks(&self) -> Vec<CompletionCallback> {
            self.scheduled.lock().iter_mut().filter_map(|(_, cb)| cb.take()).collect()
        }
    }

    impl PlaybackSink for MockSink {
        fn format(&self) -> StreamFormat {
            StreamFormat::new(48_000, 1, SampleKind::F32)
        }

        fn schedule_buffer(&self, samples: Vec<f32>, on_complete: CompletionCallback) {
            if self.complete_immediately {
                self.scheduled.lock().push((samples, None));
                on_complete();
            } else {
                self.scheduled.lock().push((samples, Some(on_complete)));
            }
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        fn play(&self) -> Result<(), AudioError> {
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
        }
    }

    /// One sample per packet carrying its tag; tag 255 fails to render
    struct TagRenderer;

    impl PacketRenderer for TagRenderer {
        fn render(&self, packet: &AudioPacket) -> Option<Vec<f32>> {
            match packet.payload[0] {
                255 => None,
                tag => Some(vec![tag as f32]),
            }
        }
    }

    fn scheduler(sink: Arc<MockSink>, target_ms: u32) -> (PlaybackScheduler, crossbeam_channel::Receiver<AudioEvent>) {
        let (events, rx) = EventSink::channel();
        let config = JitterConfig {
            target_ms,
            ..JitterConfig::default()
        };
        let scheduler = PlaybackScheduler::new(config, CodecMode::Opus, sink, Arc::new(TagRenderer), events);
        (scheduler, rx)
    }

    fn packet(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 40])
    }

    #[test]
    fn test_target_reached_schedules_in_order_and_plays() {
        let sink = Arc::new(MockSink::default());
        let (scheduler, events) = scheduler(sink.clone(), 100);
        let t0 = Instant::now();

        for i in 0..5u8 {
            scheduler.enqueue_at(packet(i), t0 + Duration::from_millis(i as u64 * 20));
        }

        assert_eq!(sink.played(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(sink.is_playing());
        assert_eq!(scheduler.state(), PlaybackState::Playing);

        let states: Vec<_> = events.try_iter().collect();
        assert!(states.contains(&AudioEvent::PlaybackState { state: PlaybackState::Playing }));
    }

    #[test]
    fn test_completions_drain_to_idle() {
        let sink = Arc::new(MockSink::default());
        let (scheduler, _events) = scheduler(sink.clone(), 40);
        let t0 = Instant::now();

        scheduler.enqueue_at(packet(1), t0);
        scheduler.enqueue_at(packet(2), t0);
        assert_eq!(scheduler.stats().scheduled, 2);

        for on_complete in sink.take_callbacks() {
            on_complete();
        }
        assert_eq!(scheduler.state(), PlaybackState::Idle);
        assert_eq!(scheduler.stats().completed, 2);
    }

    #[test]
    fn test_reentrant_completion_keeps_order() {
        let sink = Arc::new(MockSink::immediate());
        let (scheduler, _events) = scheduler(sink.clone(), 40);
        let t0 = Instant::now();

        scheduler.enqueue_at(packet(1), t0);
        scheduler.enqueue_at(packet(2), t0);
        for i in 3..8u8 {
            scheduler.enqueue_at(packet(i), t0 + Duration::from_millis(i as u64));
        }

        let played = sink.played();
        let mut sorted = played.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(played, sorted);
        assert_eq!(scheduler.stats().scheduled, 0);
    }

    #[test]
    fn test_stale_completions_ignored_after_reset() {
        let sink = Arc::new(MockSink::default());
        let (scheduler, _events) = scheduler(sink.clone(), 40);
        let t0 = Instant::now();

        scheduler.enqueue_at(packet(1), t0);
        scheduler.enqueue_at(packet(2), t0);
        let callbacks = sink.take_callbacks();

        scheduler.reset();
        scheduler.reset();
        for on_complete in callbacks {
            on_complete();
        }

        let stats = scheduler.stats();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.scheduled, 0);
        assert_eq!(scheduler.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_render_failure_frees_its_slot() {
        let sink = Arc::new(MockSink::default());
        let (scheduler, _events) = scheduler(sink.clone(), 40);
        let t0 = Instant::now();

        scheduler.enqueue_at(packet(255), t0);
        scheduler.enqueue_at(packet(7), t0);

        assert_eq!(sink.played(), vec![7.0]);
        let stats = scheduler.stats();
        assert_eq!(stats.render_failures, 1);
        assert_eq!(stats.scheduled, 1);
    }

    #[test]
    fn test_set_target_returns_clamped_value() {
        let sink = Arc::new(MockSink::default());
        let (scheduler, events) = scheduler(sink, 100);

        assert_eq!(scheduler.set_target_ms(9_999), 500);
        assert_eq!(scheduler.set_target_ms(0), 40);
        let changes: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, AudioEvent::BufferChanged { auto: false, .. }))
            .collect();
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_concurrent_receive_and_completion() {
        let sink = Arc::new(MockSink::default());
        let (scheduler, _events) = scheduler(sink.clone(), 40);

        let producer = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                for i in 0..500u32 {
                    scheduler.enqueue(packet((i % 200) as u8));
                }
            })
        };
        let consumer = {
            let sink = sink.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    for on_complete in sink.take_callbacks() {
                        on_complete();
                    }
                    thread::yield_now();
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
        for on_complete in sink.take_callbacks() {
            on_complete();
        }

        let stats = scheduler.stats();
        assert!(stats.scheduled <= 5);
        assert_eq!(stats.received, 500);
        assert_eq!(stats.dispatched, stats.completed + stats.scheduled as u64);
    }
}
