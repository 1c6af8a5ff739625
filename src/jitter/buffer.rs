//! Jitter buffer state machine
//!
//! Pure state: no locks, no clocks, no I/O. Every operation takes the current
//! `Instant` and returns an [`Evaluation`] describing what the caller must do
//! once it has released the lock (packets to hand to the sink, events to
//! emit, whether the sink should be started).
//!
//! ```text
//!            arrival                 queued >= target
//!   Idle ─────────────▶ Buffering ─────────────────────▶ Playing ──┐
//!    ▲                      ▲                              │  ▲     │ arrival:
//!    │                      │ underrun / target increase   │  └─────┘ flush now
//!    │                      └──────────────────────────────┤
//!    └─────────────────────────────────────────────────────┘
//!              last buffer completed and queue empty
//! ```

use bytes::Bytes;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::codec::CodecMode;
use crate::config::{clamp_target_ms, JitterConfig};
use crate::events::AudioEvent;
use crate::jitter::policy::{build_policy, AdjustmentPolicy};

/// A received packet waiting for playback
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub payload: Bytes,
    pub arrival: Instant,
    /// Codec active when the packet was queued
    pub codec: CodecMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No data, nothing scheduled
    Idle,
    /// Accumulating audio before (re)starting playback
    Buffering,
    /// Buffers are being handed to the sink as they arrive
    Playing,
}

/// Work produced by one pass of the state machine
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Packets now owned by the sink, in playback order
    pub dispatch: Vec<AudioPacket>,
    pub events: Vec<AudioEvent>,
    /// Playback just entered `Playing`
    pub start_sink: bool,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    received: u64,
    dispatched: u64,
    completed: u64,
    dropped_overflow: u64,
    dropped_lookahead: u64,
    dropped_flush: u64,
    underruns: u64,
    render_failures: u64,
}

/// Snapshot of the buffer for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct JitterStats {
    pub state: PlaybackState,
    pub target_ms: u32,
    pub queued_packets: usize,
    pub queued_ms: u32,
    pub scheduled: usize,
    pub received: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub dropped_overflow: u64,
    pub dropped_lookahead: u64,
    pub dropped_flush: u64,
    pub underruns: u64,
    pub render_failures: u64,
}

impl JitterStats {
    /// Packets discarded for any reason
    pub fn dropped(&self) -> u64 {
        self.dropped_overflow + self.dropped_lookahead + self.dropped_flush
    }
}

pub struct JitterBuffer {
    config: JitterConfig,
    codec: CodecMode,
    queue: VecDeque<AudioPacket>,
    /// Payload bytes currently queued, for exact PCM durations
    queued_bytes: usize,
    target_ms: u32,
    state: PlaybackState,
    /// Buffers handed to the sink and not yet completed
    scheduled: usize,
    auto_adjust: bool,
    policy: Box<dyn AdjustmentPolicy>,
    /// When the sink last drained completely; cleared once accounted for
    drained_at: Option<Instant>,
    counters: Counters,
}

impl JitterBuffer {
    pub fn new(config: JitterConfig, codec: CodecMode, now: Instant) -> Self {
        let config = config.validated();
        let policy = build_policy(config.adjustment, now);

        Self {
            target_ms: config.target_ms,
            auto_adjust: config.auto_adjust,
            config,
            codec,
            queue: VecDeque::new(),
            queued_bytes: 0,
            state: PlaybackState::Idle,
            scheduled: 0,
            policy,
            drained_at: None,
            counters: Counters::default(),
        }
    }

    // ---- queries ---------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn target_ms(&self) -> u32 {
        self.target_ms
    }

    pub fn is_buffering(&self) -> bool {
        self.state == PlaybackState::Buffering
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    pub fn has_scheduled_buffers(&self) -> bool {
        self.scheduled > 0
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Playback duration of the packets not yet handed to the sink
    pub fn queued_ms(&self) -> u32 {
        self.codec.duration_ms(self.queue.len(), self.queued_bytes)
    }

    pub fn auto_adjust(&self) -> bool {
        self.auto_adjust
    }

    pub fn codec(&self) -> CodecMode {
        self.codec
    }

    pub fn config(&self) -> &JitterConfig {
        &self.config
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn stats(&self) -> JitterStats {
        let c = &self.counters;
        JitterStats {
            state: self.state,
            target_ms: self.target_ms,
            queued_packets: self.queue.len(),
            queued_ms: self.queued_ms(),
            scheduled: self.scheduled,
            received: c.received,
            dispatched: c.dispatched,
            completed: c.completed,
            dropped_overflow: c.dropped_overflow,
            dropped_lookahead: c.dropped_lookahead,
            dropped_flush: c.dropped_flush,
            underruns: c.underruns,
            render_failures: c.render_failures,
        }
    }

    // ---- operations ------------------------------------------------------

    /// A packet arrived from the network
    pub fn push(&mut self, payload: Bytes, now: Instant) -> Evaluation {
        let mut eval = Evaluation::default();
        self.counters.received += 1;
        self.policy.observe_arrival(now);

        if self.state == PlaybackState::Idle {
            // The peer streams continuously, so audio arriving after the sink
            // drained means the sink ran dry, however long the stall was.
            if let Some(drained) = self.drained_at.take() {
                tracing::debug!(
                    stalled_ms = now.saturating_duration_since(drained).as_millis() as u64,
                    "Audio resumed after the sink drained"
                );
                self.handle_underrun(now, &mut eval);
            }
            self.set_state(PlaybackState::Buffering, &mut eval);
        }

        self.queued_bytes += payload.len();
        self.queue.push_back(AudioPacket {
            payload,
            arrival: now,
            codec: self.codec,
        });

        self.evaluate(now, &mut eval);
        eval
    }

    /// The sink finished one scheduled buffer
    pub fn complete(&mut self, now: Instant) -> Evaluation {
        let mut eval = Evaluation::default();
        if self.scheduled == 0 {
            tracing::trace!("Completion with nothing scheduled ignored");
            return eval;
        }
        self.scheduled -= 1;
        self.counters.completed += 1;
        self.evaluate(now, &mut eval);
        eval
    }

    /// The sink reported that it ran dry
    pub fn underrun(&mut self, now: Instant) -> Evaluation {
        let mut eval = Evaluation::default();
        self.handle_underrun(now, &mut eval);
        self.evaluate(now, &mut eval);
        eval
    }

    /// Periodic evaluation without a triggering event
    pub fn tick(&mut self, now: Instant) -> Evaluation {
        let mut eval = Evaluation::default();
        self.evaluate(now, &mut eval);
        eval
    }

    /// Manual target override, clamped to the accepted range.
    ///
    /// A larger target resets the queue and re-buffers so the listener
    /// actually gets the extra delay.
    pub fn set_target(&mut self, requested_ms: u32, now: Instant) -> Evaluation {
        let mut eval = Evaluation::default();
        let previous = self.target_ms;

        if self.retarget(requested_ms, false, &mut eval) && self.target_ms > previous {
            self.flush_queue();
            self.set_state(PlaybackState::Buffering, &mut eval);
        }

        self.evaluate(now, &mut eval);
        eval
    }

    pub fn set_auto_adjust(&mut self, enabled: bool, now: Instant) {
        if enabled && !self.auto_adjust {
            self.policy.reset(now);
        }
        self.auto_adjust = enabled;
    }

    /// Switch payload codec. Queued packets of the old codec are discarded.
    pub fn set_codec(&mut self, codec: CodecMode) -> Evaluation {
        let mut eval = Evaluation::default();
        if codec == self.codec {
            return eval;
        }
        self.codec = codec;
        self.drained_at = None;
        self.flush_queue();
        self.set_state(PlaybackState::Buffering, &mut eval);
        eval
    }

    /// Session teardown: forget queued and in-flight audio
    pub fn reset(&mut self, now: Instant) {
        self.flush_queue();
        self.scheduled = 0;
        self.state = PlaybackState::Idle;
        self.drained_at = None;
        self.policy.reset(now);
    }

    pub fn record_render_failure(&mut self) {
        self.counters.render_failures += 1;
    }

    // ---- internals -------------------------------------------------------

    fn evaluate(&mut self, now: Instant, eval: &mut Evaluation) {
        if self.auto_adjust {
            if let Some(proposed) = self.policy.on_evaluate(now, self.target_ms) {
                self.retarget(proposed, true, eval);
            }
        }

        self.trim_overflow();

        if self.state == PlaybackState::Buffering && !self.queue.is_empty() {
            let target = Duration::from_millis(self.target_ms as u64);
            let enough = self.queued_ms() >= self.target_ms;
            // Arrivals stopped before the target was reached; play the tail
            // rather than stranding it.
            let stalled = self
                .queue
                .back()
                .map_or(false, |last| now.saturating_duration_since(last.arrival) >= target);

            if enough || stalled {
                self.set_state(PlaybackState::Playing, eval);
                eval.start_sink = true;
            }
        }

        if self.state == PlaybackState::Playing {
            self.fill_sink(eval);
            self.trim_lookahead();

            if self.scheduled == 0 && self.queue.is_empty() {
                self.set_state(PlaybackState::Idle, eval);
                self.drained_at = Some(now);
            }
        }
    }

    fn handle_underrun(&mut self, now: Instant, eval: &mut Evaluation) {
        self.drained_at = None;
        self.counters.underruns += 1;
        tracing::debug!(target_ms = self.target_ms, "Playback underrun");

        if self.auto_adjust {
            if let Some(proposed) = self.policy.on_underrun(now, self.target_ms) {
                self.retarget(proposed, true, eval);
            }
        }
        self.set_state(PlaybackState::Buffering, eval);
    }

    /// Apply a new target. Returns whether it changed.
    fn retarget(&mut self, requested_ms: u32, auto: bool, eval: &mut Evaluation) -> bool {
        let target = clamp_target_ms(requested_ms);
        if target == self.target_ms {
            return false;
        }

        let previous = self.target_ms;
        self.target_ms = target;
        tracing::info!(from = previous, to = target, auto, "Jitter buffer target changed");
        eval.events.push(AudioEvent::BufferChanged { target_ms: target, auto });

        if target > previous && self.state == PlaybackState::Playing {
            self.set_state(PlaybackState::Buffering, eval);
        }
        true
    }

    fn set_state(&mut self, state: PlaybackState, eval: &mut Evaluation) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "Playback state");
            self.state = state;
            eval.events.push(AudioEvent::PlaybackState { state });
        }
    }

    fn fill_sink(&mut self, eval: &mut Evaluation) {
        while self.scheduled < self.config.max_scheduled {
            let Some(packet) = self.pop_front() else { break };
            self.scheduled += 1;
            self.counters.dispatched += 1;
            eval.dispatch.push(packet);
        }
    }

    /// Drop the oldest packets once the queue exceeds `target * factor`
    fn trim_overflow(&mut self) {
        let limit = self.target_ms as f32 * self.config.overflow_factor;
        if self.queued_ms() as f32 <= limit {
            return;
        }

        let mut dropped = 0u64;
        while self.queue.len() > self.config.min_retained && self.queued_ms() > self.target_ms {
            self.pop_front();
            dropped += 1;
        }

        if dropped > 0 {
            self.counters.dropped_overflow += dropped;
            tracing::warn!(dropped, queued_ms = self.queued_ms(), target_ms = self.target_ms, "Jitter buffer overflow");
        }
    }

    /// At the sink's look-ahead cap keep only a small unscheduled reserve
    fn trim_lookahead(&mut self) {
        if self.scheduled < self.config.max_scheduled {
            return;
        }

        let reserve = self.config.lookahead_reserve;
        if self.queue.len() <= reserve {
            return;
        }

        let excess = self.queue.len() - reserve;
        for _ in 0..excess {
            self.pop_front();
        }
        self.counters.dropped_lookahead += excess as u64;
        tracing::debug!(dropped = excess, "Look-ahead backlog trimmed");
    }

    fn flush_queue(&mut self) {
        let flushed = self.queue.len() as u64;
        self.queue.clear();
        self.queued_bytes = 0;
        self.counters.dropped_flush += flushed;
    }

    fn pop_front(&mut self) -> Option<AudioPacket> {
        let packet = self.queue.pop_front()?;
        self.queued_bytes -= packet.payload.len();
        Some(packet)
    }
}
