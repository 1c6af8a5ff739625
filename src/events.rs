//! Observability events emitted by the pipeline
//!
//! Events are fire-and-forget: producers use `try_send` on a bounded channel
//! and drop the event when nobody keeps up, so emitting never blocks a lock
//! holder or an audio callback.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::jitter::PlaybackState;

/// Capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioEvent {
    /// The jitter target delay changed
    BufferChanged { target_ms: u32, auto: bool },
    /// Normalized microphone peak level in `[0, 1]`
    AudioLevel { level: f32 },
    /// The playback state machine moved
    PlaybackState { state: PlaybackState },
}

/// Sending half shared by every emitter
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<AudioEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<AudioEvent>) -> Self {
        Self { tx }
    }

    /// Channel pair with the default capacity
    pub fn channel() -> (Self, Receiver<AudioEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: AudioEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "Event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
