//! Adaptive jitter buffer
//!
//! [`JitterBuffer`] is the pure state machine, [`PlaybackScheduler`] the
//! locked handle that connects it to a playback sink, and the
//! [`AdjustmentPolicy`] implementations decide how the target delay moves.

pub mod buffer;
pub mod policy;
pub mod scheduler;

pub use buffer::{AudioPacket, Evaluation, JitterBuffer, JitterStats, PlaybackState};
pub use policy::{build_policy, AdjustmentPolicy, ReactivePolicy, VariancePolicy};
pub use scheduler::{PacketRenderer, PlaybackScheduler};
