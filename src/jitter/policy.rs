//! Auto-adjust strategies for the jitter target
//!
//! Both strategies implement the same contract: given what the buffer
//! observed, propose a new target delay. One strategy is active per session;
//! running both at once would let them fight over the target.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::AdjustmentStrategy;
use crate::constants::{MAX_JITTER_MS, MIN_JITTER_MS};

/// Decides when the jitter target should move.
///
/// Called with the jitter lock held; implementations must be cheap and must
/// not block. Returned targets are clamped again by the buffer.
pub trait AdjustmentPolicy: Send {
    fn name(&self) -> &'static str;

    /// A packet arrived at `now`
    fn observe_arrival(&mut self, _now: Instant) {}

    /// The sink ran dry while audio was still expected
    fn on_underrun(&mut self, now: Instant, target_ms: u32) -> Option<u32>;

    /// Regular evaluation pass (arrival, completion or tick)
    fn on_evaluate(&mut self, now: Instant, target_ms: u32) -> Option<u32>;

    /// Forget history, e.g. when a session restarts
    fn reset(&mut self, now: Instant);
}

/// Build the policy selected in the configuration
pub fn build_policy(strategy: AdjustmentStrategy, now: Instant) -> Box<dyn AdjustmentPolicy> {
    match strategy {
        AdjustmentStrategy::Reactive => Box::new(ReactivePolicy::new(now)),
        AdjustmentStrategy::Variance => Box::new(VariancePolicy::new(now)),
    }
}

// ---------------------------------------------------------------------------
// ReactivePolicy
// ---------------------------------------------------------------------------

/// Underrun-driven adjustment.
///
/// Every underrun grows the target by a large step; after a stable period
/// without underruns the target shrinks by a small step and the stability
/// timer restarts. The result is a slow sawtooth converging on the smallest
/// delay the network tolerates.
#[derive(Debug)]
pub struct ReactivePolicy {
    last_underrun: Instant,
    step_up_ms: u32,
    step_down_ms: u32,
    floor_ms: u32,
    stability_window: Duration,
}

impl ReactivePolicy {
    pub const STEP_UP_MS: u32 = 50;
    pub const STEP_DOWN_MS: u32 = 10;
    pub const STABILITY_WINDOW: Duration = Duration::from_secs(30);

    pub fn new(now: Instant) -> Self {
        Self {
            last_underrun: now,
            step_up_ms: Self::STEP_UP_MS,
            step_down_ms: Self::STEP_DOWN_MS,
            floor_ms: MIN_JITTER_MS,
            stability_window: Self::STABILITY_WINDOW,
        }
    }

    pub fn last_underrun(&self) -> Instant {
        self.last_underrun
    }
}

impl AdjustmentPolicy for ReactivePolicy {
    fn name(&self) -> &'static str {
        "reactive"
    }

    fn on_underrun(&mut self, now: Instant, target_ms: u32) -> Option<u32> {
        self.last_underrun = now;
        let grown = (target_ms + self.step_up_ms).min(MAX_JITTER_MS);
        (grown != target_ms).then_some(grown)
    }

    fn on_evaluate(&mut self, now: Instant, target_ms: u32) -> Option<u32> {
        if target_ms <= self.floor_ms {
            return None;
        }
        if now.saturating_duration_since(self.last_underrun) < self.stability_window {
            return None;
        }
        self.last_underrun = now;
        Some(target_ms.saturating_sub(self.step_down_ms).max(self.floor_ms))
    }

    fn reset(&mut self, now: Instant) {
        self.last_underrun = now;
    }
}

// ---------------------------------------------------------------------------
// VariancePolicy
// ---------------------------------------------------------------------------

/// Predictive adjustment from inter-arrival variance.
///
/// Keeps the last 100 arrival times and estimates jitter as the standard
/// deviation of the intervals between them. Low jitter shrinks the target,
/// high jitter grows it, at most once per throttle period.
#[derive(Debug)]
pub struct VariancePolicy {
    arrivals: VecDeque<Instant>,
    last_adjust: Instant,
}

impl VariancePolicy {
    pub const HISTORY: usize = 100;
    pub const MIN_SAMPLES: usize = 10;
    pub const THROTTLE: Duration = Duration::from_secs(2);
    pub const LOW_JITTER_MS: f64 = 15.0;
    pub const HIGH_JITTER_MS: f64 = 30.0;
    pub const STEP_DOWN_MS: u32 = 10;
    pub const STEP_UP_MS: u32 = 20;
    pub const FLOOR_MS: u32 = 50;

    pub fn new(now: Instant) -> Self {
        Self {
            arrivals: VecDeque::with_capacity(Self::HISTORY),
            last_adjust: now,
        }
    }

    /// Standard deviation of inter-arrival intervals in milliseconds, once
    /// enough arrivals have been seen
    pub fn jitter_ms(&self) -> Option<f64> {
        if self.arrivals.len() < Self::MIN_SAMPLES {
            return None;
        }

        let intervals: Vec<f64> = self
            .arrivals
            .iter()
            .zip(self.arrivals.iter().skip(1))
            .map(|(a, b)| b.saturating_duration_since(*a).as_secs_f64() * 1000.0)
            .collect();

        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
        Some(variance.sqrt())
    }
}

impl AdjustmentPolicy for VariancePolicy {
    fn name(&self) -> &'static str {
        "variance"
    }

    fn observe_arrival(&mut self, now: Instant) {
        if self.arrivals.len() == Self::HISTORY {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(now);
    }

    fn on_underrun(&mut self, _now: Instant, _target_ms: u32) -> Option<u32> {
        None
    }

    fn on_evaluate(&mut self, now: Instant, target_ms: u32) -> Option<u32> {
        if now.saturating_duration_since(self.last_adjust) < Self::THROTTLE {
            return None;
        }
        let jitter = self.jitter_ms()?;

        let proposed = if jitter < Self::LOW_JITTER_MS && target_ms > Self::FLOOR_MS {
            (target_ms - Self::STEP_DOWN_MS).max(Self::FLOOR_MS)
        } else if jitter > Self::HIGH_JITTER_MS && target_ms < MAX_JITTER_MS {
            (target_ms + Self::STEP_UP_MS).min(MAX_JITTER_MS)
        } else {
            return None;
        };

        tracing::trace!(jitter_ms = jitter, from = target_ms, to = proposed, "Variance adjustment");
        self.last_adjust = now;
        Some(proposed)
    }

    fn reset(&mut self, now: Instant) {
        self.arrivals.clear();
        self.last_adjust = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_reactive_grows_on_underrun() {
        let t0 = Instant::now();
        let mut policy = ReactivePolicy::new(t0);

        assert_eq!(policy.on_underrun(t0, 100), Some(150));
        assert_eq!(policy.on_underrun(t0, 480), Some(500));
        assert_eq!(policy.on_underrun(t0, 500), None);
    }

    #[test]
    fn test_reactive_shrinks_after_stable_window() {
        let t0 = Instant::now();
        let mut policy = ReactivePolicy::new(t0);

        assert_eq!(policy.on_evaluate(t0 + ms(29_999), 100), None);
        assert_eq!(policy.on_evaluate(t0 + ms(30_000), 100), Some(90));
        // Timer restarted by the shrink
        assert_eq!(policy.on_evaluate(t0 + ms(31_000), 90), None);
        assert_eq!(policy.on_evaluate(t0 + ms(60_000), 90), Some(80));
    }

    #[test]
    fn test_reactive_floor() {
        let t0 = Instant::now();
        let mut policy = ReactivePolicy::new(t0);

        assert_eq!(policy.on_evaluate(t0 + ms(30_000), 45), Some(40));
        assert_eq!(policy.on_evaluate(t0 + ms(90_000), 40), None);
    }

    #[test]
    fn test_reactive_underrun_restarts_stability() {
        let t0 = Instant::now();
        let mut policy = ReactivePolicy::new(t0);

        policy.on_underrun(t0 + ms(20_000), 100);
        assert_eq!(policy.on_evaluate(t0 + ms(40_000), 150), None);
        assert_eq!(policy.on_evaluate(t0 + ms(50_000), 150), Some(140));
    }

    fn feed(policy: &mut VariancePolicy, start: Instant, intervals: &[u64]) -> Instant {
        let mut t = start;
        policy.observe_arrival(t);
        for &i in intervals {
            t += ms(i);
            policy.observe_arrival(t);
        }
        t
    }

    #[test]
    fn test_variance_needs_samples() {
        let t0 = Instant::now();
        let mut policy = VariancePolicy::new(t0);
        let t = feed(&mut policy, t0, &[20; 5]);

        assert!(policy.jitter_ms().is_none());
        assert_eq!(policy.on_evaluate(t + ms(5_000), 100), None);
    }

    #[test]
    fn test_variance_shrinks_on_steady_arrivals() {
        let t0 = Instant::now();
        let mut policy = VariancePolicy::new(t0);
        let t = feed(&mut policy, t0, &[20; 20]);

        assert!(policy.jitter_ms().unwrap() < 1.0);
        assert_eq!(policy.on_evaluate(t + ms(2_000), 100), Some(90));
        // Throttled
        assert_eq!(policy.on_evaluate(t + ms(2_500), 90), None);
        assert_eq!(policy.on_evaluate(t + ms(5_000), 55), Some(50));
        assert_eq!(policy.on_evaluate(t + ms(8_000), 50), None);
    }

    #[test]
    fn test_variance_grows_on_bursty_arrivals() {
        let t0 = Instant::now();
        let mut policy = VariancePolicy::new(t0);
        let pattern: Vec<u64> = (0..20).map(|i| if i % 2 == 0 { 0 } else { 100 }).collect();
        let t = feed(&mut policy, t0, &pattern);

        assert!(policy.jitter_ms().unwrap() > 30.0);
        assert_eq!(policy.on_evaluate(t + ms(2_000), 100), Some(120));
        assert_eq!(policy.on_underrun(t, 120), None);
    }

    #[test]
    fn test_variance_history_is_bounded() {
        let t0 = Instant::now();
        let mut policy = VariancePolicy::new(t0);
        feed(&mut policy, t0, &[20; 250]);
        assert_eq!(policy.arrivals.len(), VariancePolicy::HISTORY);
    }
}
