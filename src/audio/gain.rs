//! Gain stage and peak-level metering

use std::time::{Duration, Instant};

/// Scale samples in place, saturating at the i16 range
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = (*sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Peak absolute level of every `stride`-th sample, normalized to `[0, 1]`
pub fn peak_level(samples: &[i16], stride: usize) -> f32 {
    let peak = samples
        .iter()
        .step_by(stride.max(1))
        .map(|&s| if s == i16::MIN { i16::MAX } else { s.abs() })
        .max()
        .unwrap_or(0);
    peak as f32 / i16::MAX as f32
}

/// Throttled microphone level meter
#[derive(Debug)]
pub struct LevelMeter {
    stride: usize,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl LevelMeter {
    pub const DEFAULT_STRIDE: usize = 10;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(stride: usize, interval: Duration) -> Self {
        Self {
            stride,
            interval,
            last_emit: None,
        }
    }

    /// Level of `samples` if the throttle interval has elapsed
    pub fn measure(&mut self, samples: &[i16], now: Instant) -> Option<f32> {
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_emit = Some(now);
        Some(peak_level(samples, self.stride))
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STRIDE, Self::DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gain_clamps() {
        let mut samples = [20_000i16, -20_000, 100];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, [i16::MAX, i16::MIN, 200]);
    }

    #[test]
    fn test_unity_gain_is_identity() {
        let mut samples = [1i16, -1, i16::MIN];
        apply_gain(&mut samples, 1.0);
        assert_eq!(samples, [1, -1, i16::MIN]);
    }

    #[test]
    fn test_peak_handles_min_value() {
        assert_eq!(peak_level(&[i16::MIN], 1), 1.0);
        assert_eq!(peak_level(&[], 10), 0.0);
    }

    #[test]
    fn test_peak_uses_stride() {
        let mut samples = vec![0i16; 20];
        samples[5] = 30_000;
        assert_eq!(peak_level(&samples, 10), 0.0);
        samples[10] = 16_000;
        assert!((peak_level(&samples, 10) - 16_000.0 / 32_767.0).abs() < 1e-6);
    }

    #[test]
    fn test_meter_is_throttled() {
        let t0 = Instant::now();
        let mut meter = LevelMeter::default();
        let loud = [i16::MAX; 20];

        assert_eq!(meter.measure(&loud, t0), Some(1.0));
        assert_eq!(meter.measure(&loud, t0 + Duration::from_millis(50)), None);
        assert_eq!(meter.measure(&loud, t0 + Duration::from_millis(100)), Some(1.0));
    }

    proptest! {
        #[test]
        fn prop_level_in_unit_range(samples in prop::collection::vec(any::<i16>(), 0..500), stride in 1usize..20) {
            let level = peak_level(&samples, stride);
            prop_assert!((0.0..=1.0).contains(&level));
        }
    }
}
