//! Memory pressure: the probe seam and the load-based fallback estimate.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the 0-100 memory pressure signal.
///
/// The signal is purely a backpressure input; it does not need to be
/// accurate, only monotone-ish with real memory use. A probe that cannot
/// produce a reading returns `None` and the queue falls back to
/// [`fallback_pressure`]. Tests substitute [`FixedProbe`].
pub trait PressureProbe: Send + Sync {
    fn sample(&self) -> Option<f64>;
}

/// A settable probe for tests and for hosts that compute pressure
/// externally (e.g. from an allocator or cgroup statistic).
#[derive(Debug)]
pub struct FixedProbe(AtomicU64);

impl FixedProbe {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl PressureProbe for FixedProbe {
    fn sample(&self) -> Option<f64> {
        Some(f64::from_bits(self.0.load(Ordering::Relaxed)))
    }
}

/// Estimate pressure from queue load when no probe reading is available.
///
/// Weighted sum of backlog and slot saturation, favoring active load:
/// a full backlog of 10+ items contributes 30 points, full slot usage 70.
pub fn fallback_pressure(queue_len: usize, active: usize, max_concurrent: usize) -> f64 {
    let queue_pressure = ((queue_len as f64 / 10.0) * 30.0).min(100.0);
    let active_pressure = (active as f64 / max_concurrent.max(1) as f64) * 70.0;
    (queue_pressure + active_pressure).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 3, 0.0)]
    #[case(10, 0, 3, 30.0)]
    #[case(0, 3, 3, 70.0)]
    #[case(10, 3, 3, 100.0)]
    #[case(100, 3, 3, 100.0)]
    fn fallback_estimate(
        #[case] queue_len: usize,
        #[case] active: usize,
        #[case] max: usize,
        #[case] expect: f64,
    ) {
        assert_eq!(fallback_pressure(queue_len, active, max), expect);
    }

    #[test]
    fn fallback_never_exceeds_100() {
        assert_eq!(fallback_pressure(1000, 6, 1), 100.0);
    }

    #[test]
    fn fixed_probe_reads_back_what_was_set() {
        let probe = FixedProbe::new(42.0);
        assert_eq!(probe.sample(), Some(42.0));
        probe.set(95.5);
        assert_eq!(probe.sample(), Some(95.5));
    }
}
