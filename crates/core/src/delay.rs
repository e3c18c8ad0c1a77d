use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inclusive millisecond range a human-pacing delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    /// Pause between two text chunks.
    pub const CHUNK: DelayRange = DelayRange::new(1000, 3000);
    /// Pause before each property card reveal.
    pub const ITEM: DelayRange = DelayRange::new(2000, 4000);
    pub const ZERO: DelayRange = DelayRange::new(0, 0);

    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Draw one delay. A reversed range is treated as its mirror.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        Duration::from_millis(rng.gen_range(lo..=hi))
    }

    pub fn contains(&self, delay: Duration) -> bool {
        let ms = delay.as_millis();
        let lo = u128::from(self.min_ms.min(self.max_ms));
        let hi = u128::from(self.min_ms.max(self.max_ms));
        ms >= lo && ms <= hi
    }
}
