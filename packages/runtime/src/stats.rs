//! Execution-time statistics for workers and executor pools.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Running min/max/mean aggregation over task durations.
///
/// Cheap to update per task and mergeable, so per-executor statistics can be
/// folded into one pool-level view on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceStatistics {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl PerformanceStatistics {
    /// Creates an empty aggregation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one task duration.
    pub fn update(&mut self, sample: Duration) {
        self.count += 1;
        self.total += sample;
        self.min = Some(self.min.map_or(sample, |current| current.min(sample)));
        self.max = Some(self.max.map_or(sample, |current| current.max(sample)));
    }

    /// Folds another aggregation into this one.
    pub fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.total += other.total;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Number of recorded tasks.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sum of all recorded durations.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Shortest recorded duration.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    /// Longest recorded duration.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Mean duration, or `None` before the first sample.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        Some(self.total / u32::try_from(self.count).unwrap_or(u32::MAX))
    }

    /// Serializable snapshot in milliseconds.
    #[must_use]
    pub fn summary(&self) -> StatisticsSummary {
        let to_ms = |duration: Duration| duration.as_secs_f64() * 1_000.0;
        StatisticsSummary {
            count: self.count,
            min_ms: self.min.map(to_ms).unwrap_or_default(),
            max_ms: self.max.map(to_ms).unwrap_or_default(),
            mean_ms: self.mean().map(to_ms).unwrap_or_default(),
        }
    }
}

/// Snapshot of a [`PerformanceStatistics`] aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    /// Number of recorded tasks.
    pub count: u64,
    /// Shortest duration in milliseconds (0 when empty).
    pub min_ms: f64,
    /// Longest duration in milliseconds (0 when empty).
    pub max_ms: f64,
    /// Mean duration in milliseconds (0 when empty).
    pub mean_ms: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_tracks_min_max_and_mean() {
        let mut stats = PerformanceStatistics::new();
        assert_eq!(stats.mean(), None);

        stats.update(Duration::from_millis(10));
        stats.update(Duration::from_millis(30));
        stats.update(Duration::from_millis(20));

        assert_eq!(stats.count(), 3);
        assert_eq!(stats.min(), Some(Duration::from_millis(10)));
        assert_eq!(stats.max(), Some(Duration::from_millis(30)));
        assert_eq!(stats.mean(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn merge_combines_disjoint_aggregations() {
        let mut a = PerformanceStatistics::new();
        a.update(Duration::from_millis(5));

        let mut b = PerformanceStatistics::new();
        b.update(Duration::from_millis(15));
        b.update(Duration::from_millis(25));

        a.merge(&b);
        assert_eq!(a.count(), 3);
        assert_eq!(a.min(), Some(Duration::from_millis(5)));
        assert_eq!(a.max(), Some(Duration::from_millis(25)));
        assert_eq!(a.total(), Duration::from_millis(45));

        let mut empty = PerformanceStatistics::new();
        empty.merge(&a);
        assert_eq!(empty, a);
    }

    #[test]
    fn summary_is_serializable() {
        let mut stats = PerformanceStatistics::new();
        stats.update(Duration::from_millis(8));

        let summary = stats.summary();
        assert_eq!(summary.count, 1);
        let json = serde_json::to_string(&summary).unwrap();
        let back: StatisticsSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
