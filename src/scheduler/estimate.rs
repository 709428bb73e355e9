//! Poll rate estimation
//!
//! Turns the recent posting history of a term into a target number of polls
//! per day. Faster-moving terms are polled more often, bounded on both sides
//! by the configured minimum and maximum.

use std::time::Duration;

use crate::config::EstimatorConfig;
use crate::models::Sample;

/// Seconds in one day
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Estimates polls per day from item samples
#[derive(Debug, Clone)]
pub struct RateEstimator {
    config: EstimatorConfig,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl RateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Target polls per day for a set of samples, in any order.
    ///
    /// - fewer than two samples: the minimum rate
    /// - all samples at the same instant: the maximum rate
    /// - otherwise `multiplier * items_per_day / items_per_poll`, clamped and
    ///   rounded up
    pub fn estimate(&self, samples: &[Sample]) -> u32 {
        let min = self.config.min_scrapes_per_day;
        let max = self.config.max_scrapes_per_day.max(min);

        if samples.len() < 2 {
            return min;
        }

        let earliest = samples.iter().map(|s| s.created_at).min().unwrap_or(0);
        let latest = samples.iter().map(|s| s.created_at).max().unwrap_or(0);
        let span = latest.saturating_sub(earliest);
        if span <= 0 {
            return max;
        }

        let avg_interval = span as f64 / (samples.len() - 1) as f64;
        let items_per_day = SECONDS_PER_DAY as f64 / avg_interval;
        let raw = self.config.buffer_multiplier * (items_per_day / self.config.items_per_poll);

        // NaN from a degenerate config falls through to the minimum
        let clamped = raw.clamp(min as f64, max as f64);
        if clamped.is_nan() {
            return min;
        }
        (clamped.ceil() as u32).clamp(min, max)
    }

    /// Polling interval for a set of samples
    pub fn interval_for(&self, samples: &[Sample]) -> Duration {
        interval_from_polls(self.estimate(samples))
    }
}

/// Interval between polls for a daily poll count
pub fn interval_from_polls(polls_per_day: u32) -> Duration {
    Duration::from_secs_f64(SECONDS_PER_DAY as f64 / polls_per_day.max(1) as f64)
}
