// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rolling Statistics
//!
//! Fixed-capacity circular buffer of timestamped samples for one
//! `(agent, metric)` pair. Pushing is O(1); once full the oldest slot is
//! overwritten. Every accessor degrades to `0.0` (or `Trend::Unknown`) when
//! there is not enough data, so callers never handle an error path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coefficient of variation above which a series is reported as volatile.
const VOLATILITY_CV: f64 = 0.5;

/// Slopes with a smaller magnitude (units per second) count as flat.
const FLAT_SLOPE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    value: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Stable,
    Improving,
    Degrading,
    Volatile,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct RollingStatistics {
    samples: Vec<Sample>,
    capacity: usize,
    /// Next slot to write once the buffer is full.
    head: usize,
}

impl RollingStatistics {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn push(&mut self, value: f64, at: DateTime<Utc>) {
        let sample = Sample { value, at };
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.head] = sample;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Held samples from oldest to newest.
    fn ordered(&self) -> impl Iterator<Item = &Sample> {
        let (newer, older) = self.samples.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    pub fn values(&self) -> Vec<f64> {
        self.ordered().map(|s| s.value).collect()
    }

    pub fn last(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let idx = if self.samples.len() < self.capacity {
            self.samples.len() - 1
        } else {
            (self.head + self.capacity - 1) % self.capacity
        };
        Some(self.samples[idx].value)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.ordered().last().map(|s| s.at)
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.value).sum::<f64>() / self.samples.len() as f64
    }

    /// Population variance of the held samples.
    pub fn variance(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.samples
            .iter()
            .map(|s| (s.value - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Mean of the `n` most recent samples (all of them when fewer are held).
    pub fn recent_mean(&self, n: usize) -> f64 {
        let held = self.samples.len();
        if held == 0 || n == 0 {
            return 0.0;
        }
        let take = n.min(held);
        let skip = held - take;
        self.ordered().skip(skip).map(|s| s.value).sum::<f64>() / take as f64
    }

    /// Least-squares slope of value against time, in units per second.
    pub fn slope(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let origin = match self.ordered().next() {
            Some(first) => first.at,
            None => return 0.0,
        };
        let points: Vec<(f64, f64)> = self
            .ordered()
            .map(|s| {
                let dt = (s.at - origin).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
                (dt, s.value)
            })
            .collect();

        let n = n as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let (mut num, mut den) = (0.0, 0.0);
        for (x, y) in &points {
            num += (x - mean_x) * (y - mean_y);
            den += (x - mean_x).powi(2);
        }
        if den == 0.0 {
            return 0.0;
        }
        num / den
    }

    /// Standard score of `value` against the held samples; `0.0` when the
    /// spread is zero.
    pub fn z_score(&self, value: f64) -> f64 {
        let stddev = self.stddev();
        if stddev == 0.0 || !stddev.is_finite() {
            return 0.0;
        }
        (value - self.mean()) / stddev
    }

    /// Direction of the series. `rising_is_worse` orients the slope for the
    /// metric being tracked.
    pub fn trend(&self, rising_is_worse: bool) -> Trend {
        if self.samples.len() < 2 {
            return Trend::Unknown;
        }
        let mean = self.mean();
        if mean != 0.0 && self.stddev() / mean.abs() > VOLATILITY_CV {
            return Trend::Volatile;
        }
        let slope = self.slope();
        if slope.abs() < FLAT_SLOPE {
            Trend::Stable
        } else if (slope > 0.0) == rising_is_worse {
            Trend::Degrading
        } else {
            Trend::Improving
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn filled(values: impl IntoIterator<Item = f64>, capacity: usize) -> RollingStatistics {
        let start = Utc::now();
        let mut stats = RollingStatistics::new(capacity);
        for (i, v) in values.into_iter().enumerate() {
            stats.push(v, start + Duration::seconds(i as i64));
        }
        stats
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_statistics_degrade_to_zero() {
        let stats = RollingStatistics::new(8);
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.slope(), 0.0);
        assert_eq!(stats.z_score(42.0), 0.0);
        assert_eq!(stats.last(), None);
        assert_eq!(stats.trend(true), Trend::Unknown);
    }

    #[test]
    fn test_mean_and_variance_below_capacity() {
        let stats = filled([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 16);
        assert!(approx(stats.mean(), 5.0));
        assert!(approx(stats.variance(), 4.0));
        assert!(approx(stats.stddev(), 2.0));
    }

    #[test]
    fn test_overflow_keeps_most_recent_window() {
        let stats = filled((1..=300).map(|v| v as f64), 256);
        assert_eq!(stats.len(), 256);
        let expected = (45..=300).map(|v| v as f64).sum::<f64>() / 256.0;
        assert!(approx(stats.mean(), expected));
        assert_eq!(stats.last(), Some(300.0));
        assert_eq!(stats.values().first().copied(), Some(45.0));
    }

    #[test]
    fn test_slope_of_linear_series() {
        let stats = filled((0..10).map(|v| 3.0 * v as f64 + 100.0), 32);
        assert!(approx(stats.slope(), 3.0));
        assert_eq!(stats.trend(true), Trend::Degrading);
        assert_eq!(stats.trend(false), Trend::Improving);
    }

    #[test]
    fn test_slope_needs_two_samples() {
        let stats = filled([5.0], 4);
        assert_eq!(stats.slope(), 0.0);
    }

    #[test]
    fn test_z_score_zero_spread_guard() {
        let stats = filled([7.0; 5], 8);
        assert_eq!(stats.z_score(100.0), 0.0);
    }

    #[test]
    fn test_z_score() {
        let stats = filled([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 16);
        assert!(approx(stats.z_score(9.0), 2.0));
    }

    #[test]
    fn test_recent_mean_after_wraparound() {
        let stats = filled((1..=10).map(|v| v as f64), 4);
        assert!(approx(stats.recent_mean(2), 9.5));
        assert!(approx(stats.recent_mean(100), 8.5));
    }
}
