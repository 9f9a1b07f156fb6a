//! Per-key sliding window buffers
//!
//! A [`WindowBuffer`] holds the `(timestamp, value)` pairs of one entity key
//! for one aggregation, ordered by event time. Entries older than
//! `newest - window` are evicted after every insert, so the buffer always
//! covers the trailing window ending at the newest event seen for the key.
//!
//! Late rows that are still inside the watermark are inserted at their
//! time-ordered position; if that position is already outside the window
//! they are evicted straight away and never affect the result.

use crate::{AggregationFunction, FeatureValue};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::Duration;

/// Time-ordered buffer for one aggregation of one entity key
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    function: AggregationFunction,
    window: chrono::Duration,
    entries: VecDeque<(DateTime<Utc>, FeatureValue)>,
}

impl WindowBuffer {
    pub fn new(function: AggregationFunction, window: Duration) -> Self {
        Self {
            function,
            window: chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::max_value()),
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest buffered timestamp
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.entries.back().map(|(ts, _)| *ts)
    }

    /// Inserts a value after any entries with an equal timestamp, then evicts
    pub fn insert(&mut self, timestamp: DateTime<Utc>, value: FeatureValue) {
        let pos = self.entries.partition_point(|(ts, _)| *ts <= timestamp);
        self.entries.insert(pos, (timestamp, value));
        self.evict();
    }

    /// Drops entries older than `newest - window`
    pub fn evict(&mut self) {
        let Some(newest) = self.newest() else {
            return;
        };
        let Some(cutoff) = newest.checked_sub_signed(self.window) else {
            return;
        };
        while matches!(self.entries.front(), Some((ts, _)) if *ts < cutoff) {
            self.entries.pop_front();
        }
    }

    /// Current aggregate over the buffered entries
    ///
    /// Null values are skipped by sum, average, max and min but counted by
    /// count. An empty (or all-null) buffer yields null, except count which
    /// yields 0.
    pub fn value(&self) -> FeatureValue {
        let non_null = || self.entries.iter().map(|(_, v)| v).filter(|v| !v.is_null());

        match self.function {
            AggregationFunction::Count => FeatureValue::Int(self.entries.len() as i64),
            AggregationFunction::Sum => sum(non_null()),
            AggregationFunction::Average => {
                let values: Vec<f64> = non_null().filter_map(FeatureValue::as_f64).collect();
                if values.is_empty() {
                    FeatureValue::Null
                } else {
                    FeatureValue::Float(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggregationFunction::Max => extreme(non_null(), Ordering::Greater),
            AggregationFunction::Min => extreme(non_null(), Ordering::Less),
        }
    }
}

/// Integer sum while every value is an integer, float sum otherwise
///
/// Integer sums saturate at the `i64` bounds so an int64 column always
/// yields an int64 feature.
fn sum<'a>(values: impl Iterator<Item = &'a FeatureValue>) -> FeatureValue {
    let mut int_sum: Option<i128> = Some(0);
    let mut float_sum = 0.0;
    let mut seen = false;

    for value in values {
        let Some(f) = value.as_f64() else {
            continue;
        };
        seen = true;
        float_sum += f;
        int_sum = match (int_sum, value) {
            (Some(acc), FeatureValue::Int(v)) => Some(acc + i128::from(*v)),
            _ => None,
        };
    }

    match (seen, int_sum) {
        (false, _) => FeatureValue::Null,
        (true, Some(total)) => {
            FeatureValue::Int(total.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
        }
        (true, None) => FeatureValue::Float(float_sum),
    }
}

/// Max (`Greater`) or min (`Less`); on ties the later entry wins
fn extreme<'a>(values: impl Iterator<Item = &'a FeatureValue>, wanted: Ordering) -> FeatureValue {
    let mut best: Option<&FeatureValue> = None;
    for value in values {
        best = match best {
            None => Some(value),
            Some(current) => match value.compare(current) {
                Some(ord) if ord == wanted || ord == Ordering::Equal => Some(value),
                _ => Some(current),
            },
        };
    }
    best.cloned().unwrap_or(FeatureValue::Null)
}
