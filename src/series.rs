// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

//! Date-indexed numeric series and the handful of statistics the risk engines share.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Trading days per year used for annualization
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Ordered daily series keyed by calendar date
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    points: BTreeMap<NaiveDate, f64>,
}

impl TimeSeries {
    /// Create an empty series
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from (date, value) pairs; later duplicates win
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        Self {
            points: pairs.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, date: NaiveDate, value: f64) {
        self.points.insert(date, value);
    }

    pub fn get(&self, date: &NaiveDate) -> Option<f64> {
        self.points.get(date).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.keys().next_back().copied()
    }

    /// Most recent value
    pub fn last_value(&self) -> Option<f64> {
        self.points.values().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.points.iter().map(|(d, v)| (*d, *v))
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.keys().copied()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.values().copied().collect()
    }

    /// Inclusive date range; `None` bounds are open
    pub fn range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            points: self
                .points
                .iter()
                .filter(|(d, _)| start.map_or(true, |s| **d >= s) && end.map_or(true, |e| **d <= e))
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }

    /// Drop NaN and infinite observations
    pub fn finite(&self) -> Self {
        Self {
            points: self
                .points
                .iter()
                .filter(|(_, v)| v.is_finite())
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            points: self.points.iter().map(|(d, v)| (*d, f(*v))).collect(),
        }
    }

    /// Inner join on dates, yielding (date, self, other)
    pub fn align(&self, other: &TimeSeries) -> Vec<(NaiveDate, f64, f64)> {
        self.points
            .iter()
            .filter_map(|(d, a)| other.points.get(d).map(|b| (*d, *a, *b)))
            .collect()
    }

    /// Element-wise difference on common dates
    pub fn difference(&self, other: &TimeSeries) -> TimeSeries {
        TimeSeries::from_pairs(self.align(other).into_iter().map(|(d, a, b)| (d, a - b)))
    }

    /// Value carried forward onto each date of `index`; `None` before the first observation
    pub fn forward_fill_onto(&self, index: &[NaiveDate]) -> Vec<Option<f64>> {
        index
            .iter()
            .map(|d| self.points.range(..=*d).next_back().map(|(_, v)| *v))
            .collect()
    }
}

impl FromIterator<(NaiveDate, f64)> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, f64)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_align_and_difference() {
        let a = TimeSeries::from_pairs(vec![(day(1), 1.0), (day(2), 2.0), (day(3), 3.0)]);
        let b = TimeSeries::from_pairs(vec![(day(2), 0.5), (day(3), 1.0), (day(4), 9.0)]);

        let aligned = a.align(&b);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0], (day(2), 2.0, 0.5));

        let diff = a.difference(&b);
        assert_eq!(diff.get(&day(3)), Some(2.0));
        assert_eq!(diff.get(&day(1)), None);
    }

    #[test]
    fn test_forward_fill() {
        let s = TimeSeries::from_pairs(vec![(day(2), 1.0), (day(4), 3.0)]);
        let filled = s.forward_fill_onto(&[day(1), day(2), day(3), day(5)]);
        assert_eq!(filled, vec![None, Some(1.0), Some(1.0), Some(3.0)]);
    }

    #[test]
    fn test_range_and_finite() {
        let s = TimeSeries::from_pairs(vec![
            (day(1), 1.0),
            (day(2), f64::NAN),
            (day(3), f64::INFINITY),
            (day(4), 4.0),
        ]);
        assert_eq!(s.finite().len(), 2);
        assert_eq!(s.range(Some(day(2)), Some(day(3))).len(), 2);
        assert_eq!(s.range(None, Some(day(1))).len(), 1);
    }
}
