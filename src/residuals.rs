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

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use tracing::debug;

use crate::regression::RegressionResult;
use crate::series::TimeSeries;

/// Combines per-security residuals into one portfolio residual series
#[derive(Debug, Clone)]
pub struct PortfolioResidualAggregator {
    /// Below this captured weight the sum is renormalized
    captured_weight_threshold: f64,
}

impl Default for PortfolioResidualAggregator {
    fn default() -> Self {
        Self::new(0.99)
    }
}

impl PortfolioResidualAggregator {
    pub fn new(captured_weight_threshold: f64) -> Self {
        Self { captured_weight_threshold }
    }

    /// Weight-sum the residuals of every held security.
    ///
    /// Each residual series is forward-filled onto the union of dates and dates
    /// where any series has not started yet are dropped. Only positive weights
    /// contribute; if they add up to less than the threshold the sum is divided
    /// by the captured weight.
    pub fn aggregate(
        &self,
        results: &HashMap<String, RegressionResult>,
        weights: &HashMap<String, f64>,
    ) -> TimeSeries {
        let mut held: Vec<(&TimeSeries, f64)> = results
            .iter()
            .filter_map(|(ticker, result)| {
                let residuals = result.residuals.as_ref()?;
                let weight = *weights.get(&ticker.to_uppercase())?;
                Some((residuals, weight))
            })
            .collect();
        if held.is_empty() {
            return TimeSeries::new();
        }
        // Stable summation order
        held.sort_by(|a, b| a.0.first_date().cmp(&b.0.first_date()).then(a.1.total_cmp(&b.1)));

        let index: Vec<NaiveDate> = held
            .iter()
            .flat_map(|(s, _)| s.dates())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let filled: Vec<Vec<Option<f64>>> =
            held.iter().map(|(s, _)| s.forward_fill_onto(&index)).collect();

        let captured: f64 = held.iter().map(|(_, w)| *w).filter(|w| *w > 0.0).sum();
        let scale = if captured > 0.0 && captured < self.captured_weight_threshold {
            debug!("Residual weights capture {:.4}; renormalizing", captured);
            1.0 / captured
        } else {
            1.0
        };

        index
            .iter()
            .enumerate()
            .filter_map(|(i, date)| {
                let mut total = 0.0;
                for (column, (_, weight)) in filled.iter().zip(&held) {
                    let value = column[i]?;
                    if *weight > 0.0 {
                        total += value * weight;
                    }
                }
                Some((*date, total * scale))
            })
            .collect()
    }
}
