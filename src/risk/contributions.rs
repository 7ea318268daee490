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

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::ctev::{weighted_betas, CtevTrees};
use super::SecurityRiskMetrics;
use crate::factor_data::Factor;
use crate::regression::RegressionResult;

/// A security's tilt toward one factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFactorExposure {
    pub ticker: String,
    pub beta: f64,
    pub active_weight: f64,
    /// active_weight × beta
    pub contribution: f64,
}

/// Exposure and risk of the portfolio to one factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor: Factor,
    pub name: String,
    pub portfolio_beta: f64,
    pub benchmark_beta: f64,
    pub active_beta: f64,
    /// CTEV allocated to this factor in the factor-group tree
    pub ctev: f64,
    /// Largest |active_weight × beta| first
    pub top_securities: Vec<SecurityFactorExposure>,
}

/// Per-factor betas, CTEV and leading securities, ordered by CTEV
pub fn factor_contributions(
    results: &HashMap<String, RegressionResult>,
    metrics: &BTreeMap<String, SecurityRiskMetrics>,
    trees: &CtevTrees,
    top_n: usize,
) -> Vec<FactorContribution> {
    let portfolio = weighted_betas(results, |t| metrics.get(t).map_or(0.0, |m| m.portfolio_weight));
    let benchmark = weighted_betas(results, |t| metrics.get(t).map_or(0.0, |m| m.benchmark_weight));

    let mut contributions: Vec<FactorContribution> = Factor::ALL
        .iter()
        .map(|&factor| {
            let mut exposures: Vec<SecurityFactorExposure> = results
                .iter()
                .filter_map(|(ticker, result)| {
                    let active_weight = metrics.get(ticker)?.active_weight;
                    if active_weight == 0.0 {
                        return None;
                    }
                    let beta = result.beta(factor);
                    Some(SecurityFactorExposure {
                        ticker: ticker.clone(),
                        beta,
                        active_weight,
                        contribution: active_weight * beta,
                    })
                })
                .collect();
            exposures.sort_by(|a, b| {
                b.contribution
                    .abs()
                    .total_cmp(&a.contribution.abs())
                    .then_with(|| a.ticker.cmp(&b.ticker))
            });
            exposures.truncate(top_n);

            FactorContribution {
                factor,
                name: factor.display_name().to_string(),
                portfolio_beta: portfolio[&factor],
                benchmark_beta: benchmark[&factor],
                active_beta: portfolio[&factor] - benchmark[&factor],
                ctev: trees.factor_ctev(factor),
                top_securities: exposures,
            }
        })
        .collect();

    contributions.sort_by(|a, b| b.ctev.total_cmp(&a.ctev));
    contributions
}
