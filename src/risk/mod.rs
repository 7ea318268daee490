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

//! Active-risk decomposition from factor regressions.
//!
//! Weights are decimals. Volatilities, tracking error and CTEV are percentage
//! points. Nothing is rounded here.

pub mod contributions;
pub mod ctev;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

use crate::classification::{Classification, NOT_CLASSIFIED};
use crate::factor_data::Factor;
use crate::regression::RegressionResult;
use crate::residuals::PortfolioResidualAggregator;
use crate::series::{TimeSeries, TRADING_DAYS_PER_YEAR};

pub use contributions::{factor_contributions, FactorContribution, SecurityFactorExposure};
pub use ctev::{CtevNode, CtevNodeKind, CtevTrees};

/// Configuration for risk decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Aligned observations needed for tracking error and covariances
    pub min_aligned_observations: usize,
    /// Bounds on the reported factor-risk share (percent)
    pub factor_pct_floor: f64,
    pub factor_pct_ceiling: f64,
    /// Residual aggregation renormalizes below this captured weight
    pub captured_weight_threshold: f64,
    pub top_securities_per_factor: usize,
    pub top_idiosyncratic_securities: usize,
    /// Add a Currency group to the factor-group tree
    pub show_currency_group: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_aligned_observations: 10,
            factor_pct_floor: 20.0,
            factor_pct_ceiling: 80.0,
            captured_weight_threshold: 0.99,
            top_securities_per_factor: 20,
            top_idiosyncratic_securities: 15,
            show_currency_group: true,
        }
    }
}

/// How the active risk was explained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskModel {
    /// Six-factor regressions were available
    FactorModel,
    /// Only realized returns; no factor split
    ReturnsOnly,
}

/// Risk of one security in one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityRiskMetrics {
    pub ticker: String,
    pub sector: String,
    pub industry: String,
    pub country: String,
    pub currency: String,
    pub portfolio_weight: f64,
    pub benchmark_weight: f64,
    pub active_weight: f64,
    pub total_vol: f64,
    pub factor_vol: f64,
    pub idio_vol: f64,
    pub r_squared: f64,
    /// Standalone idiosyncratic tracking error: idio_vol × |active weight|
    pub idio_tev: f64,
    /// Idiosyncratic contribution to tracking error
    pub idio_ctev: f64,
    /// Active weight × beta per factor
    pub factor_exposures: BTreeMap<Factor, f64>,
    pub has_regression: bool,
}

/// Portfolio-level risk figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub model: RiskModel,
    /// Annualized tracking error (percent)
    pub total_active_risk: f64,
    pub factor_risk_pct: f64,
    pub idio_risk_pct: f64,
    /// |active weight|-weighted R² before clamping
    pub average_r_squared: f64,
    pub ex_ante_beta: f64,
    pub ex_post_beta: f64,
    /// Aligned portfolio/benchmark observations
    pub observations: usize,
}

impl RiskSummary {
    /// Top-level CTEV budget shared by every tree
    pub fn factor_ctev_budget(&self) -> f64 {
        match self.model {
            RiskModel::FactorModel => self.total_active_risk * self.average_r_squared,
            RiskModel::ReturnsOnly => 0.0,
        }
    }
}

pub struct RiskDecompositionEngine {
    config: RiskConfig,
    aggregator: PortfolioResidualAggregator,
}

impl RiskDecompositionEngine {
    pub fn new(config: RiskConfig) -> Self {
        let aggregator = PortfolioResidualAggregator::new(config.captured_weight_threshold);
        Self { config, aggregator }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn portfolio_residuals(
        &self,
        results: &HashMap<String, RegressionResult>,
        portfolio_weights: &HashMap<String, f64>,
    ) -> TimeSeries {
        self.aggregator.aggregate(results, portfolio_weights)
    }

    /// Metrics for one security; without a regression only weights are filled
    pub fn security_metrics(
        &self,
        ticker: &str,
        result: Option<&RegressionResult>,
        portfolio_weight: f64,
        benchmark_weight: f64,
        classification: &Classification,
    ) -> SecurityRiskMetrics {
        let active_weight = portfolio_weight - benchmark_weight;
        let mut metrics = SecurityRiskMetrics {
            ticker: ticker.to_uppercase(),
            sector: classification.sector.clone(),
            industry: classification.industry.clone(),
            country: classification.country.clone(),
            currency: classification.currency.clone(),
            portfolio_weight,
            benchmark_weight,
            active_weight,
            ..Default::default()
        };
        let result = match result {
            Some(r) => r,
            None => return metrics,
        };

        let annualizer = TRADING_DAYS_PER_YEAR.sqrt();
        let mut idio = result.idiosyncratic_vol;
        let mut factor = result.factor_vol;
        // Older stored fits may lack volatilities
        if idio == 0.0 {
            if let Some(residuals) = result.residuals.as_ref().filter(|r| !r.is_empty()) {
                idio = residuals.values().iter().population_std_dev() * annualizer;
            }
        }
        if factor == 0.0 {
            if let Some(fitted) = result.fitted.as_ref().filter(|f| !f.is_empty()) {
                factor = fitted.values().iter().population_std_dev() * annualizer;
            }
        }

        metrics.idio_vol = idio * 100.0;
        metrics.factor_vol = factor * 100.0;
        metrics.total_vol = (idio.powi(2) + factor.powi(2)).sqrt() * 100.0;
        metrics.r_squared = result.r_squared;
        metrics.idio_tev = idio * active_weight.abs() * 100.0;
        metrics.factor_exposures = Factor::ALL
            .iter()
            .map(|f| (*f, active_weight * result.beta(*f)))
            .collect();
        metrics.has_regression = true;
        metrics
    }

    /// Idiosyncratic CTEV of one security (percentage points).
    ///
    /// |w_a| × cov(e_i, e_P) / var(e_P) × σ(e_P) × √252, sample statistics.
    /// Zero without residuals, without portfolio residual variance, or with too
    /// few aligned observations.
    pub fn idiosyncratic_ctev(
        &self,
        result: &RegressionResult,
        portfolio_residuals: &TimeSeries,
        active_weight: f64,
    ) -> f64 {
        let residuals = match &result.residuals {
            Some(r) if !r.is_empty() => r,
            _ => return 0.0,
        };
        let portfolio_var = portfolio_residuals.values().iter().variance();
        if !portfolio_var.is_finite() || portfolio_var <= 0.0 {
            return 0.0;
        }

        let aligned = residuals.align(portfolio_residuals);
        if aligned.len() < self.config.min_aligned_observations.max(2) {
            return 0.0;
        }
        let security: Vec<f64> = aligned.iter().map(|(_, s, _)| *s).collect();
        let portfolio: Vec<f64> = aligned.iter().map(|(_, _, p)| *p).collect();
        let cov = security.iter().covariance(portfolio.iter());

        let idio_std = portfolio_var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
        active_weight.abs() * (cov / portfolio_var) * idio_std * 100.0
    }

    /// Metrics for every security held in the portfolio or the benchmark
    pub fn all_security_risks(
        &self,
        results: &HashMap<String, RegressionResult>,
        portfolio_weights: &HashMap<String, f64>,
        benchmark_weights: &HashMap<String, f64>,
        classifications: &HashMap<String, Classification>,
    ) -> BTreeMap<String, SecurityRiskMetrics> {
        let portfolio_residuals = self.portfolio_residuals(results, portfolio_weights);
        let unclassified = Classification::default();

        let mut tickers: Vec<String> = portfolio_weights
            .keys()
            .chain(benchmark_weights.keys())
            .map(|t| t.to_uppercase())
            .collect();
        tickers.sort();
        tickers.dedup();

        let mut metrics = BTreeMap::new();
        for ticker in tickers {
            let w_p = portfolio_weights.get(&ticker).copied().unwrap_or(0.0);
            let w_b = benchmark_weights.get(&ticker).copied().unwrap_or(0.0);
            if w_p <= 0.0 && w_b <= 0.0 {
                continue;
            }
            let result = results.get(&ticker);
            let classification = classifications.get(&ticker).unwrap_or(&unclassified);
            let mut m = self.security_metrics(&ticker, result, w_p, w_b, classification);
            if let Some(result) = result {
                m.idio_ctev =
                    self.idiosyncratic_ctev(result, &portfolio_residuals, m.active_weight);
            }
            metrics.insert(ticker, m);
        }

        let unclassified_count = metrics.values().filter(|m| m.sector == NOT_CLASSIFIED).count();
        crate::classification::warn_unclassified(unclassified_count);
        debug!(
            "Computed risk metrics for {} securities ({} with regressions)",
            metrics.len(),
            metrics.values().filter(|m| m.has_regression).count()
        );
        metrics
    }

    /// Tracking error and ex-post beta over aligned returns, if enough overlap
    fn realized(
        &self,
        portfolio_returns: &TimeSeries,
        benchmark_returns: &TimeSeries,
    ) -> Option<(f64, f64, usize)> {
        let aligned = portfolio_returns.finite().align(&benchmark_returns.finite());
        if aligned.len() < self.config.min_aligned_observations.max(2) {
            return None;
        }
        let portfolio: Vec<f64> = aligned.iter().map(|(_, p, _)| *p).collect();
        let benchmark: Vec<f64> = aligned.iter().map(|(_, _, b)| *b).collect();
        let active: Vec<f64> = portfolio.iter().zip(&benchmark).map(|(p, b)| p - b).collect();

        let tracking_error = active.iter().std_dev() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0;
        let benchmark_var = benchmark.iter().variance();
        let ex_post_beta = if benchmark_var > 0.0 {
            portfolio.iter().covariance(benchmark.iter()) / benchmark_var
        } else {
            1.0
        };
        Some((tracking_error, ex_post_beta, aligned.len()))
    }

    fn neutral_summary(model: RiskModel, observations: usize) -> RiskSummary {
        RiskSummary {
            model,
            total_active_risk: 0.0,
            factor_risk_pct: 50.0,
            idio_risk_pct: 50.0,
            average_r_squared: 0.5,
            ex_ante_beta: 1.0,
            ex_post_beta: 1.0,
            observations,
        }
    }

    /// Portfolio-level summary from regressions and realized returns
    pub fn summary(
        &self,
        results: &HashMap<String, RegressionResult>,
        portfolio_weights: &HashMap<String, f64>,
        benchmark_weights: &HashMap<String, f64>,
        portfolio_returns: &TimeSeries,
        benchmark_returns: &TimeSeries,
    ) -> RiskSummary {
        let realized = self.realized(portfolio_returns, benchmark_returns);
        let (total_active_risk, ex_post_beta, observations) = match realized {
            Some(realized) => realized,
            None => {
                warn!("Too few aligned portfolio/benchmark returns for tracking error");
                return Self::neutral_summary(RiskModel::FactorModel, 0);
            }
        };

        // Ex-ante beta: portfolio-weighted market betas
        let mut beta_sum = 0.0;
        let mut beta_weight = 0.0;
        // Factor share: |active weight|-weighted R²
        let mut r2_sum = 0.0;
        let mut r2_weight = 0.0;
        for (ticker, result) in results {
            let w_p = portfolio_weights.get(ticker).copied().unwrap_or(0.0);
            let w_b = benchmark_weights.get(ticker).copied().unwrap_or(0.0);
            if w_p > 0.0 {
                beta_sum += w_p * result.market_beta();
                beta_weight += w_p;
            }
            let active = (w_p - w_b).abs();
            if active > 0.0 {
                r2_sum += active * result.r_squared;
                r2_weight += active;
            }
        }

        let ex_ante_beta = if beta_weight > 0.0 { beta_sum / beta_weight } else { 1.0 };
        let average_r_squared = if r2_weight > 0.0 { r2_sum / r2_weight } else { 0.5 };
        let factor_risk_pct = (average_r_squared * 100.0)
            .clamp(self.config.factor_pct_floor, self.config.factor_pct_ceiling);

        RiskSummary {
            model: RiskModel::FactorModel,
            total_active_risk,
            factor_risk_pct,
            idio_risk_pct: 100.0 - factor_risk_pct,
            average_r_squared,
            ex_ante_beta,
            ex_post_beta,
            observations,
        }
    }

    /// Summary from realized returns alone
    pub fn returns_only_summary(
        &self,
        portfolio_returns: &TimeSeries,
        benchmark_returns: &TimeSeries,
    ) -> RiskSummary {
        match self.realized(portfolio_returns, benchmark_returns) {
            Some((total_active_risk, ex_post_beta, observations)) => RiskSummary {
                total_active_risk,
                ex_post_beta,
                ..Self::neutral_summary(RiskModel::ReturnsOnly, observations)
            },
            None => Self::neutral_summary(RiskModel::ReturnsOnly, 0),
        }
    }

    pub fn ctev_trees(
        &self,
        metrics: &BTreeMap<String, SecurityRiskMetrics>,
        results: &HashMap<String, RegressionResult>,
        summary: &RiskSummary,
    ) -> CtevTrees {
        CtevTrees::build(
            metrics,
            results,
            summary.factor_ctev_budget(),
            self.config.show_currency_group,
        )
    }

    pub fn factor_contributions(
        &self,
        results: &HashMap<String, RegressionResult>,
        metrics: &BTreeMap<String, SecurityRiskMetrics>,
        trees: &CtevTrees,
    ) -> Vec<FactorContribution> {
        factor_contributions(results, metrics, trees, self.config.top_securities_per_factor)
    }

    /// Securities with the largest |idiosyncratic CTEV|
    pub fn top_idiosyncratic(
        &self,
        metrics: &BTreeMap<String, SecurityRiskMetrics>,
    ) -> Vec<SecurityRiskMetrics> {
        let mut ranked: Vec<_> = metrics.values().filter(|m| m.has_regression).cloned().collect();
        ranked.sort_by(|a, b| b.idio_ctev.abs().total_cmp(&a.idio_ctev.abs()));
        ranked.truncate(self.config.top_idiosyncratic_securities);
        ranked
    }

    /// Consistency warnings; empty when the decomposition adds up
    pub fn validate(&self, summary: &RiskSummary, trees: &CtevTrees) -> Vec<String> {
        let mut warnings = Vec::new();

        let split = summary.factor_risk_pct + summary.idio_risk_pct;
        if (split - 100.0).abs() > 0.1 {
            warnings.push(format!(
                "Factor ({:.1}%) + Idio ({:.1}%) != 100%",
                summary.factor_risk_pct, summary.idio_risk_pct
            ));
        }

        let tolerance = 1e-6 * trees.budget.abs().max(1.0);
        for (label, nodes) in trees.named() {
            if let Some(node) = nodes.iter().find(|n| n.conservation_error() > tolerance) {
                warnings.push(format!(
                    "CTEV tree '{}' is not conserved under {}",
                    label, node.name
                ));
            }
            let allocated: f64 = nodes.iter().map(|n| n.ctev).sum();
            let has_differences = nodes.iter().any(|n| n.difference > 0.0);
            if has_differences && (allocated - trees.budget).abs() > tolerance {
                warnings.push(format!(
                    "CTEV tree '{}' allocates {:.4} of a {:.4} budget",
                    label, allocated, trees.budget
                ));
            }
        }

        for w in &warnings {
            warn!("Risk decomposition: {}", w);
        }
        warnings
    }
}

impl Default for RiskDecompositionEngine {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}
