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

//! Brinson-Fachler performance attribution.
//!
//! Allocation is measured per security against its sector's benchmark return.
//! Selection and interaction are sector-level Brinson-Fachler terms spread over
//! the sector's portfolio members in proportion to their portfolio weight, so a
//! sector's rows sum to the classic sector terms and all rows together sum to
//! the realized excess return.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::classification::{
    BenchmarkHolding, SectorOverrideService, TickerMetadata, NOT_CLASSIFIED,
};
use crate::series::TimeSeries;

#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("Invalid period: {start} is after {end}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },

    #[error("Invalid weight for {ticker}: {weight}")]
    InvalidWeight { ticker: String, weight: f64 },
}

/// Attribution of one security or one sector aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    /// Ticker, or the sector name for sector aggregates
    pub ticker: String,
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub portfolio_weight: f64,
    pub benchmark_weight: f64,
    /// Cumulative period return (decimal)
    pub portfolio_return: f64,
    pub benchmark_return: f64,
    pub allocation_effect: f64,
    pub selection_effect: f64,
    pub interaction_effect: f64,
    pub total_effect: f64,
}

impl AttributionResult {
    pub fn active_weight(&self) -> f64 {
        self.portfolio_weight - self.benchmark_weight
    }
}

/// Complete attribution for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrinsonAnalysis {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_portfolio_return: f64,
    pub total_benchmark_return: f64,
    pub total_excess_return: f64,
    pub total_allocation_effect: f64,
    pub total_selection_effect: f64,
    pub total_interaction_effect: f64,
    pub by_security: BTreeMap<String, AttributionResult>,
    pub by_sector: BTreeMap<String, AttributionResult>,
}

impl BrinsonAnalysis {
    pub fn total_effect(&self) -> f64 {
        self.total_allocation_effect + self.total_selection_effect + self.total_interaction_effect
    }

    /// Sectors ordered by total effect, largest first
    pub fn sectors_by_effect(&self) -> Vec<&AttributionResult> {
        let mut sectors: Vec<_> = self.by_sector.values().collect();
        sectors.sort_by(|a, b| b.total_effect.total_cmp(&a.total_effect));
        sectors
    }
}

/// Everything one attribution run needs, keyed by upper-case ticker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributionInputs {
    pub portfolio_weights: HashMap<String, f64>,
    pub benchmark_holdings: HashMap<String, BenchmarkHolding>,
    /// Daily returns of portfolio securities
    pub portfolio_returns: HashMap<String, TimeSeries>,
    /// Daily returns of benchmark constituents
    pub benchmark_returns: HashMap<String, TimeSeries>,
    /// Daily portfolio weights; a ticker listed here only earns returns on
    /// dates where its weight is positive
    #[serde(default)]
    pub daily_weights: Option<HashMap<String, TimeSeries>>,
    #[serde(default)]
    pub metadata: HashMap<String, TickerMetadata>,
}

/// Compounded return over `[start, end]`; `None` with no observations.
///
/// With `holding_weights`, only dates where the weight is positive count.
pub fn period_return(
    returns: &TimeSeries,
    start: NaiveDate,
    end: NaiveDate,
    holding_weights: Option<&TimeSeries>,
) -> Option<f64> {
    let window = returns.range(Some(start), Some(end)).finite();
    let held: Vec<f64> = match holding_weights {
        Some(weights) => window
            .iter()
            .filter(|(date, _)| weights.get(date).map_or(false, |w| w > 0.0))
            .map(|(_, r)| r)
            .collect(),
        None => window.values(),
    };
    if held.is_empty() {
        return None;
    }
    Some(held.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0)
}

#[derive(Debug, Default, Clone, Copy)]
struct SectorTotals {
    portfolio_weight: f64,
    benchmark_weight: f64,
    /// Σ w_b·r_b over benchmark constituents
    weighted_benchmark_return: f64,
}

impl SectorTotals {
    fn benchmark_return(&self, fallback: f64) -> f64 {
        if self.benchmark_weight > 0.0 {
            self.weighted_benchmark_return / self.benchmark_weight
        } else {
            fallback
        }
    }
}

/// Brinson-Fachler attribution engine
pub struct AttributionEngine {
    overrides: Arc<SectorOverrideService>,
}

impl AttributionEngine {
    pub fn new(overrides: Arc<SectorOverrideService>) -> Self {
        Self { overrides }
    }

    /// Benchmark classification wins for constituents; everything else goes
    /// through overrides and metadata
    fn sector_of(&self, ticker: &str, inputs: &AttributionInputs) -> String {
        if let Some(sector) = inputs
            .benchmark_holdings
            .get(ticker)
            .and_then(|h| h.sector.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return sector.to_string();
        }
        self.overrides.effective_sector(ticker, inputs.metadata.get(ticker))
    }

    fn name_of(ticker: &str, inputs: &AttributionInputs) -> String {
        inputs
            .benchmark_holdings
            .get(ticker)
            .and_then(|h| h.name.clone())
            .or_else(|| inputs.metadata.get(ticker).and_then(|m| m.name.clone()))
            .unwrap_or_else(|| ticker.to_string())
    }

    fn industry_of(&self, ticker: &str, inputs: &AttributionInputs) -> String {
        let industry = self.overrides.effective_industry(ticker, inputs.metadata.get(ticker));
        if industry == NOT_CLASSIFIED {
            String::new()
        } else {
            industry
        }
    }

    /// Attribute the excess return of `period_start..=period_end`.
    ///
    /// Every ticker held on either side gets a row. A missing or empty return
    /// series counts as a zero return; its weight still participates.
    ///
    /// The effects add up to the excess return only when portfolio and
    /// benchmark weights have the same sum. Otherwise the gap is
    /// `(Σw_p - Σw_b) × R_b`; it is logged at debug level and left in
    /// `total_excess_return - total_effect()`.
    pub fn calculate_attribution(
        &self,
        inputs: &AttributionInputs,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<BrinsonAnalysis, AttributionError> {
        if period_start > period_end {
            return Err(AttributionError::InvalidPeriod {
                start: period_start,
                end: period_end,
            });
        }
        let weight_checks = inputs
            .portfolio_weights
            .iter()
            .map(|(t, w)| (t, *w))
            .chain(inputs.benchmark_holdings.iter().map(|(t, h)| (t, h.weight)));
        for (ticker, weight) in weight_checks {
            if !weight.is_finite() {
                return Err(AttributionError::InvalidWeight {
                    ticker: ticker.clone(),
                    weight,
                });
            }
        }

        let tickers: BTreeSet<&String> = inputs
            .portfolio_weights
            .keys()
            .chain(inputs.benchmark_holdings.keys())
            .collect();

        let mut portfolio_returns = HashMap::new();
        for (ticker, series) in &inputs.portfolio_returns {
            let holding = inputs.daily_weights.as_ref().and_then(|d| d.get(ticker));
            if let Some(r) = period_return(series, period_start, period_end, holding) {
                portfolio_returns.insert(ticker.as_str(), r);
            }
        }
        let mut benchmark_returns = HashMap::new();
        for (ticker, series) in &inputs.benchmark_returns {
            if let Some(r) = period_return(series, period_start, period_end, None) {
                benchmark_returns.insert(ticker.as_str(), r);
            }
        }

        struct Row {
            sector: String,
            w_p: f64,
            w_b: f64,
            r_p: f64,
            r_b: f64,
        }

        let mut rows: BTreeMap<&str, Row> = BTreeMap::new();
        let mut sectors: HashMap<String, SectorTotals> = HashMap::new();
        for ticker in &tickers {
            let w_p = inputs.portfolio_weights.get(*ticker).copied().unwrap_or(0.0);
            let w_b = inputs.benchmark_holdings.get(*ticker).map_or(0.0, |h| h.weight);
            let r_p = if w_p > 0.0 {
                portfolio_returns.get(ticker.as_str()).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            let r_b = if w_b > 0.0 {
                benchmark_returns.get(ticker.as_str()).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            let sector = self.sector_of(ticker, inputs);

            let totals = sectors.entry(sector.clone()).or_default();
            totals.portfolio_weight += w_p;
            totals.benchmark_weight += w_b;
            totals.weighted_benchmark_return += w_b * r_b;

            rows.insert(ticker.as_str(), Row { sector, w_p, w_b, r_p, r_b });
        }

        let total_portfolio_return: f64 = rows.values().map(|r| r.w_p * r.r_p).sum();
        let total_benchmark_return: f64 = rows.values().map(|r| r.w_b * r.r_b).sum();

        let mut by_security = BTreeMap::new();
        for (ticker, row) in &rows {
            let sector = sectors.get(&row.sector).copied().unwrap_or_default();
            let sector_benchmark = sector.benchmark_return(total_benchmark_return);

            let allocation = (row.w_p - row.w_b) * (sector_benchmark - total_benchmark_return);
            let invested = sector.portfolio_weight.abs() > 0.0 && row.w_p != 0.0;
            let (selection, interaction) = if invested {
                let stock_excess = row.w_p * (row.r_p - sector_benchmark);
                let benchmark_share = sector.benchmark_weight / sector.portfolio_weight;
                (
                    benchmark_share * stock_excess,
                    (1.0 - benchmark_share) * stock_excess,
                )
            } else {
                (0.0, 0.0)
            };

            by_security.insert(
                ticker.to_string(),
                AttributionResult {
                    ticker: ticker.to_string(),
                    name: Self::name_of(ticker, inputs),
                    sector: row.sector.clone(),
                    industry: self.industry_of(ticker, inputs),
                    portfolio_weight: row.w_p,
                    benchmark_weight: row.w_b,
                    portfolio_return: row.r_p,
                    benchmark_return: row.r_b,
                    allocation_effect: allocation,
                    selection_effect: selection,
                    interaction_effect: interaction,
                    total_effect: allocation + selection + interaction,
                },
            );
        }

        let by_sector = aggregate_sectors(&by_security);
        let analysis = BrinsonAnalysis {
            period_start,
            period_end,
            total_portfolio_return,
            total_benchmark_return,
            total_excess_return: total_portfolio_return - total_benchmark_return,
            total_allocation_effect: by_security.values().map(|r| r.allocation_effect).sum(),
            total_selection_effect: by_security.values().map(|r| r.selection_effect).sum(),
            total_interaction_effect: by_security.values().map(|r| r.interaction_effect).sum(),
            by_security,
            by_sector,
        };

        let unexplained = analysis.total_excess_return - analysis.total_effect();
        if unexplained.abs() > 1e-9 {
            debug!(
                "Attribution leaves {:.6} unexplained (weight sums differ)",
                unexplained
            );
        }
        info!(
            "Attribution {}..{}: excess {:.4}% over {} securities in {} sectors",
            period_start,
            period_end,
            analysis.total_excess_return * 100.0,
            analysis.by_security.len(),
            analysis.by_sector.len()
        );
        Ok(analysis)
    }
}

/// Sum security rows into sector rows; returns are weight-averaged
fn aggregate_sectors(
    by_security: &BTreeMap<String, AttributionResult>,
) -> BTreeMap<String, AttributionResult> {
    #[derive(Default)]
    struct Acc {
        count: usize,
        w_p: f64,
        w_b: f64,
        weighted_r_p: f64,
        weighted_r_b: f64,
        allocation: f64,
        selection: f64,
        interaction: f64,
        total: f64,
    }

    let mut groups: BTreeMap<&str, Acc> = BTreeMap::new();
    for row in by_security.values() {
        let acc = groups.entry(row.sector.as_str()).or_default();
        acc.count += 1;
        acc.w_p += row.portfolio_weight;
        acc.w_b += row.benchmark_weight;
        acc.weighted_r_p += row.portfolio_weight * row.portfolio_return;
        acc.weighted_r_b += row.benchmark_weight * row.benchmark_return;
        acc.allocation += row.allocation_effect;
        acc.selection += row.selection_effect;
        acc.interaction += row.interaction_effect;
        acc.total += row.total_effect;
    }

    groups
        .into_iter()
        .map(|(sector, acc)| {
            let average = |weighted: f64, weight: f64| {
                if weight != 0.0 {
                    weighted / weight
                } else {
                    0.0
                }
            };
            let row = AttributionResult {
                ticker: sector.to_string(),
                name: format!("{} ({} holdings)", sector, acc.count),
                sector: sector.to_string(),
                industry: String::new(),
                portfolio_weight: acc.w_p,
                benchmark_weight: acc.w_b,
                portfolio_return: average(acc.weighted_r_p, acc.w_p),
                benchmark_return: average(acc.weighted_r_b, acc.w_b),
                allocation_effect: acc.allocation,
                selection_effect: acc.selection,
                interaction_effect: acc.interaction,
                total_effect: acc.total,
            };
            (sector.to_string(), row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    /// Two daily returns compounding to `total`
    fn returns_compounding_to(total: f64) -> TimeSeries {
        let step = (1.0 + total).sqrt() - 1.0;
        TimeSeries::from_pairs([(date(3, 1), step), (date(3, 4), step)])
    }

    fn holding(weight: f64, sector: &str) -> BenchmarkHolding {
        BenchmarkHolding {
            weight,
            sector: Some(sector.to_string()),
            currency: None,
            location: None,
            name: None,
        }
    }

    fn engine() -> AttributionEngine {
        AttributionEngine::new(Arc::new(SectorOverrideService::empty()))
    }

    #[test]
    fn test_single_sector_scenario() {
        let mut inputs = AttributionInputs::default();
        inputs.portfolio_weights = HashMap::from([("A".to_string(), 0.6), ("B".to_string(), 0.4)]);
        inputs.benchmark_holdings = HashMap::from([
            ("A".to_string(), holding(0.4, "Technology")),
            ("B".to_string(), holding(0.6, "Technology")),
        ]);
        for (ticker, r) in [("A", 0.20), ("B", 0.10)] {
            inputs.portfolio_returns.insert(ticker.to_string(), returns_compounding_to(r));
            inputs.benchmark_returns.insert(ticker.to_string(), returns_compounding_to(r));
        }

        let analysis = engine().calculate_attribution(&inputs, date(3, 1), date(3, 31)).unwrap();
        assert!((analysis.total_benchmark_return - 0.14).abs() < 1e-12);
        assert!((analysis.total_portfolio_return - 0.16).abs() < 1e-12);
        assert!((analysis.total_excess_return - 0.02).abs() < 1e-12);
        assert!(analysis.total_allocation_effect.abs() < 1e-12);
        assert!((analysis.total_selection_effect - 0.02).abs() < 1e-12);
        assert!(analysis.total_interaction_effect.abs() < 1e-12);

        let tech = &analysis.by_sector["Technology"];
        assert_eq!(tech.name, "Technology (2 holdings)");
        assert!((tech.total_effect - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_multi_sector_reconciles_to_excess_return() {
        let mut inputs = AttributionInputs::default();
        inputs.portfolio_weights = HashMap::from([
            ("AAPL".to_string(), 0.35),
            ("MSFT".to_string(), 0.25),
            ("XOM".to_string(), 0.30),
            ("PLTR".to_string(), 0.10),
        ]);
        inputs.benchmark_holdings = HashMap::from([
            ("AAPL".to_string(), holding(0.30, "Technology")),
            ("MSFT".to_string(), holding(0.20, "Technology")),
            ("XOM".to_string(), holding(0.15, "Energy")),
            ("JPM".to_string(), holding(0.35, "Financial Services")),
        ]);
        inputs.metadata.insert(
            "PLTR".to_string(),
            TickerMetadata {
                sector: Some("Technology".to_string()),
                ..Default::default()
            },
        );
        let totals = [
            ("AAPL", 0.12),
            ("MSFT", -0.04),
            ("XOM", 0.08),
            ("PLTR", 0.40),
            ("JPM", 0.05),
        ];
        for (ticker, r) in totals {
            inputs.portfolio_returns.insert(ticker.to_string(), returns_compounding_to(r));
            inputs.benchmark_returns.insert(ticker.to_string(), returns_compounding_to(r));
        }

        let analysis = engine().calculate_attribution(&inputs, date(1, 1), date(12, 31)).unwrap();
        let security_total: f64 = analysis.by_security.values().map(|r| r.total_effect).sum();
        let sector_total: f64 = analysis.by_sector.values().map(|r| r.total_effect).sum();
        assert!((security_total - analysis.total_excess_return).abs() < 1e-12);
        assert!((sector_total - security_total).abs() < 1e-12);

        // Absent from the portfolio: no portfolio return, negative active weight
        let jpm = &analysis.by_security["JPM"];
        assert_eq!(jpm.portfolio_return, 0.0);
        assert!(jpm.active_weight() < 0.0);
        assert_eq!(analysis.by_security["PLTR"].sector, "Technology");
        assert_eq!(analysis.by_sector.len(), 3);
    }

    #[test]
    fn test_daily_weights_limit_holding_window() {
        let series =
            TimeSeries::from_pairs([(date(3, 1), 0.10), (date(3, 4), 0.10), (date(3, 5), -0.50)]);
        let held =
            TimeSeries::from_pairs([(date(3, 1), 0.5), (date(3, 4), 0.5), (date(3, 5), 0.0)]);

        let full = period_return(&series, date(3, 1), date(3, 31), None).unwrap();
        let windowed = period_return(&series, date(3, 1), date(3, 31), Some(&held)).unwrap();
        assert!((full - (1.1 * 1.1 * 0.5 - 1.0)).abs() < 1e-12);
        assert!((windowed - 0.21).abs() < 1e-12);
        assert!(period_return(&series, date(4, 1), date(4, 30), None).is_none());
    }

    #[test]
    fn test_missing_returns_keep_weight() {
        let mut inputs = AttributionInputs::default();
        inputs.portfolio_weights = HashMap::from([("A".to_string(), 0.5), ("B".to_string(), 0.5)]);
        inputs.benchmark_holdings = HashMap::from([("A".to_string(), holding(1.0, "Energy"))]);
        inputs.portfolio_returns.insert("A".to_string(), returns_compounding_to(0.10));
        inputs.benchmark_returns.insert("A".to_string(), returns_compounding_to(0.10));

        let analysis = engine().calculate_attribution(&inputs, date(3, 1), date(3, 31)).unwrap();
        let b = &analysis.by_security["B"];
        assert_eq!(b.portfolio_weight, 0.5);
        assert_eq!(b.portfolio_return, 0.0);
        assert_eq!(b.sector, NOT_CLASSIFIED);
        // B's sector has no benchmark: it is measured against the total benchmark
        assert!((b.allocation_effect - 0.0).abs() < 1e-12);
        assert!((b.selection_effect - 0.0).abs() < 1e-12);
        assert!((b.interaction_effect - 0.5 * -0.10).abs() < 1e-12);
        let total: f64 = analysis.by_security.values().map(|r| r.total_effect).sum();
        assert!((total - analysis.total_excess_return).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_period_rejected() {
        let result =
            engine().calculate_attribution(&AttributionInputs::default(), date(5, 1), date(4, 1));
        assert!(matches!(result, Err(AttributionError::InvalidPeriod { .. })));
    }

    #[test]
    fn test_unequal_weight_sums_leave_a_gap() {
        let mut inputs = AttributionInputs::default();
        // Portfolio is 80% invested, the benchmark fully
        inputs.portfolio_weights = HashMap::from([("A".to_string(), 0.5), ("B".to_string(), 0.3)]);
        inputs.benchmark_holdings = HashMap::from([
            ("A".to_string(), holding(0.4, "Technology")),
            ("B".to_string(), holding(0.6, "Technology")),
        ]);
        for (ticker, r) in [("A", 0.20), ("B", 0.10)] {
            inputs.portfolio_returns.insert(ticker.to_string(), returns_compounding_to(r));
            inputs.benchmark_returns.insert(ticker.to_string(), returns_compounding_to(r));
        }

        let analysis = engine().calculate_attribution(&inputs, date(3, 1), date(3, 31)).unwrap();
        assert!((analysis.total_excess_return + 0.01).abs() < 1e-12);
        assert!((analysis.total_effect() - 0.018).abs() < 1e-12);
        let gap = analysis.total_excess_return - analysis.total_effect();
        assert!((gap - (0.8 - 1.0) * analysis.total_benchmark_return).abs() < 1e-12);
    }
}
