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

//! Security-level exposures derived from a security's own price and volume history.
//!
//! These complement the six library factors and are not part of the core regression.
//! Every rolling measure is undefined until a full window is available, so the
//! returned series start at the first complete window.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::series::{TimeSeries, TRADING_DAYS_PER_YEAR};

/// Exposures computed from price/volume history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstructedFactor {
    Volatility,
    Liquidity,
    Reversal,
}

impl ConstructedFactor {
    pub const ALL: [ConstructedFactor; 3] = [
        ConstructedFactor::Volatility,
        ConstructedFactor::Liquidity,
        ConstructedFactor::Reversal,
    ];
}

/// Daily close and traded volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub close: f64,
    pub volume: f64,
}

pub type PriceHistory = BTreeMap<NaiveDate, PriceBar>;

/// Rolling windows, in observations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructedFactorConfig {
    pub volatility_window: usize,
    pub liquidity_window: usize,
    pub reversal_window: usize,
}

impl Default for ConstructedFactorConfig {
    fn default() -> Self {
        Self {
            volatility_window: 60, // ~3 months
            liquidity_window: 30,
            reversal_window: 21,   // ~1 month
        }
    }
}

/// Full time series of each constructed exposure for one security
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityFactorSeries {
    pub volatility: TimeSeries,
    pub liquidity: TimeSeries,
    pub reversal: TimeSeries,
}

impl SecurityFactorSeries {
    pub fn get(&self, factor: ConstructedFactor) -> &TimeSeries {
        match factor {
            ConstructedFactor::Volatility => &self.volatility,
            ConstructedFactor::Liquidity => &self.liquidity,
            ConstructedFactor::Reversal => &self.reversal,
        }
    }
}

/// Latest value of each exposure; `None` while still warming up
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstructedExposures {
    pub volatility: Option<f64>,
    pub liquidity: Option<f64>,
    pub reversal: Option<f64>,
}

/// Apply `f` to every complete trailing window, keyed by the window's last date
fn rolling<F>(points: &[(NaiveDate, f64)], window: usize, f: F) -> TimeSeries
where
    F: Fn(&[f64]) -> f64,
{
    if window == 0 || points.len() < window {
        return TimeSeries::new();
    }
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    values
        .windows(window)
        .enumerate()
        .map(|(i, w)| (points[i + window - 1].0, f(w)))
        .filter(|(_, v)| v.is_finite())
        .collect()
}

pub struct ConstructedFactorCalculator {
    config: ConstructedFactorConfig,
}

impl ConstructedFactorCalculator {
    pub fn new(config: ConstructedFactorConfig) -> Self {
        Self { config }
    }

    /// Rolling sample std of returns, annualized
    pub fn volatility(&self, returns: &TimeSeries) -> TimeSeries {
        let points: Vec<_> = returns.finite().iter().collect();
        rolling(&points, self.config.volatility_window, |w| {
            w.std_dev() * TRADING_DAYS_PER_YEAR.sqrt()
        })
    }

    /// Negative log of rolling mean dollar volume; higher means less liquid
    pub fn liquidity(&self, prices: &PriceHistory) -> TimeSeries {
        let points: Vec<_> = prices
            .iter()
            .map(|(d, bar)| (*d, bar.close * bar.volume))
            .filter(|(_, v)| v.is_finite())
            .collect();
        rolling(&points, self.config.liquidity_window, |w| -w.mean().ln_1p())
    }

    /// Rolling compounded return minus one
    pub fn reversal(&self, returns: &TimeSeries) -> TimeSeries {
        let points: Vec<_> = returns.finite().iter().collect();
        rolling(&points, self.config.reversal_window, |w| {
            w.iter().map(|r| 1.0 + r).product::<f64>() - 1.0
        })
    }

    pub fn security_factors(
        &self,
        returns: &TimeSeries,
        prices: &PriceHistory,
    ) -> SecurityFactorSeries {
        SecurityFactorSeries {
            volatility: self.volatility(returns),
            liquidity: self.liquidity(prices),
            reversal: self.reversal(returns),
        }
    }

    /// Most recent exposure values for one security
    pub fn latest_exposures(
        &self,
        returns: &TimeSeries,
        prices: &PriceHistory,
    ) -> ConstructedExposures {
        let factors = self.security_factors(returns, prices);
        ConstructedExposures {
            volatility: factors.volatility.last_value(),
            liquidity: factors.liquidity.last_value(),
            reversal: factors.reversal.last_value(),
        }
    }

    /// Exposure series for every security that has both returns and prices
    pub fn portfolio_factors(
        &self,
        returns: &HashMap<String, TimeSeries>,
        prices: &HashMap<String, PriceHistory>,
    ) -> HashMap<String, SecurityFactorSeries> {
        returns
            .iter()
            .filter_map(|(ticker, r)| {
                prices
                    .get(ticker)
                    .map(|p| (ticker.clone(), self.security_factors(r, p)))
            })
            .collect()
    }
}

/// Z-score a series over the full sample, or over a trailing window when given.
///
/// Full-sample zero dispersion maps every value to 0; rolling windows with zero
/// dispersion are skipped.
pub fn standardize(series: &TimeSeries, window: Option<usize>) -> TimeSeries {
    let points: Vec<_> = series.finite().iter().collect();
    match window {
        Some(window) => {
            if window == 0 || points.len() < window {
                return TimeSeries::new();
            }
            let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
            values
                .windows(window)
                .enumerate()
                .filter_map(|(i, w)| {
                    let sd = w.std_dev();
                    if sd > 0.0 {
                        Some((points[i + window - 1].0, (w[window - 1] - w.mean()) / sd))
                    } else {
                        None
                    }
                })
                .collect()
        }
        None => {
            let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
            let m = values.iter().mean();
            let sd = values.iter().std_dev();
            points
                .iter()
                .map(|(d, v)| (*d, if sd > 0.0 { (v - m) / sd } else { 0.0 }))
                .collect()
        }
    }
}

/// Standardize each exposure across securities on one date (population std).
///
/// Securities without a value on `date` are left out for that factor.
pub fn cross_sectional_standardize(
    all: &HashMap<String, SecurityFactorSeries>,
    date: NaiveDate,
) -> HashMap<String, BTreeMap<ConstructedFactor, f64>> {
    let mut result: HashMap<String, BTreeMap<ConstructedFactor, f64>> = HashMap::new();

    for factor in ConstructedFactor::ALL {
        let observed: Vec<(&String, f64)> = all
            .iter()
            .filter_map(|(ticker, s)| {
                s.get(factor)
                    .get(&date)
                    .filter(|v| v.is_finite())
                    .map(|v| (ticker, v))
            })
            .collect();
        if observed.is_empty() {
            continue;
        }

        let values: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();
        let m = values.iter().mean();
        let sd = values.iter().population_std_dev();
        for (ticker, v) in observed {
            let z = if sd > 0.0 { (v - m) / sd } else { 0.0 };
            result.entry(ticker.clone()).or_default().insert(factor, z);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    fn alternating_returns(n: usize) -> TimeSeries {
        dates(n)
            .into_iter()
            .enumerate()
            .map(|(i, d)| (d, if i % 2 == 0 { 0.01 } else { -0.01 }))
            .collect()
    }

    #[test]
    fn test_volatility_warm_up_and_value() {
        let calc = ConstructedFactorCalculator::new(ConstructedFactorConfig::default());
        assert!(calc.volatility(&alternating_returns(59)).is_empty());

        let vol = calc.volatility(&alternating_returns(61));
        assert_eq!(vol.len(), 2);
        // 30 values of +1% and 30 of -1%: sample std = 0.01 * sqrt(60/59)
        let expected = 0.01 * (60.0f64 / 59.0).sqrt() * 252f64.sqrt();
        assert!((vol.values()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_reversal_compounds_window() {
        let calc = ConstructedFactorCalculator::new(ConstructedFactorConfig::default());
        let returns: TimeSeries = dates(21).into_iter().map(|d| (d, 0.01)).collect();
        let rev = calc.reversal(&returns);
        assert_eq!(rev.len(), 1);
        assert!((rev.values()[0] - (1.01f64.powi(21) - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_liquidity_is_negative_log_dollar_volume() {
        let calc = ConstructedFactorCalculator::new(ConstructedFactorConfig::default());
        let prices: PriceHistory = dates(30)
            .into_iter()
            .map(|d| (d, PriceBar { close: 10.0, volume: 1_000.0 }))
            .collect();
        let liq = calc.liquidity(&prices);
        assert_eq!(liq.len(), 1);
        assert!((liq.values()[0] + 10_000f64.ln_1p()).abs() < 1e-12);

        let exposures = calc.latest_exposures(&alternating_returns(30), &prices);
        assert!(exposures.volatility.is_none());
        assert!(exposures.liquidity.is_some());
        assert!(exposures.reversal.is_some());
    }

    #[test]
    fn test_standardize_full_sample() {
        let series: TimeSeries = dates(4)
            .into_iter()
            .zip([1.0, 2.0, 3.0, 4.0])
            .collect();
        let z = standardize(&series, None);
        let values = z.values();
        assert!((values.iter().sum::<f64>()).abs() < 1e-12);
        assert!((values.iter().std_dev() - 1.0).abs() < 1e-12);

        let flat: TimeSeries = dates(3).into_iter().map(|d| (d, 5.0)).collect();
        assert!(standardize(&flat, None).values().iter().all(|v| *v == 0.0));
        assert!(standardize(&flat, Some(2)).is_empty());

        // A lone observation has no sample spread
        let single: TimeSeries = dates(1).into_iter().map(|d| (d, 3.0)).collect();
        assert_eq!(standardize(&single, None).values(), vec![0.0]);
    }

    #[test]
    fn test_cross_sectional_standardize() {
        let day = dates(1)[0];
        let mut all = HashMap::new();
        for (ticker, vol) in [("AAA", 0.1), ("BBB", 0.3)] {
            let mut s = SecurityFactorSeries::default();
            s.volatility.insert(day, vol);
            all.insert(ticker.to_string(), s);
        }
        let mut lone = SecurityFactorSeries::default();
        lone.reversal.insert(day, 0.05);
        all.insert("CCC".to_string(), lone);

        let result = cross_sectional_standardize(&all, day);
        assert!((result["AAA"][&ConstructedFactor::Volatility] + 1.0).abs() < 1e-12);
        assert!((result["BBB"][&ConstructedFactor::Volatility] - 1.0).abs() < 1e-12);
        assert_eq!(result["CCC"][&ConstructedFactor::Reversal], 0.0);
        assert!(!result["CCC"].contains_key(&ConstructedFactor::Volatility));
    }
}
