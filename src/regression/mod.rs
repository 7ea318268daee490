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

pub mod batch;
pub mod cache;
pub mod ols;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;
use tracing::{debug, warn};

use crate::factor_data::{Factor, FactorReturnSeries};
use crate::series::{TimeSeries, TRADING_DAYS_PER_YEAR};

pub use batch::{RegressionBatch, RegressionTask};
pub use cache::{
    InMemoryRegressionStore, JsonDirRegressionStore, RegressionStore, StoreError, StoreResult,
};
use ols::OlsError;

/// Why a security produced no regression result
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum RegressionFailure {
    #[error("insufficient data: {observations} aligned observations, {required} required")]
    InsufficientData { observations: usize, required: usize },

    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error("regression task failed: {0}")]
    TaskFailed(String),
}

/// Outcome of one security's regression
pub type RegressionOutcome = Result<RegressionResult, RegressionFailure>;

/// Configuration for the security regression engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    /// Minimum aligned observations (inclusive)
    pub min_observations: usize,
    /// Cached results younger than this are reused
    pub cache_ttl_days: i64,
    /// Condition number of X'X above which the pseudo-inverse is used
    pub condition_threshold: f64,
    /// Concurrent regressions in a batch
    pub max_workers: usize,
    /// Whether callers that do not need residual series may reuse cached fits
    pub reuse_cached: bool,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            min_observations: 126, // ~6 months of trading days
            cache_ttl_days: 7,
            condition_threshold: 1e10,
            max_workers: 10,
            reuse_cached: true,
        }
    }
}

/// Six-factor regression of one security's excess returns.
///
/// Residual and fitted series are not persisted; a result loaded from the store
/// carries neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub ticker: String,
    /// Factor loadings
    pub betas: BTreeMap<Factor, f64>,
    /// Daily intercept
    pub alpha: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub std_errors: BTreeMap<Factor, f64>,
    pub t_stats: BTreeMap<Factor, f64>,
    pub p_values: BTreeMap<Factor, f64>,
    pub alpha_std_error: f64,
    pub alpha_t_stat: f64,
    pub alpha_p_value: f64,
    pub observations: usize,
    pub fitted_at: DateTime<Utc>,
    pub sector: String,
    pub country: String,
    /// Annualized std of residuals (decimal)
    pub idiosyncratic_vol: f64,
    /// Annualized std of fitted values (decimal)
    pub factor_vol: f64,
    pub used_pseudo_inverse: bool,
    #[serde(skip)]
    pub residuals: Option<TimeSeries>,
    #[serde(skip)]
    pub fitted: Option<TimeSeries>,
}

impl RegressionResult {
    /// Loading on `factor`, 0 when absent
    pub fn beta(&self, factor: Factor) -> f64 {
        self.betas.get(&factor).copied().unwrap_or(0.0)
    }

    /// Market loading; a missing market beta is read as 1.0
    pub fn market_beta(&self) -> f64 {
        self.betas.get(&Factor::Market).copied().unwrap_or(1.0)
    }

    /// Total volatility implied by the factor/idiosyncratic split
    pub fn total_vol(&self) -> f64 {
        (self.idiosyncratic_vol.powi(2) + self.factor_vol.powi(2)).sqrt()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl_days: i64) -> bool {
        now - self.fitted_at >= Duration::days(ttl_days)
    }

    pub fn has_series(&self) -> bool {
        self.residuals.is_some()
    }

    /// Whether every summary statistic is finite (series excluded)
    pub fn is_finite(&self) -> bool {
        let scalars = [
            self.alpha,
            self.r_squared,
            self.adj_r_squared,
            self.alpha_std_error,
            self.alpha_t_stat,
            self.alpha_p_value,
            self.idiosyncratic_vol,
            self.factor_vol,
        ];
        scalars
            .iter()
            .chain(self.betas.values())
            .chain(self.std_errors.values())
            .chain(self.t_stats.values())
            .chain(self.p_values.values())
            .all(|v| v.is_finite())
    }
}

/// Regress `excess_returns` on the six factors over their common dates.
///
/// Pure computation; no caching.
pub fn fit_security(
    ticker: &str,
    excess_returns: &TimeSeries,
    factors: &FactorReturnSeries,
    sector: &str,
    country: &str,
    config: &RegressionConfig,
) -> RegressionOutcome {
    let required = config.min_observations;
    let clean = excess_returns.finite();
    if clean.len() < required {
        return Err(RegressionFailure::InsufficientData {
            observations: clean.len(),
            required,
        });
    }

    let rows: Vec<_> = clean
        .iter()
        .filter_map(|(date, y)| {
            factors
                .get(&date)
                .filter(|obs| Factor::ALL.iter().all(|f| obs.get(*f).is_finite()))
                .map(|obs| (date, y, *obs))
        })
        .collect();
    if rows.len() < required {
        return Err(RegressionFailure::InsufficientData {
            observations: rows.len(),
            required,
        });
    }

    let n = rows.len();
    let k = Factor::ALL.len() + 1;
    let x = DMatrix::from_fn(n, k, |i, j| {
        if j == 0 {
            1.0
        } else {
            rows[i].2.get(Factor::ALL[j - 1])
        }
    });
    let y = DVector::from_iterator(n, rows.iter().map(|(_, y, _)| *y));

    let fit = ols::fit(&x, &y, config.condition_threshold).map_err(|e| match e {
        OlsError::Underdetermined { observations, .. } => RegressionFailure::InsufficientData {
            observations,
            required,
        },
        other => RegressionFailure::NumericalInstability(other.to_string()),
    })?;

    let by_factor = |values: &[f64]| -> BTreeMap<Factor, f64> {
        Factor::ALL
            .iter()
            .enumerate()
            .map(|(i, f)| (*f, values[i + 1]))
            .collect()
    };

    let annualizer = TRADING_DAYS_PER_YEAR.sqrt();
    let dates: Vec<_> = rows.iter().map(|(d, _, _)| *d).collect();

    Ok(RegressionResult {
        ticker: ticker.to_uppercase(),
        betas: by_factor(&fit.coefficients),
        alpha: fit.coefficients[0],
        r_squared: fit.r_squared,
        adj_r_squared: fit.adj_r_squared,
        std_errors: by_factor(&fit.std_errors),
        t_stats: by_factor(&fit.t_stats),
        p_values: by_factor(&fit.p_values),
        alpha_std_error: fit.std_errors[0],
        alpha_t_stat: fit.t_stats[0],
        alpha_p_value: fit.p_values[0],
        observations: n,
        fitted_at: Utc::now(),
        sector: sector.to_string(),
        country: country.to_string(),
        idiosyncratic_vol: fit.residuals.iter().population_std_dev() * annualizer,
        factor_vol: fit.fitted.iter().population_std_dev() * annualizer,
        used_pseudo_inverse: fit.used_pseudo_inverse,
        residuals: Some(dates.iter().copied().zip(fit.residuals.iter().copied()).collect()),
        fitted: Some(dates.iter().copied().zip(fit.fitted.iter().copied()).collect()),
    })
}

/// Per-security factor regressions with a persistent result cache
pub struct SecurityRegressionEngine {
    config: RegressionConfig,
    store: Arc<dyn RegressionStore>,
}

impl SecurityRegressionEngine {
    pub fn new(config: RegressionConfig, store: Arc<dyn RegressionStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &RegressionConfig {
        &self.config
    }

    /// Cached result for `ticker` if it is younger than the cache window
    pub async fn cached(&self, ticker: &str) -> Option<RegressionResult> {
        let ticker = ticker.to_uppercase();
        match self.store.load(&ticker).await {
            Ok(Some(result)) if !result.is_stale(Utc::now(), self.config.cache_ttl_days) => {
                Some(result)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read cached regression for {}: {}", ticker, e);
                None
            }
        }
    }

    /// Regress one security, reporting why no result was produced.
    ///
    /// With `use_cache` a fresh cached fit is returned as-is and a new fit is
    /// written back to the store.
    pub async fn try_regress(
        &self,
        ticker: &str,
        excess_returns: &TimeSeries,
        factors: &FactorReturnSeries,
        sector: &str,
        country: &str,
        use_cache: bool,
    ) -> RegressionOutcome {
        if use_cache {
            if let Some(cached) = self.cached(ticker).await {
                debug!("Using cached regression for {}", cached.ticker);
                return Ok(cached);
            }
        }

        let result = fit_security(ticker, excess_returns, factors, sector, country, &self.config)?;
        debug!(
            "Regressed {}: n={} R2={:.3} beta_mkt={:.3}",
            result.ticker,
            result.observations,
            result.r_squared,
            result.beta(Factor::Market)
        );

        if use_cache {
            if let Err(e) = self.store.save(&result).await {
                warn!("Failed to cache regression for {}: {}", result.ticker, e);
            }
        }
        Ok(result)
    }

    /// Regress one security; insufficient history and solver failures yield `None`
    pub async fn regress(
        &self,
        ticker: &str,
        excess_returns: &TimeSeries,
        factors: &FactorReturnSeries,
        sector: &str,
        country: &str,
        use_cache: bool,
    ) -> Option<RegressionResult> {
        match self
            .try_regress(ticker, excess_returns, factors, sector, country, use_cache)
            .await
        {
            Ok(result) => Some(result),
            Err(RegressionFailure::InsufficientData { .. }) => None,
            Err(e) => {
                warn!("Regression failed for {}: {}", ticker, e);
                None
            }
        }
    }

    /// Remove one ticker's cached fit, or all of them
    pub async fn clear_cache(&self, ticker: Option<&str>) -> StoreResult<()> {
        match ticker {
            Some(t) => self.store.remove(&t.to_uppercase()).await,
            None => self.store.clear().await,
        }
    }
}
