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

//! End-to-end risk analysis and attribution over gathered inputs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::attribution::{AttributionEngine, AttributionError, AttributionInputs, BrinsonAnalysis};
use crate::classification::{
    BenchmarkHolding, Classification, ClassificationError, JsonFileSectorOverrideStore,
    SectorOverrideService, TickerMetadata,
};
use crate::collaborators::{
    BenchmarkProvider, CollaboratorError, HoldingsProvider, MarketDataProvider, MetadataProvider,
};
use crate::config::{ConfigError, EngineConfig};
use crate::factor_data::{
    FactorDataError, FactorDataProvider, FrenchLibrarySource, JsonFileFactorHistoryStore,
};
use crate::regression::{
    JsonDirRegressionStore, RegressionFailure, RegressionResult, RegressionTask,
    SecurityRegressionEngine, StoreError,
};
use crate::risk::{
    CtevTrees, FactorContribution, RiskDecompositionEngine, RiskModel, RiskSummary,
    SecurityRiskMetrics,
};
use crate::series::TimeSeries;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Factor data error: {0}")]
    FactorData(#[from] FactorDataError),

    #[error("Attribution error: {0}")]
    Attribution(#[from] AttributionError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Regression store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Subtract the risk-free rate carried forward onto each return date.
///
/// Dates before the first risk-free observation use a zero rate.
pub fn excess_returns(returns: &TimeSeries, risk_free: &TimeSeries) -> TimeSeries {
    let dates: Vec<NaiveDate> = returns.dates().collect();
    let rates = risk_free.forward_fill_onto(&dates);
    returns
        .iter()
        .zip(rates)
        .map(|((date, r), rf)| (date, r - rf.unwrap_or(0.0)))
        .collect()
}

/// Weighted sum of security returns per date over the securities observed that day
pub fn weighted_returns(
    returns: &HashMap<String, TimeSeries>,
    weights: &HashMap<String, f64>,
) -> TimeSeries {
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (ticker, weight) in weights {
        if let Some(series) = returns.get(ticker) {
            for (date, r) in series.finite().iter() {
                *totals.entry(date).or_default() += weight * r;
            }
        }
    }
    totals.into_iter().collect()
}

/// Everything one analysis needs, keyed by upper-case ticker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisInputs {
    pub portfolio_weights: HashMap<String, f64>,
    #[serde(default)]
    pub benchmark_holdings: HashMap<String, BenchmarkHolding>,
    /// Daily returns per security (portfolio and benchmark constituents)
    pub security_returns: HashMap<String, TimeSeries>,
    /// Realized portfolio returns; derived from weights when absent
    #[serde(default)]
    pub portfolio_returns: Option<TimeSeries>,
    /// Realized benchmark returns; derived from constituents when absent
    #[serde(default)]
    pub benchmark_returns: Option<TimeSeries>,
    #[serde(default)]
    pub daily_weights: Option<HashMap<String, TimeSeries>>,
    #[serde(default)]
    pub metadata: HashMap<String, TickerMetadata>,
}

impl AnalysisInputs {
    /// Collect inputs for one portfolio against one benchmark.
    ///
    /// Only a failure to read the portfolio weights is an error; other
    /// collaborator failures leave the affected entities empty.
    #[allow(clippy::too_many_arguments)]
    pub async fn gather(
        market: &dyn MarketDataProvider,
        holdings: &dyn HoldingsProvider,
        metadata: &dyn MetadataProvider,
        benchmarks: &dyn BenchmarkProvider,
        portfolio: &str,
        benchmark: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AnalyticsResult<Self> {
        let portfolio_weights = upper_keys(holdings.current_weights(portfolio).await?);

        let daily_weights = match holdings.daily_weights(portfolio, start, end).await {
            Ok(daily) if !daily.is_empty() => Some(upper_keys(daily)),
            Ok(_) => None,
            Err(e) => {
                warn!("Daily weights unavailable for {}: {}", portfolio, e);
                None
            }
        };

        let benchmark_holdings = match benchmarks.constituents(benchmark).await {
            Ok(h) => upper_keys(h),
            Err(e) => {
                warn!("Benchmark {} constituents unavailable: {}", benchmark, e);
                HashMap::new()
            }
        };

        let tickers: Vec<String> = portfolio_weights
            .keys()
            .chain(benchmark_holdings.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let metadata = match metadata.metadata(&tickers).await {
            Ok(m) => upper_keys(m),
            Err(e) => {
                warn!("Ticker metadata unavailable: {}", e);
                HashMap::new()
            }
        };

        let mut requested = tickers.clone();
        requested.push(benchmark.to_uppercase());
        let mut security_returns = match market.daily_returns(&requested, start, end).await {
            Ok(r) => upper_keys(r),
            Err(e) => {
                warn!("Market data unavailable: {}", e);
                HashMap::new()
            }
        };
        let benchmark_returns = security_returns.remove(&benchmark.to_uppercase());

        info!(
            "Gathered {} holdings, {} benchmark constituents, returns for {} securities",
            portfolio_weights.len(),
            benchmark_holdings.len(),
            security_returns.len()
        );
        Ok(Self {
            portfolio_weights,
            benchmark_holdings,
            security_returns,
            portfolio_returns: None,
            benchmark_returns,
            daily_weights,
            metadata,
        })
    }

    pub fn benchmark_weights(&self) -> HashMap<String, f64> {
        self.benchmark_holdings
            .iter()
            .map(|(t, h)| (t.clone(), h.weight))
            .collect()
    }

    /// Every ticker held on either side
    pub fn tickers(&self) -> BTreeSet<String> {
        self.portfolio_weights
            .keys()
            .chain(self.benchmark_holdings.keys())
            .cloned()
            .collect()
    }

    fn resolved_portfolio_returns(&self) -> TimeSeries {
        self.portfolio_returns
            .clone()
            .unwrap_or_else(|| weighted_returns(&self.security_returns, &self.portfolio_weights))
    }

    fn resolved_benchmark_returns(&self) -> TimeSeries {
        self.benchmark_returns
            .clone()
            .unwrap_or_else(|| weighted_returns(&self.security_returns, &self.benchmark_weights()))
    }

    /// Same inputs with every ticker key upper-cased
    pub fn normalized(&self) -> Self {
        Self {
            portfolio_weights: upper_keys(self.portfolio_weights.clone()),
            benchmark_holdings: upper_keys(self.benchmark_holdings.clone()),
            security_returns: upper_keys(self.security_returns.clone()),
            portfolio_returns: self.portfolio_returns.clone(),
            benchmark_returns: self.benchmark_returns.clone(),
            daily_weights: self.daily_weights.clone().map(upper_keys),
            metadata: upper_keys(self.metadata.clone()),
        }
    }
}

fn upper_keys<V>(map: HashMap<String, V>) -> HashMap<String, V> {
    map.into_iter().map(|(k, v)| (k.to_uppercase(), v)).collect()
}

/// Result of one risk analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub summary: RiskSummary,
    pub securities: BTreeMap<String, SecurityRiskMetrics>,
    pub trees: CtevTrees,
    pub factor_contributions: Vec<FactorContribution>,
    /// Largest |idiosyncratic CTEV| first
    pub top_idiosyncratic: Vec<SecurityRiskMetrics>,
    /// Idiosyncratic CTEV summed by sector
    pub idio_ctev_by_sector: BTreeMap<String, f64>,
    pub regressions: BTreeMap<String, RegressionResult>,
    pub failures: BTreeMap<String, RegressionFailure>,
    pub warnings: Vec<String>,
}

impl RiskAnalysis {
    pub fn model(&self) -> RiskModel {
        self.summary.model
    }
}

/// Runs the factor risk pipeline and the Brinson attribution
pub struct RiskAnalyticsService {
    factor_data: Arc<FactorDataProvider>,
    regressions: Arc<SecurityRegressionEngine>,
    risk: RiskDecompositionEngine,
    overrides: Arc<SectorOverrideService>,
    attribution: AttributionEngine,
}

impl RiskAnalyticsService {
    pub fn new(
        factor_data: Arc<FactorDataProvider>,
        regressions: Arc<SecurityRegressionEngine>,
        risk: RiskDecompositionEngine,
        overrides: Arc<SectorOverrideService>,
    ) -> Self {
        let attribution = AttributionEngine::new(overrides.clone());
        Self {
            factor_data,
            regressions,
            risk,
            overrides,
            attribution,
        }
    }

    /// Service with file-backed caches under `storage.cache_dir` and the
    /// French data library as factor source
    pub async fn from_config(config: &EngineConfig) -> AnalyticsResult<Self> {
        let source = FrenchLibrarySource::new(&config.factor_data)?;
        let factor_data = FactorDataProvider::new(
            config.factor_data.clone(),
            Arc::new(source),
            Arc::new(JsonFileFactorHistoryStore::new(config.storage.factor_history_path())),
        );
        let regressions = SecurityRegressionEngine::new(
            config.regression.clone(),
            Arc::new(JsonDirRegressionStore::new(config.storage.regression_dir())),
        );
        let overrides = SectorOverrideService::load(Arc::new(JsonFileSectorOverrideStore::new(
            config.storage.sector_overrides_path(),
        )))
        .await?;

        Ok(Self::new(
            Arc::new(factor_data),
            Arc::new(regressions),
            RiskDecompositionEngine::new(config.risk.clone()),
            Arc::new(overrides),
        ))
    }

    pub fn factor_data(&self) -> &Arc<FactorDataProvider> {
        &self.factor_data
    }

    pub fn regressions(&self) -> &Arc<SecurityRegressionEngine> {
        &self.regressions
    }

    pub fn overrides(&self) -> &Arc<SectorOverrideService> {
        &self.overrides
    }

    /// Run the full factor risk pipeline.
    ///
    /// Falls back to a returns-only analysis when factor data is unavailable
    /// or no security could be regressed.
    pub async fn analyze(&self, inputs: &AnalysisInputs) -> AnalyticsResult<RiskAnalysis> {
        let inputs = inputs.normalized();
        let portfolio_returns = inputs.resolved_portfolio_returns();
        let benchmark_returns = inputs.resolved_benchmark_returns();
        let benchmark_weights = inputs.benchmark_weights();
        let tickers = inputs.tickers();
        let classifications =
            self.overrides
                .classify_all(tickers.iter(), &inputs.metadata, &inputs.benchmark_holdings);

        let start = inputs.security_returns.values().filter_map(TimeSeries::first_date).min();
        let end = inputs.security_returns.values().filter_map(TimeSeries::last_date).max();
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                warn!("No security returns; running returns-only analysis");
                return Ok(self.returns_only(
                    &inputs,
                    &classifications,
                    &portfolio_returns,
                    &benchmark_returns,
                ));
            }
        };
        info!(
            "Running factor model analysis for {} securities ({} to {})",
            tickers.len(),
            start,
            end
        );

        let factors = match self.factor_data.get_factor_returns(Some(start), Some(end)).await {
            Ok(f) if !f.is_empty() => f,
            Ok(_) => {
                warn!(
                    "No factor data between {} and {}; running returns-only analysis",
                    start, end
                );
                return Ok(self.returns_only(
                    &inputs,
                    &classifications,
                    &portfolio_returns,
                    &benchmark_returns,
                ));
            }
            Err(e) => {
                warn!("Factor data unavailable ({}); running returns-only analysis", e);
                return Ok(self.returns_only(
                    &inputs,
                    &classifications,
                    &portfolio_returns,
                    &benchmark_returns,
                ));
            }
        };
        let risk_free = factors.risk_free();

        let unclassified = Classification::default();
        let tasks: Vec<RegressionTask> = tickers
            .iter()
            .filter_map(|ticker| {
                let returns = inputs.security_returns.get(ticker)?;
                let class = classifications.get(ticker).unwrap_or(&unclassified);
                Some(RegressionTask {
                    ticker: ticker.clone(),
                    excess_returns: excess_returns(returns, &risk_free),
                    sector: class.sector.clone(),
                    country: class.country.clone(),
                })
            })
            .collect();

        // Residual series are needed below and are never cached
        let batch = self.regressions.regress_many(tasks, Arc::new(factors), false).await;
        if batch.results.is_empty() {
            warn!("No regressions succeeded; running returns-only analysis");
            let mut analysis = self.returns_only(
                &inputs,
                &classifications,
                &portfolio_returns,
                &benchmark_returns,
            );
            analysis.failures = batch.failures.into_iter().collect();
            return Ok(analysis);
        }

        let results = batch.results;
        let securities = self.risk.all_security_risks(
            &results,
            &inputs.portfolio_weights,
            &benchmark_weights,
            &classifications,
        );
        let summary = self.risk.summary(
            &results,
            &inputs.portfolio_weights,
            &benchmark_weights,
            &portfolio_returns,
            &benchmark_returns,
        );
        let trees = self.risk.ctev_trees(&securities, &results, &summary);
        let factor_contributions = self.risk.factor_contributions(&results, &securities, &trees);
        let top_idiosyncratic = self.risk.top_idiosyncratic(&securities);
        let warnings = self.risk.validate(&summary, &trees);

        info!(
            "Risk analysis complete: TE {:.2}%, factor {:.1}%, {} securities, {} warnings",
            summary.total_active_risk,
            summary.factor_risk_pct,
            securities.len(),
            warnings.len()
        );

        Ok(RiskAnalysis {
            summary,
            idio_ctev_by_sector: idio_ctev_by_sector(&securities),
            securities,
            trees,
            factor_contributions,
            top_idiosyncratic,
            regressions: results.into_iter().collect(),
            failures: batch.failures.into_iter().collect(),
            warnings,
        })
    }

    fn returns_only(
        &self,
        inputs: &AnalysisInputs,
        classifications: &HashMap<String, Classification>,
        portfolio_returns: &TimeSeries,
        benchmark_returns: &TimeSeries,
    ) -> RiskAnalysis {
        let summary = self.risk.returns_only_summary(portfolio_returns, benchmark_returns);
        let securities = self.risk.all_security_risks(
            &HashMap::new(),
            &inputs.portfolio_weights,
            &inputs.benchmark_weights(),
            classifications,
        );
        RiskAnalysis {
            summary,
            securities,
            trees: CtevTrees::default(),
            factor_contributions: Vec::new(),
            top_idiosyncratic: Vec::new(),
            idio_ctev_by_sector: BTreeMap::new(),
            regressions: BTreeMap::new(),
            failures: BTreeMap::new(),
            warnings: vec!["Factor model unavailable; showing returns-only risk".to_string()],
        }
    }

    /// Brinson-Fachler attribution of the inputs over `start..=end`
    pub fn attribution(
        &self,
        inputs: &AnalysisInputs,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AnalyticsResult<BrinsonAnalysis> {
        let inputs = inputs.normalized();
        let attribution_inputs = AttributionInputs {
            portfolio_weights: inputs.portfolio_weights,
            benchmark_holdings: inputs.benchmark_holdings,
            portfolio_returns: inputs.security_returns.clone(),
            benchmark_returns: inputs.security_returns,
            daily_weights: inputs.daily_weights,
            metadata: inputs.metadata,
        };
        Ok(self.attribution.calculate_attribution(&attribution_inputs, start, end)?)
    }
}

fn idio_ctev_by_sector(
    securities: &BTreeMap<String, SecurityRiskMetrics>,
) -> BTreeMap<String, f64> {
    let mut by_sector = BTreeMap::new();
    for m in securities.values() {
        *by_sector.entry(m.sector.clone()).or_insert(0.0) += m.idio_ctev;
    }
    by_sector
}
