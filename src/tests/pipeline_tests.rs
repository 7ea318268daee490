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

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{holding, in_percent, synthetic_factors, synthetic_returns, weights, CountingSource};
use crate::analytics::{AnalysisInputs, RiskAnalyticsService};
use crate::classification::{SectorOverrideService, TickerMetadata};
use crate::collaborators::{
    InMemoryBenchmarks, InMemoryHoldings, InMemoryMarketData, InMemoryMetadata,
};
use crate::config::EngineConfig;
use crate::factor_data::FactorDataConfig;
use crate::regression::{
    InMemoryRegressionStore, RegressionConfig, RegressionFailure, SecurityRegressionEngine,
};
use crate::risk::{RiskDecompositionEngine, RiskModel};
use crate::series::TimeSeries;

const TICKERS: [(&str, f64, &str); 4] = [
    ("AAPL", 1.2, "Technology"),
    ("MSFT", 1.0, "Technology"),
    ("XOM", 0.8, "Energy"),
    ("JPM", 1.1, "Financial Services"),
];

fn security_returns(days: usize) -> HashMap<String, TimeSeries> {
    let factors = synthetic_factors(days);
    TICKERS
        .iter()
        .enumerate()
        .map(|(i, (ticker, beta, _))| {
            let series = synthetic_returns(&factors, days, *beta, 7 + i as u64);
            (ticker.to_string(), series)
        })
        .collect()
}

fn inputs(days: usize) -> AnalysisInputs {
    AnalysisInputs {
        portfolio_weights: weights(&[("AAPL", 0.40), ("MSFT", 0.10), ("XOM", 0.30), ("JPM", 0.20)]),
        benchmark_holdings: TICKERS
            .iter()
            .map(|(ticker, _, sector)| (ticker.to_string(), holding(0.25, sector, "US")))
            .collect(),
        security_returns: security_returns(days),
        ..Default::default()
    }
}

fn counting_source(days: usize, fail: bool) -> Arc<CountingSource> {
    Arc::new(CountingSource::new(in_percent(&synthetic_factors(days)), fail))
}

#[tokio::test]
async fn test_full_factor_model_analysis() {
    let source = counting_source(200, false);
    let config = EngineConfig::default();
    let service = crate::create_in_memory_analytics_service(&config, source.clone());

    let analysis = service.analyze(&inputs(200)).await.unwrap();
    assert_eq!(analysis.model(), RiskModel::FactorModel);
    assert_eq!(analysis.regressions.len(), 4);
    assert!(analysis.failures.is_empty());
    assert!(analysis.warnings.is_empty(), "{:?}", analysis.warnings);

    let summary = &analysis.summary;
    assert_eq!(summary.observations, 200);
    assert!(summary.total_active_risk > 0.0);
    assert!((summary.factor_risk_pct + summary.idio_risk_pct - 100.0).abs() < 1e-9);
    assert!(summary.ex_ante_beta > 0.8 && summary.ex_ante_beta < 1.2);

    assert_eq!(analysis.securities.len(), 4);
    assert_eq!(analysis.securities["XOM"].sector, "Energy");
    assert!((analysis.securities["AAPL"].active_weight - 0.15).abs() < 1e-12);

    let top: f64 = analysis.trees.factor_groups.iter().map(|n| n.ctev).sum();
    assert!((top - summary.total_active_risk * summary.average_r_squared).abs() < 1e-9);
    assert_eq!(analysis.factor_contributions.len(), 6);
    assert!(analysis.top_idiosyncratic.len() <= 4);

    let idio_total: f64 = analysis.idio_ctev_by_sector.values().sum();
    let idio_securities: f64 = analysis.securities.values().map(|m| m.idio_ctev).sum();
    assert!((idio_total - idio_securities).abs() < 1e-9);

    // Second run reuses the in-process factor history
    service.analyze(&inputs(200)).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pipeline_never_touches_the_regression_cache() {
    let store = Arc::new(InMemoryRegressionStore::new());
    let engine = SecurityRegressionEngine::new(RegressionConfig::default(), store.clone());
    let service = RiskAnalyticsService::new(
        crate::create_factor_data_provider(
            FactorDataConfig::default(),
            counting_source(200, false),
        ),
        Arc::new(engine),
        RiskDecompositionEngine::default(),
        Arc::new(SectorOverrideService::empty()),
    );

    let analysis = service.analyze(&inputs(200)).await.unwrap();
    assert_eq!(analysis.regressions.len(), 4);
    assert!(analysis.regressions.values().all(|r| r.has_series()));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_unavailable_factor_data_falls_back_to_returns_only() {
    let source = counting_source(200, true);
    let service = crate::create_in_memory_analytics_service(&EngineConfig::default(), source);

    let analysis = service.analyze(&inputs(200)).await.unwrap();
    assert_eq!(analysis.model(), RiskModel::ReturnsOnly);
    assert!(analysis.regressions.is_empty());
    assert!(analysis.trees.factor_groups.is_empty());
    assert!(analysis.trees.sectors.is_empty());
    assert_eq!(analysis.summary.factor_ctev_budget(), 0.0);
    assert!(analysis.summary.total_active_risk > 0.0);
    assert_eq!(analysis.warnings.len(), 1);
    // Weights and classifications are still reported
    assert_eq!(analysis.securities.len(), 4);
    assert!(analysis.securities.values().all(|m| !m.has_regression));
}

#[tokio::test]
async fn test_short_histories_report_failures_and_fall_back() {
    let source = counting_source(60, false);
    let service = crate::create_in_memory_analytics_service(&EngineConfig::default(), source);

    let analysis = service.analyze(&inputs(60)).await.unwrap();
    assert_eq!(analysis.model(), RiskModel::ReturnsOnly);
    assert_eq!(analysis.failures.len(), 4);
    assert!(analysis.failures.values().all(|f| matches!(
        f,
        RegressionFailure::InsufficientData { observations: 60, required: 126 }
    )));
}

#[tokio::test]
async fn test_no_returns_at_all_is_returns_only() {
    let source = counting_source(10, false);
    let config = EngineConfig::default();
    let service = crate::create_in_memory_analytics_service(&config, source.clone());

    let mut empty = inputs(10);
    empty.security_returns.clear();
    let analysis = service.analyze(&empty).await.unwrap();
    assert_eq!(analysis.model(), RiskModel::ReturnsOnly);
    assert_eq!(analysis.summary.observations, 0);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gather_from_collaborators_then_analyze() {
    let days = 200;
    let mut returns = security_returns(days);
    let benchmark_series = crate::analytics::weighted_returns(
        &returns,
        &weights(&[("AAPL", 0.25), ("MSFT", 0.25), ("XOM", 0.25), ("JPM", 0.25)]),
    );
    returns.insert("SPY".to_string(), benchmark_series);
    let market = InMemoryMarketData::new(returns);

    let holdings = InMemoryHoldings::new();
    holdings.set_portfolio(
        "growth",
        weights(&[("aapl", 0.40), ("msft", 0.10), ("xom", 0.30), ("jpm", 0.20)]),
        HashMap::new(),
    );

    let benchmarks = InMemoryBenchmarks::new();
    benchmarks.set_constituents(
        "spy",
        TICKERS
            .iter()
            .map(|(ticker, _, sector)| (ticker.to_string(), holding(0.25, sector, "US")))
            .collect(),
    );

    let metadata = InMemoryMetadata::new(HashMap::from([(
        "XOM".to_string(),
        TickerMetadata {
            industry: Some("Oil & Gas Integrated".to_string()),
            ..Default::default()
        },
    )]));

    let dates = crate::regression::tests::trading_dates(days);
    let gathered = AnalysisInputs::gather(
        &market,
        &holdings,
        &metadata,
        &benchmarks,
        "growth",
        "SPY",
        dates[0],
        dates[days - 1],
    )
    .await
    .unwrap();

    assert_eq!(gathered.portfolio_weights.len(), 4);
    assert!(gathered.portfolio_weights.contains_key("AAPL"));
    assert_eq!(gathered.benchmark_holdings.len(), 4);
    assert!(!gathered.security_returns.contains_key("SPY"));
    assert_eq!(gathered.benchmark_returns.as_ref().map(TimeSeries::len), Some(days));
    assert!(gathered.daily_weights.is_none());
    assert_eq!(gathered.metadata.len(), 1);

    let config = EngineConfig::default();
    let service = crate::create_in_memory_analytics_service(&config, counting_source(days, false));
    let analysis = service.analyze(&gathered).await.unwrap();
    assert_eq!(analysis.model(), RiskModel::FactorModel);
    assert_eq!(analysis.securities["XOM"].industry, "Oil & Gas Integrated");

    // An unknown portfolio is the one hard failure
    let missing = AnalysisInputs::gather(
        &market,
        &holdings,
        &metadata,
        &benchmarks,
        "value",
        "SPY",
        dates[0],
        dates[days - 1],
    )
    .await;
    assert!(missing.is_err());
}
