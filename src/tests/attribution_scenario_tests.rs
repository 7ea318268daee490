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
use std::sync::Arc;

use chrono::NaiveDate;

use super::{holding, in_percent, synthetic_factors, weights, CountingSource};
use crate::analytics::{AnalysisInputs, AnalyticsError, RiskAnalyticsService};
use crate::attribution::AttributionError;
use crate::classification::SectorOverrideService;
use crate::config::EngineConfig;
use crate::series::TimeSeries;

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

/// Three daily returns compounding to `total` over March
fn march_returns(total: f64) -> TimeSeries {
    let step = (1.0 + total).powf(1.0 / 3.0) - 1.0;
    TimeSeries::from_pairs([(date(3, 4), step), (date(3, 5), step), (date(3, 6), step)])
}

fn service() -> RiskAnalyticsService {
    let source = Arc::new(CountingSource::new(in_percent(&synthetic_factors(10)), false));
    crate::create_in_memory_analytics_service(&EngineConfig::default(), source)
}

fn two_stock_inputs() -> AnalysisInputs {
    AnalysisInputs {
        portfolio_weights: weights(&[("a", 0.6), ("b", 0.4)]),
        benchmark_holdings: HashMap::from([
            ("a".to_string(), holding(0.4, "Technology", "US")),
            ("b".to_string(), holding(0.6, "Technology", "US")),
        ]),
        security_returns: HashMap::from([
            ("a".to_string(), march_returns(0.20)),
            ("b".to_string(), march_returns(0.10)),
        ]),
        ..Default::default()
    }
}

#[test]
fn test_two_stock_single_sector_excess_is_all_selection() {
    let analysis = service().attribution(&two_stock_inputs(), date(3, 1), date(3, 31)).unwrap();

    assert!((analysis.total_benchmark_return - 0.14).abs() < 1e-9);
    assert!((analysis.total_portfolio_return - 0.16).abs() < 1e-9);
    assert!((analysis.total_excess_return - 0.02).abs() < 1e-9);
    assert!(analysis.total_allocation_effect.abs() < 1e-9);
    assert!((analysis.total_selection_effect - 0.02).abs() < 1e-9);

    // Keys come back upper-cased
    assert!(analysis.by_security.contains_key("A"));
    assert!(analysis.by_security.contains_key("B"));

    let security_total: f64 = analysis.by_security.values().map(|r| r.total_effect).sum();
    let sector_total: f64 = analysis.by_sector.values().map(|r| r.total_effect).sum();
    assert!((security_total - analysis.total_excess_return).abs() < 1e-9);
    assert!((sector_total - security_total).abs() < 1e-9);
    assert!((analysis.total_effect() - analysis.total_excess_return).abs() < 1e-9);
}

#[test]
fn test_period_outside_the_returns_gives_zero_effects() {
    let analysis = service().attribution(&two_stock_inputs(), date(6, 1), date(6, 30)).unwrap();
    assert_eq!(analysis.total_portfolio_return, 0.0);
    assert_eq!(analysis.total_benchmark_return, 0.0);
    assert_eq!(analysis.by_security.len(), 2);
    assert!(analysis.by_security.values().all(|r| r.total_effect.abs() < 1e-12));
}

#[test]
fn test_reversed_period_is_an_attribution_error() {
    let result = service().attribution(&two_stock_inputs(), date(3, 31), date(3, 1));
    assert!(matches!(
        result,
        Err(AnalyticsError::Attribution(AttributionError::InvalidPeriod { .. }))
    ));
}

#[tokio::test]
async fn test_override_moves_off_benchmark_holding_into_sector() {
    let overrides = Arc::new(SectorOverrideService::empty());
    overrides.set_override("pltr", "Technology", Some("Software")).await.unwrap();

    let source = Arc::new(CountingSource::new(in_percent(&synthetic_factors(10)), false));
    let config = EngineConfig::default();
    let service = RiskAnalyticsService::new(
        crate::create_factor_data_provider(config.factor_data.clone(), source),
        crate::create_regression_engine(config.regression.clone()),
        crate::risk::RiskDecompositionEngine::new(config.risk.clone()),
        overrides,
    );

    let mut inputs = two_stock_inputs();
    inputs.portfolio_weights = weights(&[("A", 0.5), ("B", 0.3), ("PLTR", 0.2)]);
    inputs.security_returns.insert("PLTR".to_string(), march_returns(0.40));

    let analysis = service.attribution(&inputs, date(3, 1), date(3, 31)).unwrap();
    let pltr = &analysis.by_security["PLTR"];
    assert_eq!(pltr.sector, "Technology");
    assert_eq!(pltr.industry, "Software");
    assert_eq!(pltr.benchmark_weight, 0.0);

    assert_eq!(analysis.by_sector.len(), 1);
    assert_eq!(analysis.by_sector["Technology"].name, "Technology (3 holdings)");
    // One sector fully invested on both sides: no allocation anywhere
    assert!(analysis.total_allocation_effect.abs() < 1e-9);
    let security_total: f64 = analysis.by_security.values().map(|r| r.total_effect).sum();
    assert!((security_total - analysis.total_excess_return).abs() < 1e-9);
}
