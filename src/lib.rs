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

pub mod series;
pub mod factor_data;
pub mod constructed_factors;
pub mod regression;
pub mod residuals;
pub mod classification;
pub mod collaborators;
pub mod risk;
pub mod attribution;
pub mod analytics;
pub mod config;

#[cfg(test)]
mod tests;

pub use series::{TimeSeries, TRADING_DAYS_PER_YEAR};
pub use factor_data::{
    Factor, FactorDataConfig, FactorDataError, FactorDataProvider, FactorDataResult, FactorGroup,
    FactorHistoryStore, FactorObservation, FactorReturnSeries, FactorSource, FrenchLibrarySource,
    InMemoryFactorHistoryStore, JsonFileFactorHistoryStore, StoredFactorHistory,
};
pub use constructed_factors::{
    cross_sectional_standardize, standardize, ConstructedExposures, ConstructedFactor,
    ConstructedFactorCalculator, ConstructedFactorConfig, PriceBar, PriceHistory,
};
pub use regression::{
    fit_security, InMemoryRegressionStore, JsonDirRegressionStore, RegressionBatch,
    RegressionConfig, RegressionFailure, RegressionOutcome, RegressionResult, RegressionStore,
    RegressionTask, SecurityRegressionEngine, StoreError,
};
pub use residuals::PortfolioResidualAggregator;
pub use classification::{
    BenchmarkHolding, Classification, ClassificationError, InMemorySectorOverrideStore,
    JsonFileSectorOverrideStore, SectorOverride, SectorOverrideService, SectorOverrideStore,
    TickerMetadata, NOT_CLASSIFIED, SECTORS,
};
pub use collaborators::{
    BenchmarkProvider, CollaboratorError, HoldingsProvider, InMemoryBenchmarks, InMemoryHoldings,
    InMemoryMarketData, InMemoryMetadata, MarketDataProvider, MetadataProvider,
};
pub use risk::{
    CtevNode, CtevNodeKind, CtevTrees, FactorContribution, RiskConfig, RiskDecompositionEngine,
    RiskModel, RiskSummary, SecurityRiskMetrics,
};
pub use attribution::{
    AttributionEngine, AttributionError, AttributionInputs, AttributionResult, BrinsonAnalysis,
};
pub use analytics::{
    AnalysisInputs, AnalyticsError, AnalyticsResult, RiskAnalysis, RiskAnalyticsService,
};
pub use config::{AnalysisSettings, ConfigError, EngineConfig, StorageConfig};

use std::sync::Arc;

/// Create a factor data provider with an in-memory history store
pub fn create_factor_data_provider(
    config: FactorDataConfig,
    source: Arc<dyn FactorSource>,
) -> Arc<FactorDataProvider> {
    Arc::new(FactorDataProvider::new(
        config,
        source,
        Arc::new(InMemoryFactorHistoryStore::new()),
    ))
}

/// Create a regression engine with an in-memory result store
pub fn create_regression_engine(config: RegressionConfig) -> Arc<SecurityRegressionEngine> {
    Arc::new(SecurityRegressionEngine::new(config, Arc::new(InMemoryRegressionStore::new())))
}

/// Create an analytics service backed entirely by in-memory stores
pub fn create_in_memory_analytics_service(
    config: &EngineConfig,
    source: Arc<dyn FactorSource>,
) -> RiskAnalyticsService {
    RiskAnalyticsService::new(
        create_factor_data_provider(config.factor_data.clone(), source),
        create_regression_engine(config.regression.clone()),
        RiskDecompositionEngine::new(config.risk.clone()),
        Arc::new(SectorOverrideService::empty()),
    )
}
