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

//! Seams to the data services this engine consumes but does not own.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use thiserror::Error;

use crate::classification::{BenchmarkHolding, TickerMetadata};
use crate::series::TimeSeries;

#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Daily return history per ticker
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Returns for each requested ticker that has data; others are omitted
    async fn daily_returns(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> CollaboratorResult<HashMap<String, TimeSeries>>;
}

/// Portfolio weights, current and historical
#[async_trait]
pub trait HoldingsProvider: Send + Sync {
    async fn current_weights(&self, portfolio: &str) -> CollaboratorResult<HashMap<String, f64>>;

    async fn daily_weights(
        &self,
        portfolio: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CollaboratorResult<HashMap<String, TimeSeries>>;
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn metadata(
        &self,
        tickers: &[String],
    ) -> CollaboratorResult<HashMap<String, TickerMetadata>>;
}

/// Benchmark constituents keyed by ticker
#[async_trait]
pub trait BenchmarkProvider: Send + Sync {
    async fn constituents(
        &self,
        benchmark: &str,
    ) -> CollaboratorResult<HashMap<String, BenchmarkHolding>>;
}

/// Market data held in memory
#[derive(Default)]
pub struct InMemoryMarketData {
    returns: RwLock<HashMap<String, TimeSeries>>,
}

impl InMemoryMarketData {
    pub fn new(returns: HashMap<String, TimeSeries>) -> Self {
        let returns = returns.into_iter().map(|(t, s)| (t.to_uppercase(), s)).collect();
        Self {
            returns: RwLock::new(returns),
        }
    }

    pub fn insert(&self, ticker: &str, returns: TimeSeries) {
        self.returns.write().insert(ticker.to_uppercase(), returns);
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryMarketData {
    async fn daily_returns(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> CollaboratorResult<HashMap<String, TimeSeries>> {
        let returns = self.returns.read();
        Ok(tickers
            .iter()
            .filter_map(|t| {
                let key = t.to_uppercase();
                let series = returns.get(&key)?.range(Some(start), Some(end));
                (!series.is_empty()).then(|| (key, series))
            })
            .collect())
    }
}

/// Holdings for named portfolios held in memory
#[derive(Default)]
pub struct InMemoryHoldings {
    current: RwLock<HashMap<String, HashMap<String, f64>>>,
    daily: RwLock<HashMap<String, HashMap<String, TimeSeries>>>,
}

impl InMemoryHoldings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_portfolio(
        &self,
        portfolio: &str,
        current: HashMap<String, f64>,
        daily: HashMap<String, TimeSeries>,
    ) {
        self.current.write().insert(portfolio.to_string(), current);
        self.daily.write().insert(portfolio.to_string(), daily);
    }
}

#[async_trait]
impl HoldingsProvider for InMemoryHoldings {
    async fn current_weights(&self, portfolio: &str) -> CollaboratorResult<HashMap<String, f64>> {
        self.current
            .read()
            .get(portfolio)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("portfolio {}", portfolio)))
    }

    async fn daily_weights(
        &self,
        portfolio: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CollaboratorResult<HashMap<String, TimeSeries>> {
        let daily = self.daily.read();
        let history = daily
            .get(portfolio)
            .ok_or_else(|| CollaboratorError::NotFound(format!("portfolio {}", portfolio)))?;
        Ok(history
            .iter()
            .map(|(t, s)| (t.clone(), s.range(Some(start), Some(end))))
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMetadata {
    records: RwLock<HashMap<String, TickerMetadata>>,
}

impl InMemoryMetadata {
    pub fn new(records: HashMap<String, TickerMetadata>) -> Self {
        let records = records.into_iter().map(|(t, m)| (t.to_uppercase(), m)).collect();
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl MetadataProvider for InMemoryMetadata {
    async fn metadata(
        &self,
        tickers: &[String],
    ) -> CollaboratorResult<HashMap<String, TickerMetadata>> {
        let records = self.records.read();
        Ok(tickers
            .iter()
            .filter_map(|t| {
                let key = t.to_uppercase();
                records.get(&key).map(|m| (key, m.clone()))
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryBenchmarks {
    benchmarks: RwLock<HashMap<String, HashMap<String, BenchmarkHolding>>>,
}

impl InMemoryBenchmarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_constituents(&self, benchmark: &str, holdings: HashMap<String, BenchmarkHolding>) {
        self.benchmarks.write().insert(benchmark.to_uppercase(), holdings);
    }
}

#[async_trait]
impl BenchmarkProvider for InMemoryBenchmarks {
    async fn constituents(
        &self,
        benchmark: &str,
    ) -> CollaboratorResult<HashMap<String, BenchmarkHolding>> {
        self.benchmarks
            .read()
            .get(&benchmark.to_uppercase())
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("benchmark {}", benchmark)))
    }
}
