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

pub mod french_source;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::series::TimeSeries;

pub use french_source::FrenchLibrarySource;
pub use store::{FactorHistoryStore, InMemoryFactorHistoryStore, JsonFileFactorHistoryStore};

/// Systematic factors of the six-factor model.
///
/// The declaration order is the column order of every regression design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Factor {
    /// Market excess return
    #[serde(rename = "Mkt-RF")]
    Market,
    /// Small minus big
    #[serde(rename = "SMB")]
    Size,
    /// High minus low book-to-market
    #[serde(rename = "HML")]
    Value,
    /// Robust minus weak operating profitability
    #[serde(rename = "RMW")]
    Profitability,
    /// Conservative minus aggressive investment
    #[serde(rename = "CMA")]
    Investment,
    /// Up minus down (momentum)
    #[serde(rename = "UMD")]
    Momentum,
}

/// Grouping used by the factor-level CTEV tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactorGroup {
    Market,
    Style,
}

impl Factor {
    /// All factors in regression column order
    pub const ALL: [Factor; 6] = [
        Factor::Market,
        Factor::Size,
        Factor::Value,
        Factor::Profitability,
        Factor::Investment,
        Factor::Momentum,
    ];

    /// Column code used by the data library
    pub fn code(&self) -> &'static str {
        match self {
            Factor::Market => "Mkt-RF",
            Factor::Size => "SMB",
            Factor::Value => "HML",
            Factor::Profitability => "RMW",
            Factor::Investment => "CMA",
            Factor::Momentum => "UMD",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Factor::Market => "Market",
            Factor::Size => "Size",
            Factor::Value => "Value",
            Factor::Profitability => "Profitability",
            Factor::Investment => "Investment",
            Factor::Momentum => "Momentum",
        }
    }

    pub fn group(&self) -> FactorGroup {
        match self {
            Factor::Market => FactorGroup::Market,
            _ => FactorGroup::Style,
        }
    }

    pub fn from_code(code: &str) -> Option<Factor> {
        Factor::ALL.iter().copied().find(|f| f.code() == code)
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One day of factor returns plus the risk-free rate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorObservation {
    pub mkt_rf: f64,
    pub smb: f64,
    pub hml: f64,
    pub rmw: f64,
    pub cma: f64,
    pub umd: f64,
    pub rf: f64,
}

impl FactorObservation {
    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Market => self.mkt_rf,
            Factor::Size => self.smb,
            Factor::Value => self.hml,
            Factor::Profitability => self.rmw,
            Factor::Investment => self.cma,
            Factor::Momentum => self.umd,
        }
    }

    fn scaled(&self, k: f64) -> Self {
        Self {
            mkt_rf: self.mkt_rf * k,
            smb: self.smb * k,
            hml: self.hml * k,
            rmw: self.rmw * k,
            cma: self.cma * k,
            umd: self.umd * k,
            rf: self.rf * k,
        }
    }

    fn is_finite(&self) -> bool {
        Factor::ALL.iter().all(|f| self.get(*f).is_finite()) && self.rf.is_finite()
    }
}

/// Date-indexed factor returns, immutable once fetched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorReturnSeries {
    rows: BTreeMap<NaiveDate, FactorObservation>,
}

impl FactorReturnSeries {
    pub fn new(rows: BTreeMap<NaiveDate, FactorObservation>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, date: &NaiveDate) -> Option<&FactorObservation> {
        self.rows.get(date)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &FactorObservation)> {
        self.rows.iter()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next_back().copied()
    }

    /// Inclusive date range; `None` bounds are open
    pub fn range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .filter(|(d, _)| start.map_or(true, |s| **d >= s) && end.map_or(true, |e| **d <= e))
                .map(|(d, o)| (*d, *o))
                .collect(),
        }
    }

    pub fn factor(&self, factor: Factor) -> TimeSeries {
        self.rows.iter().map(|(d, o)| (*d, o.get(factor))).collect()
    }

    pub fn risk_free(&self) -> TimeSeries {
        self.rows.iter().map(|(d, o)| (*d, o.rf)).collect()
    }

    /// Library files quote percentages; this yields decimal returns and drops incomplete rows
    pub fn percent_to_decimal(&self) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .filter(|(_, o)| o.is_finite())
                .map(|(d, o)| (*d, o.scaled(0.01)))
                .collect(),
        }
    }
}

/// Errors that can occur while obtaining factor data
#[derive(Debug, Error)]
pub enum FactorDataError {
    #[error("Factor data unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for factor data operations
pub type FactorDataResult<T> = Result<T, FactorDataError>;

const FRENCH_LIBRARY_FTP: &str = "https://mba.tuck.dartmouth.edu/pages/faculty/ken.french/ftp";

/// Configuration for the factor data provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorDataConfig {
    /// Cached history older than this is refreshed
    pub stale_after_days: i64,
    /// Daily five-factor file, a zipped or plain CSV
    pub five_factor_url: String,
    /// Daily momentum file, a zipped or plain CSV
    pub momentum_url: String,
    /// HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for FactorDataConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 30,
            five_factor_url: format!(
                "{}/F-F_Research_Data_5_Factors_2x3_daily_CSV.zip",
                FRENCH_LIBRARY_FTP
            ),
            momentum_url: format!("{}/F-F_Momentum_Factor_daily_CSV.zip", FRENCH_LIBRARY_FTP),
            request_timeout_secs: 30,
        }
    }
}

/// External source of the full factor history, quoted in percent
#[async_trait]
pub trait FactorSource: Send + Sync {
    /// Fetch the complete daily history
    async fn fetch_history(&self) -> FactorDataResult<FactorReturnSeries>;
}

/// Persisted factor history with its refresh timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFactorHistory {
    pub series: FactorReturnSeries,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedHistory {
    series: Arc<FactorReturnSeries>,
    refreshed_at: DateTime<Utc>,
}

/// Serves factor returns from a refreshable cache.
///
/// Readers share the in-process cache; the write lock is only taken when the
/// cache is missing or stale. A failed refresh falls back to the stale history.
pub struct FactorDataProvider {
    config: FactorDataConfig,
    source: Arc<dyn FactorSource>,
    store: Arc<dyn FactorHistoryStore>,
    cache: RwLock<Option<CachedHistory>>,
}

impl FactorDataProvider {
    pub fn new(
        config: FactorDataConfig,
        source: Arc<dyn FactorSource>,
        store: Arc<dyn FactorHistoryStore>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            cache: RwLock::new(None),
        }
    }

    fn is_fresh(&self, refreshed_at: DateTime<Utc>) -> bool {
        Utc::now() - refreshed_at < Duration::days(self.config.stale_after_days)
    }

    /// Factor returns (decimal) over an inclusive date range
    pub async fn get_factor_returns(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> FactorDataResult<FactorReturnSeries> {
        let history = self.current_history(false).await?;
        Ok(history.range(start, end))
    }

    /// Daily risk-free rate (decimal) over an inclusive date range
    pub async fn get_risk_free_rate(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> FactorDataResult<TimeSeries> {
        let history = self.current_history(false).await?;
        Ok(history.risk_free().range(start, end))
    }

    /// Refresh the history; `force` bypasses the staleness check
    pub async fn refresh(&self, force: bool) -> FactorDataResult<usize> {
        let history = self.current_history(force).await?;
        Ok(history.len())
    }

    /// Whether a cached history younger than the staleness window exists
    pub async fn is_data_current(&self) -> bool {
        match self.last_refreshed().await {
            Some(at) => self.is_fresh(at),
            None => false,
        }
    }

    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Some(cached.refreshed_at);
        }
        match self.store.load().await {
            Ok(stored) => stored.map(|s| s.refreshed_at),
            Err(e) => {
                warn!("Failed to read factor history store: {}", e);
                None
            }
        }
    }

    /// Drop the in-process and persisted history
    pub async fn clear_cache(&self) -> FactorDataResult<()> {
        let mut cache = self.cache.write().await;
        *cache = None;
        self.store.clear().await?;
        info!("Factor data cache cleared");
        Ok(())
    }

    async fn current_history(&self, force: bool) -> FactorDataResult<Arc<FactorReturnSeries>> {
        if !force {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if self.is_fresh(cached.refreshed_at) {
                    return Ok(cached.series.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;

        if cache.is_none() {
            match self.store.load().await {
                Ok(Some(stored)) => {
                    debug!(
                        "Loaded {} factor rows from store (refreshed {})",
                        stored.series.len(),
                        stored.refreshed_at
                    );
                    *cache = Some(CachedHistory {
                        series: Arc::new(stored.series),
                        refreshed_at: stored.refreshed_at,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load factor history store: {}", e),
            }
        }

        // Another task may have refreshed while we waited for the write lock
        if !force {
            if let Some(cached) = cache.as_ref() {
                if self.is_fresh(cached.refreshed_at) {
                    return Ok(cached.series.clone());
                }
            }
        }

        info!("Refreshing factor return history");
        match self.source.fetch_history().await {
            Ok(raw) => {
                let series = raw.percent_to_decimal();
                if series.is_empty() {
                    return self.fall_back(&cache, "source returned no rows".to_string());
                }
                let stored = StoredFactorHistory {
                    series,
                    refreshed_at: Utc::now(),
                };
                if let Err(e) = self.store.save(&stored).await {
                    warn!("Failed to persist factor history: {}", e);
                }
                info!(
                    "Factor history refreshed: {} rows ({:?} to {:?})",
                    stored.series.len(),
                    stored.series.first_date(),
                    stored.series.last_date()
                );
                let series = Arc::new(stored.series);
                *cache = Some(CachedHistory {
                    series: series.clone(),
                    refreshed_at: stored.refreshed_at,
                });
                Ok(series)
            }
            Err(e) => self.fall_back(&cache, e.to_string()),
        }
    }

    fn fall_back(
        &self,
        cache: &Option<CachedHistory>,
        reason: String,
    ) -> FactorDataResult<Arc<FactorReturnSeries>> {
        match cache.as_ref() {
            Some(cached) => {
                warn!(
                    "Factor refresh failed ({}); serving history from {}",
                    reason, cached.refreshed_at
                );
                Ok(cached.series.clone())
            }
            None => Err(FactorDataError::Unavailable(reason)),
        }
    }
}
