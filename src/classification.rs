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

//! Security classification: metadata records, benchmark holdings and manual
//! sector overrides.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const NOT_CLASSIFIED: &str = "Not Classified";
pub const DEFAULT_COUNTRY: &str = "US";
pub const DEFAULT_CURRENCY: &str = "USD";

/// Sector names offered for manual classification
pub const SECTORS: [&str; 12] = [
    "Communication Services",
    "Consumer Cyclical",
    "Consumer Defensive",
    "Energy",
    "Financial Services",
    "Healthcare",
    "Industrials",
    "Technology",
    "Basic Materials",
    "Real Estate",
    "Utilities",
    NOT_CLASSIFIED,
];

/// Descriptive data for one ticker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerMetadata {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub currency: Option<String>,
    pub market_cap: Option<f64>,
}

/// A benchmark constituent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkHolding {
    /// Weight in the benchmark (decimal)
    pub weight: f64,
    pub sector: Option<String>,
    pub currency: Option<String>,
    pub location: Option<String>,
    pub name: Option<String>,
}

/// Resolved grouping keys for one ticker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub sector: String,
    pub industry: String,
    pub country: String,
    pub currency: String,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            sector: NOT_CLASSIFIED.to_string(),
            industry: NOT_CLASSIFIED.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

/// Manual sector (and optionally industry) assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorOverride {
    pub sector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid override: {0}")]
    InvalidOverride(String),
}

pub type ClassificationResult<T> = Result<T, ClassificationError>;

/// Persistence for the override map
#[async_trait]
pub trait SectorOverrideStore: Send + Sync {
    async fn load_all(&self) -> ClassificationResult<BTreeMap<String, SectorOverride>>;

    async fn save_all(
        &self,
        overrides: &BTreeMap<String, SectorOverride>,
    ) -> ClassificationResult<()>;
}

#[derive(Default)]
pub struct InMemorySectorOverrideStore {
    overrides: RwLock<BTreeMap<String, SectorOverride>>,
}

impl InMemorySectorOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SectorOverrideStore for InMemorySectorOverrideStore {
    async fn load_all(&self) -> ClassificationResult<BTreeMap<String, SectorOverride>> {
        Ok(self.overrides.read().clone())
    }

    async fn save_all(
        &self,
        overrides: &BTreeMap<String, SectorOverride>,
    ) -> ClassificationResult<()> {
        *self.overrides.write() = overrides.clone();
        Ok(())
    }
}

/// Override map kept as one JSON object keyed by ticker
pub struct JsonFileSectorOverrideStore {
    path: PathBuf,
}

impl JsonFileSectorOverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SectorOverrideStore for JsonFileSectorOverrideStore {
    async fn load_all(&self) -> ClassificationResult<BTreeMap<String, SectorOverride>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_all(
        &self,
        overrides: &BTreeMap<String, SectorOverride>,
    ) -> ClassificationResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(overrides)?).await?;
        Ok(())
    }
}

/// Manual sector overrides layered over provider metadata.
///
/// The map is read once at construction; mutations are written through.
pub struct SectorOverrideService {
    store: Arc<dyn SectorOverrideStore>,
    overrides: RwLock<BTreeMap<String, SectorOverride>>,
}

impl SectorOverrideService {
    pub async fn load(store: Arc<dyn SectorOverrideStore>) -> ClassificationResult<Self> {
        let overrides = store.load_all().await?;
        info!("Loaded {} sector overrides", overrides.len());
        Ok(Self {
            store,
            overrides: RwLock::new(overrides),
        })
    }

    /// Service without persisted overrides
    pub fn empty() -> Self {
        Self {
            store: Arc::new(InMemorySectorOverrideStore::new()),
            overrides: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get_override(&self, ticker: &str) -> Option<SectorOverride> {
        self.overrides.read().get(&ticker.to_uppercase()).cloned()
    }

    pub fn has_override(&self, ticker: &str) -> bool {
        self.overrides.read().contains_key(&ticker.to_uppercase())
    }

    pub fn list_overrides(&self) -> BTreeMap<String, SectorOverride> {
        self.overrides.read().clone()
    }

    pub fn overridden_tickers(&self) -> Vec<String> {
        self.overrides.read().keys().cloned().collect()
    }

    pub async fn set_override(
        &self,
        ticker: &str,
        sector: &str,
        industry: Option<&str>,
    ) -> ClassificationResult<()> {
        let sector = sector.trim();
        if sector.is_empty() {
            return Err(ClassificationError::InvalidOverride(format!(
                "empty sector for {}",
                ticker
            )));
        }
        let entry = SectorOverride {
            sector: sector.to_string(),
            industry: industry.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
        };
        let snapshot = {
            let mut overrides = self.overrides.write();
            overrides.insert(ticker.to_uppercase(), entry);
            overrides.clone()
        };
        self.store.save_all(&snapshot).await
    }

    /// Returns whether an override existed
    pub async fn remove_override(&self, ticker: &str) -> ClassificationResult<bool> {
        let (removed, snapshot) = {
            let mut overrides = self.overrides.write();
            let removed = overrides.remove(&ticker.to_uppercase()).is_some();
            (removed, overrides.clone())
        };
        if removed {
            self.store.save_all(&snapshot).await?;
        }
        Ok(removed)
    }

    pub async fn clear_all_overrides(&self) -> ClassificationResult<()> {
        self.overrides.write().clear();
        self.store.save_all(&BTreeMap::new()).await
    }

    /// Override, then metadata, then "Not Classified"
    pub fn effective_sector(&self, ticker: &str, metadata: Option<&TickerMetadata>) -> String {
        if let Some(o) = self.get_override(ticker) {
            return o.sector;
        }
        metadata
            .and_then(|m| non_empty(&m.sector))
            .unwrap_or_else(|| NOT_CLASSIFIED.to_string())
    }

    /// Override industry, then metadata, then "Not Classified"
    pub fn effective_industry(&self, ticker: &str, metadata: Option<&TickerMetadata>) -> String {
        if let Some(industry) = self.get_override(ticker).and_then(|o| o.industry) {
            return industry;
        }
        metadata
            .and_then(|m| non_empty(&m.industry))
            .unwrap_or_else(|| NOT_CLASSIFIED.to_string())
    }

    /// Resolve every grouping key for a ticker.
    ///
    /// Sector: override, metadata, benchmark holding. Country and currency:
    /// metadata, benchmark holding, then the US/USD defaults.
    pub fn classify(
        &self,
        ticker: &str,
        metadata: Option<&TickerMetadata>,
        holding: Option<&BenchmarkHolding>,
    ) -> Classification {
        let mut sector = self.effective_sector(ticker, metadata);
        if sector == NOT_CLASSIFIED {
            if let Some(s) = holding.and_then(|h| non_empty(&h.sector)) {
                sector = s;
            }
        }
        let country = metadata
            .and_then(|m| non_empty(&m.country))
            .or_else(|| holding.and_then(|h| non_empty(&h.location)))
            .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
        let currency = metadata
            .and_then(|m| non_empty(&m.currency))
            .or_else(|| holding.and_then(|h| non_empty(&h.currency)))
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        Classification {
            sector,
            industry: self.effective_industry(ticker, metadata),
            country,
            currency,
        }
    }

    /// Classify a set of tickers in one pass
    pub fn classify_all<'a, I>(
        &self,
        tickers: I,
        metadata: &HashMap<String, TickerMetadata>,
        holdings: &HashMap<String, BenchmarkHolding>,
    ) -> HashMap<String, Classification>
    where
        I: IntoIterator<Item = &'a String>,
    {
        tickers
            .into_iter()
            .map(|t| {
                let key = t.to_uppercase();
                let c = self.classify(&key, metadata.get(&key), holdings.get(&key));
                (key, c)
            })
            .collect()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Whether a country label denotes the United States
pub fn is_domestic(country: &str) -> bool {
    matches!(
        country.trim().to_uppercase().as_str(),
        "US" | "USA" | "UNITED STATES" | "UNITED STATES OF AMERICA"
    )
}

pub(crate) fn warn_unclassified(count: usize) {
    if count > 0 {
        warn!("{} securities have no sector classification", count);
    }
}
