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

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::RegressionResult;

const FILE_SUFFIX: &str = "_regression.json";

/// Errors that can occur in a regression store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Per-ticker persistence of regression results (without raw series)
#[async_trait]
pub trait RegressionStore: Send + Sync {
    async fn load(&self, ticker: &str) -> StoreResult<Option<RegressionResult>>;

    /// Insert or overwrite the result for its ticker
    async fn save(&self, result: &RegressionResult) -> StoreResult<()>;

    async fn remove(&self, ticker: &str) -> StoreResult<()>;

    async fn clear(&self) -> StoreResult<()>;
}

/// In-process store; entries are sharded per ticker
#[derive(Default)]
pub struct InMemoryRegressionStore {
    results: DashMap<String, RegressionResult>,
}

impl InMemoryRegressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[async_trait]
impl RegressionStore for InMemoryRegressionStore {
    async fn load(&self, ticker: &str) -> StoreResult<Option<RegressionResult>> {
        Ok(self.results.get(ticker).map(|r| r.value().clone()))
    }

    async fn save(&self, result: &RegressionResult) -> StoreResult<()> {
        let mut stored = result.clone();
        stored.residuals = None;
        stored.fitted = None;
        self.results.insert(stored.ticker.clone(), stored);
        Ok(())
    }

    async fn remove(&self, ticker: &str) -> StoreResult<()> {
        self.results.remove(ticker);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.results.clear();
        Ok(())
    }
}

/// One JSON file per ticker under a directory
pub struct JsonDirRegressionStore {
    dir: PathBuf,
}

impl JsonDirRegressionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}{}", file_stem(ticker), FILE_SUFFIX))
    }
}

/// Escape anything outside `[A-Za-z0-9._^=-]` as `%XX` so a ticker such as
/// `BRK/B` stays one file inside the store directory
fn file_stem(ticker: &str) -> String {
    let mut stem = String::with_capacity(ticker.len());
    for c in ticker.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '^' | '=' | '-') {
            stem.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                stem.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    // "." and ".." would name directories
    if stem.chars().all(|c| c == '.') {
        return stem.replace('.', "%2E");
    }
    stem
}

#[async_trait]
impl RegressionStore for JsonDirRegressionStore {
    async fn load(&self, ticker: &str) -> StoreResult<Option<RegressionResult>> {
        let bytes = match tokio::fs::read(self.path_for(ticker)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, result: &RegressionResult) -> StoreResult<()> {
        // JSON has no NaN; such a file could never be read back
        if !result.is_finite() {
            warn!("Not caching regression for {}: non-finite statistics", result.ticker);
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(self.path_for(&result.ticker), json).await?;
        debug!("Cached regression for {}", result.ticker);
        Ok(())
    }

    async fn remove(&self, ticker: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(ticker)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let is_cache_file = entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.ends_with(FILE_SUFFIX));
            if is_cache_file {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        info!("Cleared {} cached regressions from {}", removed, self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::tests::{synthetic_factors, synthetic_returns};
    use std::sync::Arc;

    use crate::regression::{fit_security, RegressionConfig, SecurityRegressionEngine};

    #[tokio::test]
    async fn test_json_store_excludes_series() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirRegressionStore::new(dir.path());
        let factors = synthetic_factors(150);
        let returns = synthetic_returns(&factors, 150, 1.0, 3);
        let config = RegressionConfig::default();
        let result = fit_security("NVDA", &returns, &factors, "Technology", "US", &config).unwrap();

        store.save(&result).await.unwrap();
        assert!(dir.path().join("NVDA_regression.json").exists());

        let loaded = store.load("NVDA").await.unwrap().unwrap();
        assert_eq!(loaded.betas, result.betas);
        assert_eq!(loaded.fitted_at, result.fitted_at);
        assert!(loaded.residuals.is_none());
        assert!(loaded.fitted.is_none());

        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        store.clear().await.unwrap();
        assert!(store.load("NVDA").await.unwrap().is_none());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_in_memory_store_overwrites() {
        let store = InMemoryRegressionStore::new();
        let factors = synthetic_factors(150);
        let mut result = fit_security(
            "AMD",
            &synthetic_returns(&factors, 150, 1.0, 5),
            &factors,
            "Technology",
            "US",
            &RegressionConfig::default(),
        )
        .unwrap();
        store.save(&result).await.unwrap();
        result.alpha = 0.5;
        store.save(&result).await.unwrap();

        assert_eq!(store.len(), 1);
        let loaded = store.load("AMD").await.unwrap().unwrap();
        assert_eq!(loaded.alpha, 0.5);
        assert!(!loaded.has_series());

        store.remove("AMD").await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_stem_escapes_separators() {
        assert_eq!(file_stem("BRK/B"), "BRK%2FB");
        assert_eq!(file_stem("BF.B"), "BF.B");
        assert_eq!(file_stem("^GSPC"), "^GSPC");
        assert_eq!(file_stem("..\\x"), "..%5Cx");
        assert_eq!(file_stem(".."), "%2E%2E");
        assert_ne!(file_stem("A%2FB"), file_stem("A/B"));
    }

    #[tokio::test]
    async fn test_json_store_keeps_slashed_tickers_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirRegressionStore::new(dir.path());
        let factors = synthetic_factors(150);
        let returns = synthetic_returns(&factors, 150, 0.9, 8);
        let config = RegressionConfig::default();
        let result =
            fit_security("BRK/B", &returns, &factors, "Financial Services", "US", &config).unwrap();

        store.save(&result).await.unwrap();
        assert!(dir.path().join("BRK%2FB_regression.json").exists());
        assert!(!dir.path().join("BRK").exists());
        let loaded = store.load("BRK/B").await.unwrap().unwrap();
        assert_eq!(loaded.ticker, "BRK/B");

        store.remove("BRK/B").await.unwrap();
        assert!(store.load("BRK/B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_finite_results_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonDirRegressionStore::new(dir.path()));
        let factors = synthetic_factors(150);
        let mut result = fit_security(
            "NAN",
            &synthetic_returns(&factors, 150, 1.0, 9),
            &factors,
            "Energy",
            "US",
            &RegressionConfig::default(),
        )
        .unwrap();
        result.alpha_t_stat = f64::NAN;
        assert!(!result.is_finite());

        store.save(&result).await.unwrap();
        assert!(store.load("NAN").await.unwrap().is_none());

        // A corrupt file reads as an error; the engine treats it as a miss
        std::fs::write(dir.path().join("NAN_regression.json"), "{\"ticker\": null}").unwrap();
        assert!(store.load("NAN").await.is_err());
        let engine = SecurityRegressionEngine::new(RegressionConfig::default(), store);
        assert!(engine.cached("NAN").await.is_none());
    }
}
