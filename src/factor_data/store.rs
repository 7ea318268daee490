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

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{FactorDataError, FactorDataResult, StoredFactorHistory};

/// Persistence for the single factor-history snapshot
#[async_trait]
pub trait FactorHistoryStore: Send + Sync {
    /// Load the snapshot, if one was saved
    async fn load(&self) -> FactorDataResult<Option<StoredFactorHistory>>;

    /// Replace the snapshot
    async fn save(&self, history: &StoredFactorHistory) -> FactorDataResult<()>;

    /// Remove the snapshot
    async fn clear(&self) -> FactorDataResult<()>;
}

/// Non-persistent store
#[derive(Default)]
pub struct InMemoryFactorHistoryStore {
    history: RwLock<Option<StoredFactorHistory>>,
}

impl InMemoryFactorHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactorHistoryStore for InMemoryFactorHistoryStore {
    async fn load(&self) -> FactorDataResult<Option<StoredFactorHistory>> {
        Ok(self.history.read().clone())
    }

    async fn save(&self, history: &StoredFactorHistory) -> FactorDataResult<()> {
        *self.history.write() = Some(history.clone());
        Ok(())
    }

    async fn clear(&self) -> FactorDataResult<()> {
        *self.history.write() = None;
        Ok(())
    }
}

/// Snapshot kept as one JSON file
pub struct JsonFileFactorHistoryStore {
    path: PathBuf,
}

impl JsonFileFactorHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FactorHistoryStore for JsonFileFactorHistoryStore {
    async fn load(&self) -> FactorDataResult<Option<StoredFactorHistory>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let history = serde_json::from_slice(&bytes)
            .map_err(|e| FactorDataError::Storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(history))
    }

    async fn save(&self, history: &StoredFactorHistory) -> FactorDataResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json =
            serde_json::to_vec(history).map_err(|e| FactorDataError::Storage(e.to_string()))?;
        tokio::fs::write(&self.path, json).await?;
        debug!("Saved {} factor rows to {}", history.series.len(), self.path.display());
        Ok(())
    }

    async fn clear(&self) -> FactorDataResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
