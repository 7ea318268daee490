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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{RegressionFailure, RegressionResult, SecurityRegressionEngine};
use crate::factor_data::FactorReturnSeries;
use crate::series::TimeSeries;

/// One security's regression inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTask {
    pub ticker: String,
    pub excess_returns: TimeSeries,
    pub sector: String,
    pub country: String,
}

/// Results of a batch: successes and named failures, keyed by upper-case ticker
#[derive(Debug, Clone, Default)]
pub struct RegressionBatch {
    pub results: HashMap<String, RegressionResult>,
    pub failures: HashMap<String, RegressionFailure>,
}

impl RegressionBatch {
    pub fn succeeded(&self) -> usize {
        self.results.len()
    }

    pub fn attempted(&self) -> usize {
        self.results.len() + self.failures.len()
    }
}

impl SecurityRegressionEngine {
    /// Regress many securities with at most `max_workers` running at once.
    ///
    /// A failed security is recorded in `failures` and never affects its siblings.
    pub async fn regress_many(
        self: &Arc<Self>,
        tasks: Vec<RegressionTask>,
        factors: Arc<FactorReturnSeries>,
        use_cache: bool,
    ) -> RegressionBatch {
        let total = tasks.len();
        info!("Running factor regressions for {} securities", total);

        let permits = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut set = JoinSet::new();
        let mut pending: HashSet<String> = tasks.iter().map(|t| t.ticker.to_uppercase()).collect();

        for task in tasks {
            let engine = Arc::clone(self);
            let factors = Arc::clone(&factors);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = engine
                    .try_regress(
                        &task.ticker,
                        &task.excess_returns,
                        &factors,
                        &task.sector,
                        &task.country,
                        use_cache,
                    )
                    .await;
                (task.ticker.to_uppercase(), outcome)
            });
        }

        let mut batch = RegressionBatch::default();
        let mut completed = 0usize;
        let mut last_join_error = None;
        while let Some(joined) = set.join_next().await {
            completed += 1;
            match joined {
                Ok((ticker, Ok(result))) => {
                    pending.remove(&ticker);
                    batch.results.insert(ticker, result);
                }
                Ok((ticker, Err(failure))) => {
                    debug!("No regression for {}: {}", ticker, failure);
                    pending.remove(&ticker);
                    batch.failures.insert(ticker, failure);
                }
                Err(e) => {
                    warn!("Regression task aborted: {}", e);
                    last_join_error = Some(e.to_string());
                }
            }
            if completed % 500 == 0 {
                debug!(
                    "Regression progress: {}/{} ({} successful)",
                    completed,
                    total,
                    batch.succeeded()
                );
            }
        }

        // Tickers whose task panicked or was cancelled never reported back
        let reason = last_join_error.unwrap_or_else(|| "task did not complete".to_string());
        for ticker in pending {
            batch.failures.insert(ticker, RegressionFailure::TaskFailed(reason.clone()));
        }

        info!("Completed {}/{} successful regressions", batch.succeeded(), total);
        batch
    }
}
