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

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constructed_factors::ConstructedFactorConfig;
use crate::factor_data::FactorDataConfig;
use crate::regression::RegressionConfig;
use crate::risk::RiskConfig;

/// Prefix of environment overrides, e.g. `FACTOR_RISK_REGRESSION__MAX_WORKERS=4`
pub const ENV_PREFIX: &str = "FACTOR_RISK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Analysis window and default benchmark
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Calendar days of history fed to the regressions
    pub lookback_days: i64,
    pub default_benchmark: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            lookback_days: 252,
            default_benchmark: "SPY".to_string(),
        }
    }
}

/// Where persistent caches live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
        }
    }
}

impl StorageConfig {
    pub fn factor_history_path(&self) -> PathBuf {
        self.cache_dir.join("factor_returns.json")
    }

    pub fn regression_dir(&self) -> PathBuf {
        self.cache_dir.join("regressions")
    }

    pub fn sector_overrides_path(&self) -> PathBuf {
        self.cache_dir.join("sector_overrides.json")
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub factor_data: FactorDataConfig,
    pub constructed_factors: ConstructedFactorConfig,
    pub regression: RegressionConfig,
    pub risk: RiskConfig,
    pub analysis: AnalysisSettings,
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Defaults, then the optional file, then `FACTOR_RISK_*` environment variables
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.regression.min_observations <= crate::factor_data::Factor::ALL.len() + 1 {
            return Err(ConfigError::Invalid(format!(
                "regression.min_observations must exceed the {} regression parameters",
                crate::factor_data::Factor::ALL.len() + 1
            )));
        }
        if self.regression.max_workers == 0 {
            return Err(ConfigError::Invalid("regression.max_workers must be positive".to_string()));
        }
        if self.risk.factor_pct_floor > self.risk.factor_pct_ceiling {
            return Err(ConfigError::Invalid(format!(
                "risk.factor_pct_floor ({}) exceeds risk.factor_pct_ceiling ({})",
                self.risk.factor_pct_floor, self.risk.factor_pct_ceiling
            )));
        }
        if self.factor_data.stale_after_days <= 0 || self.regression.cache_ttl_days <= 0 {
            return Err(ConfigError::Invalid("cache lifetimes must be positive".to_string()));
        }
        Ok(())
    }
}
