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

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use factor_risk_core::{AnalysisInputs, EngineConfig, RiskAnalyticsService};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Factor risk decomposition and Brinson attribution reports",
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML or JSON); FACTOR_RISK_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose active risk for a portfolio/benchmark input bundle
    Risk {
        /// JSON bundle of weights, benchmark holdings and daily returns
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Brinson-Fachler attribution over a holding period
    Attribution {
        #[arg(short, long)]
        input: PathBuf,

        /// Period start (format: YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Period end (format: YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },

    /// Download the factor library history into the local cache
    RefreshFactors {
        /// Refresh even when the cached history is current
        #[arg(short, long)]
        force: bool,
    },

    /// Drop cached factor history and regression results
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let service = RiskAnalyticsService::from_config(&config)
        .await
        .context("initializing analytics service")?;

    match cli.command {
        Commands::Risk { input } => {
            let inputs = read_inputs(&input)?;
            let analysis = service.analyze(&inputs).await?;
            print_json(&analysis)?;
        }
        Commands::Attribution { input, start, end } => {
            if start > end {
                bail!("start {} is after end {}", start, end);
            }
            let inputs = read_inputs(&input)?;
            let analysis = service.attribution(&inputs, start, end)?;
            print_json(&analysis)?;
        }
        Commands::RefreshFactors { force } => {
            let rows = service.factor_data().refresh(force).await?;
            let refreshed_at = service.factor_data().last_refreshed().await;
            info!("Factor history holds {} days", rows);
            print_json(&serde_json::json!({
                "rows": rows,
                "refreshed_at": refreshed_at,
            }))?;
        }
        Commands::ClearCache => {
            service.factor_data().clear_cache().await?;
            service.regressions().clear_cache(None).await?;
            info!(
                "Cleared factor and regression caches under {}",
                config.storage.cache_dir.display()
            );
        }
    }

    Ok(())
}

fn read_inputs(path: &Path) -> Result<AnalysisInputs> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let inputs: AnalysisInputs = serde_json::from_str(&raw)
        .with_context(|| format!("parsing input bundle {}", path.display()))?;
    info!(
        "Loaded {} portfolio weights, {} benchmark holdings, {} return series",
        inputs.portfolio_weights.len(),
        inputs.benchmark_holdings.len(),
        inputs.security_returns.len()
    );
    Ok(inputs)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
