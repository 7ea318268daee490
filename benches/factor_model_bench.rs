use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use factor_risk_core::analytics::weighted_returns;
use factor_risk_core::{
    fit_security, Classification, FactorObservation, FactorReturnSeries, RegressionConfig,
    RegressionResult, RiskDecompositionEngine, TimeSeries,
};

// Cheap deterministic noise in [-0.5, 0.5)
fn noise(seed: u64, i: usize) -> f64 {
    let mut x = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add((i as u64).wrapping_mul(1442695040888963407));
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    (x % 1_000_000) as f64 / 1_000_000.0 - 0.5
}

fn factors(n: usize) -> FactorReturnSeries {
    let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
    let rows: BTreeMap<NaiveDate, FactorObservation> = (0..n)
        .map(|i| {
            (
                start + Duration::days(i as i64),
                FactorObservation {
                    mkt_rf: 0.02 * noise(1, i),
                    smb: 0.01 * noise(2, i),
                    hml: 0.01 * noise(3, i),
                    rmw: 0.01 * noise(4, i),
                    cma: 0.01 * noise(5, i),
                    umd: 0.01 * noise(6, i),
                    rf: 0.0001,
                },
            )
        })
        .collect();
    FactorReturnSeries::new(rows)
}

fn returns(factors: &FactorReturnSeries, beta: f64, seed: u64) -> TimeSeries {
    factors
        .iter()
        .enumerate()
        .map(|(i, (date, obs))| {
            (*date, beta * obs.mkt_rf + 0.4 * obs.smb + 0.01 * noise(seed, i))
        })
        .collect()
}

fn bench_regression(c: &mut Criterion) {
    let mut group = c.benchmark_group("SecurityRegression");
    let config = RegressionConfig::default();

    for n in [126usize, 252, 756, 1260] {
        let f = factors(n);
        let y = returns(&f, 1.1, 42);
        group.bench_with_input(BenchmarkId::new("fit_security", n), &n, |b, _| {
            b.iter(|| {
                let _ = black_box(fit_security("BENCH", &y, &f, "Technology", "US", &config));
            });
        });
    }

    group.finish();
}

fn bench_ctev_hierarchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("CtevHierarchy");
    let engine = RiskDecompositionEngine::default();
    let f = factors(252);
    let sectors = ["Technology", "Healthcare", "Energy", "Financial Services", "Industrials"];
    let countries = [("US", "USD"), ("GB", "GBP"), ("DE", "EUR"), ("JP", "JPY")];

    let config = RegressionConfig::default();

    for holdings in [20usize, 100, 500] {
        let mut results: HashMap<String, RegressionResult> = HashMap::new();
        let mut classifications = HashMap::new();
        let mut portfolio = HashMap::new();
        let mut benchmark = HashMap::new();
        let mut security_returns = HashMap::new();

        for i in 0..holdings {
            let ticker = format!("T{:04}", i);
            let y = returns(&f, 0.6 + (i % 7) as f64 * 0.1, i as u64 + 10);
            let (country, currency) = countries[i % 4];
            if let Ok(result) = fit_security(&ticker, &y, &f, sectors[i % 5], country, &config) {
                results.insert(ticker.clone(), result);
            }
            classifications.insert(
                ticker.clone(),
                Classification {
                    sector: sectors[i % 5].to_string(),
                    industry: format!("Industry {}", i % 11),
                    country: country.to_string(),
                    currency: currency.to_string(),
                },
            );
            portfolio.insert(ticker.clone(), (1.0 + (i % 3) as f64) / (2.0 * holdings as f64));
            benchmark.insert(ticker.clone(), 1.0 / holdings as f64);
            security_returns.insert(ticker, y);
        }

        let portfolio_returns = weighted_returns(&security_returns, &portfolio);
        let benchmark_returns = weighted_returns(&security_returns, &benchmark);

        group.bench_with_input(BenchmarkId::new("metrics_and_trees", holdings), &holdings, |b, _| {
            b.iter(|| {
                let metrics =
                    engine.all_security_risks(&results, &portfolio, &benchmark, &classifications);
                let summary = engine.summary(
                    &results,
                    &portfolio,
                    &benchmark,
                    &portfolio_returns,
                    &benchmark_returns,
                );
                black_box(engine.ctev_trees(&metrics, &results, &summary));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_regression, bench_ctev_hierarchy);
criterion_main!(benches);
