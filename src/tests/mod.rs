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

mod attribution_scenario_tests;
mod pipeline_tests;

use std::collections::HashMap;

use crate::classification::BenchmarkHolding;
use crate::factor_data::{FactorObservation, FactorReturnSeries};

pub(crate) use crate::factor_data::tests::CountingSource;
pub(crate) use crate::regression::tests::{synthetic_factors, synthetic_returns};

/// The same history quoted in percent, as the factor library publishes it
pub(crate) fn in_percent(series: &FactorReturnSeries) -> FactorReturnSeries {
    FactorReturnSeries::new(
        series
            .iter()
            .map(|(date, obs)| {
                (
                    *date,
                    FactorObservation {
                        mkt_rf: obs.mkt_rf * 100.0,
                        smb: obs.smb * 100.0,
                        hml: obs.hml * 100.0,
                        rmw: obs.rmw * 100.0,
                        cma: obs.cma * 100.0,
                        umd: obs.umd * 100.0,
                        rf: obs.rf * 100.0,
                    },
                )
            })
            .collect(),
    )
}

pub(crate) fn holding(weight: f64, sector: &str, location: &str) -> BenchmarkHolding {
    BenchmarkHolding {
        weight,
        sector: Some(sector.to_string()),
        currency: Some("USD".to_string()),
        location: Some(location.to_string()),
        name: None,
    }
}

pub(crate) fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(t, w)| (t.to_string(), *w)).collect()
}
