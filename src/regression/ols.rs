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

//! Ordinary least squares through the normal equations with a conditioning guard.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

/// Floor applied to coefficient variances
const MIN_COEFFICIENT_VARIANCE: f64 = 1e-10;

#[derive(Debug, Error, PartialEq)]
pub enum OlsError {
    #[error("{observations} observations cannot identify {parameters} parameters")]
    Underdetermined { observations: usize, parameters: usize },

    #[error("design matrix and response lengths differ ({rows} vs {len})")]
    ShapeMismatch { rows: usize, len: usize },

    #[error("normal equations could not be solved: {0}")]
    Singular(String),

    #[error("solution contains non-finite values")]
    NonFinite,
}

/// Fitted OLS model; coefficient vectors follow the design-matrix columns
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub t_stats: Vec<f64>,
    pub p_values: Vec<f64>,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    pub condition_number: f64,
    pub used_pseudo_inverse: bool,
}

/// 2-norm condition number of a square matrix
pub fn condition_number(m: &DMatrix<f64>) -> f64 {
    let singular = m.clone().singular_values();
    let max = singular.iter().cloned().fold(0.0_f64, f64::max);
    let min = singular.iter().cloned().fold(f64::INFINITY, f64::min);
    if min <= 0.0 || !min.is_finite() {
        f64::INFINITY
    } else {
        max / min
    }
}

/// Singular values below `max / condition_threshold` are treated as zero
fn pseudo_inverse(m: &DMatrix<f64>, condition_threshold: f64) -> Result<DMatrix<f64>, OlsError> {
    let max_sv = m.clone().singular_values().iter().cloned().fold(0.0_f64, f64::max);
    m.clone()
        .pseudo_inverse((max_sv / condition_threshold).max(f64::MIN_POSITIVE))
        .map_err(|e| OlsError::Singular(e.to_string()))
}

/// Two-tailed p-value of a t statistic
fn two_tailed_p(t: f64, dist: &StudentsT) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    2.0 * (1.0 - dist.cdf(t.abs()))
}

/// Fit `y = X b + e`. `x` must already contain the intercept column.
///
/// `(X'X)^-1` comes from a direct inverse unless the condition number of `X'X`
/// exceeds `condition_threshold`, in which case the pseudo-inverse is used.
pub fn fit(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    condition_threshold: f64,
) -> Result<OlsFit, OlsError> {
    let n = x.nrows();
    let k = x.ncols();
    if n != y.len() {
        return Err(OlsError::ShapeMismatch { rows: n, len: y.len() });
    }
    if n <= k {
        return Err(OlsError::Underdetermined { observations: n, parameters: k });
    }

    let xt = x.transpose();
    let xtx = &xt * x;
    let cond = condition_number(&xtx);

    let (xtx_inv, used_pseudo_inverse) = if cond > condition_threshold {
        (pseudo_inverse(&xtx, condition_threshold)?, true)
    } else {
        match xtx.clone().try_inverse() {
            Some(inv) => (inv, false),
            None => (pseudo_inverse(&xtx, condition_threshold)?, true),
        }
    };

    let beta = &xtx_inv * (&xt * y);
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(OlsError::NonFinite);
    }

    let fitted = x * &beta;
    let residuals = y - &fitted;

    let ss_res: f64 = residuals.iter().map(|e| e * e).sum();
    let y_mean = y.mean();
    let ss_tot: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r_squared = (if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 }).clamp(0.0, 1.0);

    let adj_r_squared = if n > k + 1 {
        (1.0 - (1.0 - r_squared) * (n - 1) as f64 / (n - k - 1) as f64).clamp(0.0, 1.0)
    } else {
        r_squared
    };

    let df = n - k;
    let mse = ss_res / df as f64;
    let std_errors: Vec<f64> = xtx_inv
        .diagonal()
        .iter()
        .map(|d| (d * mse).max(MIN_COEFFICIENT_VARIANCE).sqrt())
        .collect();
    let t_stats: Vec<f64> = beta.iter().zip(&std_errors).map(|(b, se)| b / se).collect();

    let dist = StudentsT::new(0.0, 1.0, df.max(1) as f64)
        .map_err(|e| OlsError::Singular(e.to_string()))?;
    let p_values = t_stats.iter().map(|t| two_tailed_p(*t, &dist)).collect();

    Ok(OlsFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        t_stats,
        p_values,
        r_squared,
        adj_r_squared,
        fitted: fitted.iter().copied().collect(),
        residuals: residuals.iter().copied().collect(),
        condition_number: cond,
        used_pseudo_inverse,
    })
}
