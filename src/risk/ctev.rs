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

//! Hierarchical allocation of the factor-risk budget.
//!
//! Each node's share of its parent's CTEV is its absolute difference from the
//! benchmark divided by the sum of its siblings' differences. Allocation is
//! top-down, so a parent always equals the sum of its children.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::SecurityRiskMetrics;
use crate::classification::NOT_CLASSIFIED;
use crate::factor_data::{Factor, FactorGroup};
use crate::regression::RegressionResult;

/// What a node in a CTEV tree stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtevNodeKind {
    FactorGroup,
    Factor,
    Sector,
    Industry,
    Country,
    Currency,
    Security,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtevNode {
    pub name: String,
    pub kind: CtevNodeKind,
    /// Portfolio weight, or portfolio beta for factor nodes
    pub portfolio_exposure: f64,
    pub benchmark_exposure: f64,
    pub active_exposure: f64,
    /// Absolute difference that drives this node's share
    pub difference: f64,
    /// Allocated contribution to tracking error (percentage points)
    pub ctev: f64,
    pub children: Vec<CtevNode>,
}

impl CtevNode {
    fn new(name: impl Into<String>, kind: CtevNodeKind, portfolio: f64, benchmark: f64) -> Self {
        let active = portfolio - benchmark;
        Self {
            name: name.into(),
            kind,
            portfolio_exposure: portfolio,
            benchmark_exposure: benchmark,
            active_exposure: active,
            difference: active.abs(),
            ctev: 0.0,
            children: Vec::new(),
        }
    }

    /// Group node whose difference is the sum of its children's
    fn group(name: impl Into<String>, kind: CtevNodeKind, children: Vec<CtevNode>) -> Self {
        let portfolio = children.iter().map(|c| c.portfolio_exposure).sum();
        let benchmark = children.iter().map(|c| c.benchmark_exposure).sum();
        let difference = children.iter().map(|c| c.difference).sum();
        Self {
            difference,
            children,
            ..Self::new(name, kind, portfolio, benchmark)
        }
    }

    pub fn find(&self, name: &str) -> Option<&CtevNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Largest gap between a node and the sum of its children, over the subtree
    pub fn conservation_error(&self) -> f64 {
        let own = if self.children.is_empty() {
            0.0
        } else {
            (self.ctev - self.children.iter().map(|c| c.ctev).sum::<f64>()).abs()
        };
        self.children
            .iter()
            .map(CtevNode::conservation_error)
            .fold(own, f64::max)
    }
}

/// Split `budget` across `nodes` by difference and recurse.
///
/// Siblings with a zero total difference all receive zero.
pub fn allocate(nodes: &mut [CtevNode], budget: f64) {
    let total: f64 = nodes.iter().map(|n| n.difference).sum();
    for node in nodes.iter_mut() {
        node.ctev = if total > 0.0 {
            budget * node.difference / total
        } else {
            0.0
        };
        let ctev = node.ctev;
        allocate(&mut node.children, ctev);
    }
}

/// CTEV descending with "Not Classified" last, applied at every level
pub fn sort_nodes(nodes: &mut [CtevNode]) {
    nodes.sort_by(|a, b| {
        (a.name == NOT_CLASSIFIED)
            .cmp(&(b.name == NOT_CLASSIFIED))
            .then(b.ctev.total_cmp(&a.ctev))
            .then_with(|| a.name.cmp(&b.name))
    });
    for node in nodes.iter_mut() {
        sort_nodes(&mut node.children);
    }
}

fn finish(mut nodes: Vec<CtevNode>, budget: f64) -> Vec<CtevNode> {
    allocate(&mut nodes, budget);
    sort_nodes(&mut nodes);
    nodes
}

fn security_leaf(m: &SecurityRiskMetrics) -> CtevNode {
    CtevNode::new(m.ticker.clone(), CtevNodeKind::Security, m.portfolio_weight, m.benchmark_weight)
}

/// Portfolio and benchmark weight totals per key; keys ordered
fn weight_totals<'a, F>(
    metrics: &'a BTreeMap<String, SecurityRiskMetrics>,
    key: F,
) -> BTreeMap<&'a str, (f64, f64)>
where
    F: Fn(&'a SecurityRiskMetrics) -> &'a str,
{
    let mut totals: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for m in metrics.values() {
        let entry = totals.entry(key(m)).or_default();
        entry.0 += m.portfolio_weight;
        entry.1 += m.benchmark_weight;
    }
    totals
}

/// One level of weight-difference nodes, each holding its member securities
fn weight_groups<'a, F>(
    metrics: &'a BTreeMap<String, SecurityRiskMetrics>,
    kind: CtevNodeKind,
    key: F,
) -> Vec<CtevNode>
where
    F: Fn(&'a SecurityRiskMetrics) -> &'a str + Copy,
{
    weight_totals(metrics, key)
        .into_iter()
        .map(|(name, (portfolio, benchmark))| {
            let mut node = CtevNode::new(name, kind, portfolio, benchmark);
            node.children = metrics
                .values()
                .filter(|m| key(*m) == name)
                .map(security_leaf)
                .collect();
            node
        })
        .collect()
}

/// Sector → industry → security tree
pub fn sector_tree(metrics: &BTreeMap<String, SecurityRiskMetrics>, budget: f64) -> Vec<CtevNode> {
    let sectors = weight_totals(metrics, |m| m.sector.as_str())
        .into_iter()
        .map(|(sector, (portfolio, benchmark))| {
            let members: BTreeMap<String, SecurityRiskMetrics> = metrics
                .iter()
                .filter(|(_, m)| m.sector == sector)
                .map(|(t, m)| (t.clone(), m.clone()))
                .collect();
            let mut node = CtevNode::new(sector, CtevNodeKind::Sector, portfolio, benchmark);
            node.children =
                weight_groups(&members, CtevNodeKind::Industry, |m| m.industry.as_str());
            node
        })
        .collect();
    finish(sectors, budget)
}

/// Country → security tree
pub fn country_tree(metrics: &BTreeMap<String, SecurityRiskMetrics>, budget: f64) -> Vec<CtevNode> {
    finish(weight_groups(metrics, CtevNodeKind::Country, |m| m.country.as_str()), budget)
}

/// Currency → security tree
pub fn currency_tree(
    metrics: &BTreeMap<String, SecurityRiskMetrics>,
    budget: f64,
) -> Vec<CtevNode> {
    finish(weight_groups(metrics, CtevNodeKind::Currency, |m| m.currency.as_str()), budget)
}

/// Weighted-average loading per factor over positive weights with a regression
pub fn weighted_betas(
    results: &HashMap<String, RegressionResult>,
    weights: impl Fn(&str) -> f64,
) -> BTreeMap<Factor, f64> {
    let mut total_weight = 0.0;
    let mut sums: BTreeMap<Factor, f64> = Factor::ALL.iter().map(|f| (*f, 0.0)).collect();
    for (ticker, result) in results {
        let w = weights(ticker);
        if w <= 0.0 {
            continue;
        }
        total_weight += w;
        for factor in Factor::ALL {
            *sums.entry(factor).or_default() += w * result.beta(factor);
        }
    }
    if total_weight > 0.0 {
        for value in sums.values_mut() {
            *value /= total_weight;
        }
    }
    sums
}

/// Market, Style, Sector, Country and (optionally) Currency groups
pub fn factor_group_tree(
    metrics: &BTreeMap<String, SecurityRiskMetrics>,
    results: &HashMap<String, RegressionResult>,
    budget: f64,
    include_currency: bool,
) -> Vec<CtevNode> {
    let weight_of = |side: fn(&SecurityRiskMetrics) -> f64| {
        move |ticker: &str| metrics.get(ticker).map_or(0.0, side)
    };
    let portfolio = weighted_betas(results, weight_of(|m| m.portfolio_weight));
    let benchmark = weighted_betas(results, weight_of(|m| m.benchmark_weight));

    let factor_node = |f: Factor| {
        CtevNode::new(f.code(), CtevNodeKind::Factor, portfolio[&f], benchmark[&f])
    };
    let factors_in = |group: FactorGroup| -> Vec<CtevNode> {
        Factor::ALL
            .iter()
            .filter(|f| f.group() == group)
            .map(|f| factor_node(*f))
            .collect()
    };

    let mut groups = vec![
        CtevNode::group("Market", CtevNodeKind::FactorGroup, factors_in(FactorGroup::Market)),
        CtevNode::group("Style", CtevNodeKind::FactorGroup, factors_in(FactorGroup::Style)),
        CtevNode::group(
            "Sector",
            CtevNodeKind::FactorGroup,
            weight_groups(metrics, CtevNodeKind::Sector, |m| m.sector.as_str()),
        ),
        CtevNode::group(
            "Country",
            CtevNodeKind::FactorGroup,
            weight_groups(metrics, CtevNodeKind::Country, |m| m.country.as_str()),
        ),
    ];
    if include_currency {
        groups.push(CtevNode::group(
            "Currency",
            CtevNodeKind::FactorGroup,
            weight_groups(metrics, CtevNodeKind::Currency, |m| m.currency.as_str()),
        ));
    }
    // Group exposures are sums of member weights, meaningless for beta groups
    for group in groups.iter_mut().take(2) {
        group.portfolio_exposure = 0.0;
        group.benchmark_exposure = 0.0;
        group.active_exposure = 0.0;
    }
    finish(groups, budget)
}

/// All hierarchical CTEV views of one analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CtevTrees {
    /// Budget split at the top of every tree (percentage points)
    pub budget: f64,
    pub factor_groups: Vec<CtevNode>,
    pub sectors: Vec<CtevNode>,
    pub countries: Vec<CtevNode>,
    pub currencies: Vec<CtevNode>,
}

impl CtevTrees {
    pub fn build(
        metrics: &BTreeMap<String, SecurityRiskMetrics>,
        results: &HashMap<String, RegressionResult>,
        budget: f64,
        include_currency: bool,
    ) -> Self {
        Self {
            budget,
            factor_groups: factor_group_tree(metrics, results, budget, include_currency),
            sectors: sector_tree(metrics, budget),
            countries: country_tree(metrics, budget),
            currencies: currency_tree(metrics, budget),
        }
    }

    pub fn named(&self) -> [(&'static str, &Vec<CtevNode>); 4] {
        [
            ("factor groups", &self.factor_groups),
            ("sectors", &self.sectors),
            ("countries", &self.countries),
            ("currencies", &self.currencies),
        ]
    }

    /// CTEV of one factor within the factor-group tree
    pub fn factor_ctev(&self, factor: Factor) -> f64 {
        self.factor_groups
            .iter()
            .filter_map(|g| g.find(factor.code()))
            .map(|n| n.ctev)
            .sum()
    }
}
