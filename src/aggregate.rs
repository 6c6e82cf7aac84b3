//! Group-level totals, medians and ratios.
//!
//! Every mode runs the same pipeline over a country panel:
//!
//! 1. expand each series onto the panel's full year range and forward-fill short gaps
//!    ([`crate::fill`]);
//! 2. drop rows of entities that did not exist yet (the exists-from table);
//! 3. label each row with its group via a [`Classifier`];
//! 4. bucket rows by `(group, extra dims, year)` and count distinct reporters;
//! 5. pass the counts through the [`CompletenessGate`] and compute values only for
//!    accepted group-years.
//!
//! Ratios are **ratios of sums**: `factor * sum(value) / sum(denominator)` across the
//! reporting members, not the mean of each member's own ratio. Large members weigh in
//! proportion to their size ("total spending in the group divided by total population
//! in the group"). A row without a matching denominator does not report.

use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::classify::Classifier;
use crate::config::AggConfig;
use crate::error::{AggError, Result};
use crate::fill::{expand_grid, fill_gaps, interpolate_gaps};
use crate::gate::{CompletenessGate, Decision, GroupYearCount};
use crate::models::{AggregateRow, GroupKey, PanelRow, RatioScale, ValueUnit, round_to};
use crate::stats::median;

/// Decimal places ratios are rounded to when computed.
pub const RATIO_DECIMALS: i32 = 3;

/// Aggregation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `sum(value)` per group-year.
    Total,
    /// `median(value)` per group-year.
    Median,
    /// `factor * sum(value) / sum(denominator)` per group-year.
    Ratio(RatioScale),
}

impl Method {
    pub fn unit(&self) -> ValueUnit {
        match self {
            Method::Total | Method::Median => ValueUnit::Amount,
            Method::Ratio(scale) => scale.unit(),
        }
    }

    pub fn needs_denominator(&self) -> bool {
        matches!(self, Method::Ratio(_))
    }
}

impl FromStr for Method {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "total" | "sum" => Ok(Method::Total),
            "median" => Ok(Method::Median),
            "per-capita" | "ratio" => Ok(Method::Ratio(RatioScale::PerUnit)),
            "percent" | "share" => Ok(Method::Ratio(RatioScale::Percent)),
            other => Err(AggError::config(format!(
                "unknown aggregation method '{other}'"
            ))),
        }
    }
}

/// Aggregated rows plus the gate decisions behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub rows: Vec<AggregateRow>,
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Default)]
struct Bucket {
    values: Vec<f64>,
    denominators: Vec<f64>,
    reporting: BTreeSet<String>,
    members: BTreeSet<String>,
    valued: usize,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    method: Method,
    fill_limit: i32,
    interpolate: Option<i32>,
    fill: bool,
    by: Vec<String>,
    gate: CompletenessGate,
}

impl Aggregator {
    pub fn new(method: Method, config: &AggConfig) -> Result<Self> {
        Ok(Self {
            method,
            fill_limit: config.fill_limit,
            interpolate: None,
            fill: true,
            by: Vec::new(),
            gate: CompletenessGate::from_config(config)?,
        })
    }

    /// Extra dimensions kept in the grouping key next to the group label.
    pub fn by<S: AsRef<str>>(mut self, dims: &[S]) -> Self {
        self.by = dims.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    /// Interpolate up to `limit` years into each interior gap from both ends before
    /// forward-filling.
    pub fn interpolate(mut self, limit: i32) -> Self {
        self.interpolate = Some(limit);
        self
    }

    /// Take the panel as given: no grid expansion, interpolation or forward fill.
    ///
    /// Meant for re-aggregating published aggregates, where a year the gate dropped
    /// must stay dropped instead of being filled back in from its neighbours.
    pub fn without_fill(mut self) -> Self {
        self.fill = false;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn dims(&self) -> &[String] {
        &self.by
    }

    pub fn gate(&self) -> &CompletenessGate {
        &self.gate
    }

    /// Aggregate `panel` into the groups produced by `classifier`.
    pub fn aggregate(
        &self,
        panel: &[PanelRow],
        classifier: &dyn Classifier,
        denominators: Option<&[PanelRow]>,
    ) -> Result<Vec<AggregateRow>> {
        Ok(self.run(panel, classifier, denominators)?.rows)
    }

    /// Like [`Aggregator::aggregate`] but also returns every gate decision, accepted or not.
    pub fn run(
        &self,
        panel: &[PanelRow],
        classifier: &dyn Classifier,
        denominators: Option<&[PanelRow]>,
    ) -> Result<Aggregation> {
        let denominators = match (self.method, denominators) {
            (Method::Ratio(_), None) => {
                return Err(AggError::config("ratio aggregation needs a denominator panel"));
            }
            (Method::Ratio(_), Some(d)) => Some(index_denominators(d)),
            _ => None,
        };

        let prepared = self.prepare(panel)?;
        let buckets = self.bucket(&prepared, classifier, denominators.as_ref());
        if let Some(index) = &denominators {
            check_denominator_overlap(&buckets, index.len())?;
        }

        let counts: Vec<GroupYearCount> = buckets
            .iter()
            .map(|((key, year), b)| GroupYearCount {
                key: key.clone(),
                year: *year,
                reporting: b.reporting.len(),
                members: b.members.len(),
            })
            .collect();
        let decisions = self.gate.evaluate(&counts)?;

        let mut rows = Vec::new();
        for d in decisions.iter().filter(|d| d.accepted) {
            let Some(bucket) = buckets.get(&(d.key.clone(), d.year)) else {
                continue;
            };
            match self.compute(bucket) {
                Some(value) => rows.push(AggregateRow {
                    group: d.key.group.clone(),
                    year: d.year,
                    dims: d.key.dims.clone(),
                    value,
                    unit: self.method.unit(),
                    reporting_count: d.reporting,
                    expected_count: d.expected,
                }),
                None => log::debug!(
                    "dropping {} {}: denominator sums to zero",
                    d.key.group,
                    d.year
                ),
            }
        }

        if self.method.unit() == ValueUnit::Percent {
            check_percent_range(classifier.name(), &rows);
        }
        log::info!(
            "{}: {} group-years published out of {}",
            classifier.name(),
            rows.len(),
            decisions.len()
        );
        Ok(Aggregation { rows, decisions })
    }

    fn prepare(&self, panel: &[PanelRow]) -> Result<Vec<PanelRow>> {
        for dim in &self.by {
            if let Some(row) = panel.iter().find(|r| !r.dims.contains_key(dim)) {
                return Err(AggError::config(format!(
                    "grouping key '{dim}' is missing on {} {}",
                    row.entity_id, row.year
                )));
            }
        }
        if !self.fill {
            return Ok(panel.to_vec());
        }
        let mut rows = expand_grid(panel);
        if let Some(limit) = self.interpolate {
            rows = interpolate_gaps(&rows, limit);
        }
        Ok(fill_gaps(&rows, self.fill_limit))
    }

    fn bucket(
        &self,
        rows: &[PanelRow],
        classifier: &dyn Classifier,
        denominators: Option<&AHashMap<(String, i32), f64>>,
    ) -> BTreeMap<(GroupKey, i32), Bucket> {
        let mut buckets: BTreeMap<(GroupKey, i32), Bucket> = BTreeMap::new();
        for row in rows {
            if !self.gate.counts(&row.entity_id, row.year) {
                continue;
            }
            let Some(group) = classifier.classify(&row.entity_id, row.year) else {
                continue;
            };
            let key = GroupKey {
                group,
                dims: row.select_dims(&self.by),
            };
            let bucket = buckets.entry((key, row.year)).or_default();
            bucket.members.insert(row.entity_id.clone());
            let Some(value) = row.value else {
                continue;
            };
            bucket.valued += 1;
            match denominators {
                Some(index) => {
                    if let Some(&d) = index.get(&(row.entity_id.clone(), row.year)) {
                        bucket.values.push(value);
                        bucket.denominators.push(d);
                        bucket.reporting.insert(row.entity_id.clone());
                    }
                }
                None => {
                    bucket.values.push(value);
                    bucket.reporting.insert(row.entity_id.clone());
                }
            }
        }
        buckets
    }

    fn compute(&self, bucket: &Bucket) -> Option<f64> {
        match self.method {
            Method::Total => Some(bucket.values.iter().sum()),
            Method::Median => median(&mut bucket.values.clone()),
            Method::Ratio(scale) => {
                let num: f64 = bucket.values.iter().sum();
                let den: f64 = bucket.denominators.iter().sum();
                if den == 0.0 || !den.is_finite() {
                    return None;
                }
                Some(round_to(scale.factor() * num / den, RATIO_DECIMALS))
            }
        }
    }
}

/// `(entity, year) -> denominator`; absent values are left out, the first duplicate wins.
fn index_denominators(panel: &[PanelRow]) -> AHashMap<(String, i32), f64> {
    let mut index = AHashMap::with_capacity(panel.len());
    for row in panel {
        if let Some(v) = row.value {
            index.entry((row.entity_id.clone(), row.year)).or_insert(v);
        }
    }
    index
}

/// Raise when some group has values but not a single year with a usable denominator.
fn check_denominator_overlap(
    buckets: &BTreeMap<(GroupKey, i32), Bucket>,
    denominator_rows: usize,
) -> Result<()> {
    let mut per_group: BTreeMap<&GroupKey, (usize, usize)> = BTreeMap::new();
    for ((key, _), b) in buckets {
        let e = per_group.entry(key).or_default();
        e.0 += b.valued;
        e.1 += b.reporting.len();
    }
    for (key, (valued, reporting)) in per_group {
        if valued > 0 && reporting == 0 {
            return Err(AggError::MissingData {
                group: key.group.clone(),
                detail: format!(
                    "none of {valued} values has a denominator for the same entity and year \
                     ({denominator_rows} denominator rows available)"
                ),
            });
        }
    }
    Ok(())
}

/// Warn when percent values fall outside `[0, 100]`, the usual sign of double scaling.
pub fn check_percent_range(series: &str, rows: &[AggregateRow]) -> usize {
    let out_of_range = rows
        .iter()
        .filter(|r| r.unit == ValueUnit::Percent && !(0.0..=100.0).contains(&r.value))
        .count();
    if out_of_range > 0 {
        log::warn!(
            "{series}: {out_of_range} percent values outside [0, 100]; check for double scaling"
        );
    }
    out_of_range
}

/// Per-entity ratio `round3(factor * value / denominator)`, joined on `(entity, year)`.
///
/// Every input row is kept; rows without a value, without a denominator, or with a
/// zero denominator come out absent.
pub fn entity_ratio(
    panel: &[PanelRow],
    denominators: &[PanelRow],
    scale: RatioScale,
) -> Vec<PanelRow> {
    let index = index_denominators(denominators);
    panel
        .iter()
        .map(|r| {
            let value = match (r.value, index.get(&(r.entity_id.clone(), r.year))) {
                (Some(v), Some(&d)) if d != 0.0 => {
                    Some(round_to(scale.factor() * v / d, RATIO_DECIMALS))
                }
                _ => None,
            };
            PanelRow { value, ..r.clone() }
        })
        .collect()
}
