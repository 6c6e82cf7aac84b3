//! Completeness gate: decides whether a group-year has enough reporters to publish.
//!
//! A group-year is accepted when `reporting >= threshold * expected`. With the default
//! [`ExpectedBasis::MeanReporting`], `expected` is the mean reporting count of the same
//! group over the years in which it has at least one reporter, so a group that is
//! always thinly reported is judged against its own typical level rather than its
//! theoretical membership. Years with no reporter at all are grid padding, not history.
//!
//! Rejected group-years are dropped by callers, never emitted as null rows.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{AggConfig, ExpectedBasis};
use crate::error::{AggError, Result};
use crate::models::{GroupKey, PanelRow};

/// Slack for float error in `threshold * expected`.
const EPSILON: f64 = 1e-9;

/// Reporting tallies for one group-year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupYearCount {
    pub key: GroupKey,
    pub year: i32,
    /// Distinct entities with a usable value.
    pub reporting: usize,
    /// Distinct entities present in the group-year, reported or not.
    pub members: usize,
}

/// Outcome of the gate for one group-year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub key: GroupKey,
    pub year: i32,
    pub reporting: usize,
    pub members: usize,
    pub expected: f64,
    pub accepted: bool,
}

impl Decision {
    /// Members that did not report.
    pub fn missing(&self) -> usize {
        self.members.saturating_sub(self.reporting)
    }

    /// Percentage of members that did not report, rounded to 2 decimals.
    pub fn missing_share(&self) -> Option<f64> {
        if self.members == 0 {
            return None;
        }
        Some(crate::models::round_to(
            self.missing() as f64 * 100.0 / self.members as f64,
            2,
        ))
    }
}

/// Mean of a group's per-year reporting counts.
///
/// Fails with [`AggError::InsufficientHistory`] when the group has no years at all;
/// the mean of nothing must never leak into comparisons as NaN.
pub fn expected_count(group: &str, reporting: &[usize]) -> Result<f64> {
    if reporting.is_empty() {
        return Err(AggError::InsufficientHistory(group.to_string()));
    }
    Ok(reporting.iter().sum::<usize>() as f64 / reporting.len() as f64)
}

#[derive(Debug, Clone)]
pub struct CompletenessGate {
    threshold: f64,
    basis: ExpectedBasis,
    entity_start: BTreeMap<String, i32>,
}

impl CompletenessGate {
    pub fn new(threshold: f64, basis: ExpectedBasis) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AggError::config(format!(
                "threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(Self {
            threshold,
            basis,
            entity_start: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &AggConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.threshold, config.expected_basis)?
            .with_entity_start(config.entity_start.clone()))
    }

    /// Entities that only count from the given year on.
    pub fn with_entity_start(mut self, table: BTreeMap<String, i32>) -> Self {
        self.entity_start = table;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether `entity` may contribute to counts in `year`.
    pub fn counts(&self, entity: &str, year: i32) -> bool {
        self.entity_start
            .get(entity)
            .is_none_or(|&start| year >= start)
    }

    /// Warn about exists-from entries that match no entity in `panel`.
    ///
    /// A code that never appears is most likely misspelled, and its rows would then
    /// count before the entity existed.
    pub fn audit_entity_start(&self, panel: &[PanelRow]) -> Vec<String> {
        let present: BTreeSet<&str> = panel.iter().map(|r| r.entity_id.as_str()).collect();
        let unmatched: Vec<String> = self
            .entity_start
            .keys()
            .filter(|code| !present.contains(code.as_str()))
            .cloned()
            .collect();
        for code in &unmatched {
            log::warn!(
                "exists-from entry '{code}' ({}) matches no entity in the panel",
                self.entity_start[code]
            );
        }
        unmatched
    }

    /// Judge every group-year in `counts`.
    ///
    /// Output follows `(group key, year)` order. A group-year with no reporters is never
    /// accepted, whatever the threshold.
    pub fn evaluate(&self, counts: &[GroupYearCount]) -> Result<Vec<Decision>> {
        let mut by_group: BTreeMap<&GroupKey, Vec<&GroupYearCount>> = BTreeMap::new();
        for c in counts {
            by_group.entry(&c.key).or_default().push(c);
        }

        let mut out = Vec::with_capacity(counts.len());
        for (key, mut years) in by_group {
            years.sort_by_key(|c| c.year);
            let mean = match self.basis {
                ExpectedBasis::MeanReporting => {
                    // years without a single reporter are not years of the group
                    let reporting: Vec<usize> = years
                        .iter()
                        .map(|c| c.reporting)
                        .filter(|&n| n > 0)
                        .collect();
                    if reporting.is_empty() {
                        Some(0.0)
                    } else {
                        Some(expected_count(&key.group, &reporting)?)
                    }
                }
                ExpectedBasis::Membership => None,
            };
            for c in years {
                let expected = mean.unwrap_or(c.members as f64);
                let accepted = c.reporting > 0
                    && c.reporting as f64 + EPSILON >= self.threshold * expected;
                out.push(Decision {
                    key: key.clone(),
                    year: c.year,
                    reporting: c.reporting,
                    members: c.members,
                    expected,
                    accepted,
                });
            }
        }

        let rejected = out.iter().filter(|d| !d.accepted).count();
        log::debug!(
            "completeness gate (threshold {}): {} group-years, {} rejected",
            self.threshold,
            out.len(),
            rejected
        );
        Ok(out)
    }
}
