//! Group Composer: runs every requested grouping through the aggregator and merges
//! the resulting group series with the individual country series.
//!
//! Series order is first-seen: group labels in the order the classifiers were added
//! and, within one classifier, the order labels first appear in the input panel;
//! countries follow in the order they first appear. Rows are ordered by
//! `(year, dims, series order)`, so identical input always yields identical output.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::{Aggregation, Aggregator, Method, entity_ratio};
use crate::classify::{Classifier, UNCLASSIFIED};
use crate::config::AggConfig;
use crate::error::{AggError, Result};
use crate::fill::expand_grid;
use crate::gate::Decision;
use crate::models::{AggregateRow, PanelRow, ValueUnit, filter_panel};

/// What happens to entities a base taxonomy cannot place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnclassifiedPolicy {
    /// Leave them out of group aggregates, with a warning naming them.
    #[default]
    Drop,
    /// Aggregate them into an "Unclassified" group of their own.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Country,
    Group,
}

/// One row of the long-format output table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub year: i32,
    /// Country name for individual rows, group label for aggregate rows.
    pub series: String,
    pub kind: SeriesKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dims: BTreeMap<String, String>,
    pub value: Option<f64>,
    pub unit: ValueUnit,
}

/// Long-format table keyed by `(year, series)`, ready for a sink or chart reshaping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedTable {
    pub series_order: Vec<String>,
    pub rows: Vec<SeriesRow>,
}

impl CombinedTable {
    /// Rows of one series, in table order.
    pub fn series<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SeriesRow> + 'a {
        self.rows.iter().filter(move |r| r.series == name)
    }

    /// Value of `series` in `year`, ignoring dims.
    pub fn value(&self, series: &str, year: i32) -> Option<f64> {
        self.series(series)
            .find(|r| r.year == year)
            .and_then(|r| r.value)
    }

    /// Names of all dims used by any row.
    pub fn dim_names(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|r| r.dims.keys().cloned())
            .collect()
    }
}

/// Output of [`GroupComposer::compose_groups`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAggregates {
    /// Group labels in first-seen order.
    pub labels: Vec<String>,
    /// Published group-years, ordered by `(year, dims, label order)`.
    pub rows: Vec<AggregateRow>,
    /// Every gate decision, for completeness reporting.
    pub decisions: Vec<Decision>,
}

pub struct GroupComposer {
    config: AggConfig,
    aggregator: Aggregator,
    groups: Vec<Box<dyn Classifier>>,
    unclassified: UnclassifiedPolicy,
}

impl GroupComposer {
    pub fn new(method: Method, config: AggConfig) -> Result<Self> {
        let aggregator = Aggregator::new(method, &config)?;
        Ok(Self {
            config,
            aggregator,
            groups: Vec::new(),
            unclassified: UnclassifiedPolicy::default(),
        })
    }

    /// Request the groups produced by `classifier`.
    pub fn group(mut self, classifier: impl Classifier + 'static) -> Self {
        self.groups.push(Box::new(classifier));
        self
    }

    pub fn by<S: AsRef<str>>(mut self, dims: &[S]) -> Self {
        self.aggregator = self.aggregator.by(dims);
        self
    }

    pub fn interpolate(mut self, limit: i32) -> Self {
        self.aggregator = self.aggregator.interpolate(limit);
        self
    }

    pub fn unclassified(mut self, policy: UnclassifiedPolicy) -> Self {
        self.unclassified = policy;
        self
    }

    pub fn config(&self) -> &AggConfig {
        &self.config
    }

    /// Aggregate every requested grouping and merge the group series with the
    /// country series of `countries`.
    ///
    /// Country series are shown as-is (neither gap-filled nor gated), summed over
    /// the dims not kept by [`GroupComposer::by`] so each country has one value per
    /// year and kept dims. For ratio methods each country gets its own ratio against
    /// `denominators` so group and country series share one unit.
    pub fn compose(
        &self,
        countries: &[PanelRow],
        denominators: Option<&[PanelRow]>,
    ) -> Result<CombinedTable> {
        Ok(self.compose_with_report(countries, denominators)?.0)
    }

    /// Like [`GroupComposer::compose`], also returning every gate decision.
    pub fn compose_with_report(
        &self,
        countries: &[PanelRow],
        denominators: Option<&[PanelRow]>,
    ) -> Result<(CombinedTable, Vec<Decision>)> {
        let groups = self.compose_groups(countries, denominators)?;
        let dims = self.aggregator.dims();
        let countries = collapse_dims(&filter_panel(countries, &self.config), dims);
        let countries = match (self.aggregator.method(), denominators) {
            (Method::Ratio(scale), Some(d)) => entity_ratio(&countries, d, scale),
            _ => countries,
        };

        let mut order = groups.labels.clone();
        let group_labels: BTreeSet<&str> = groups.labels.iter().map(String::as_str).collect();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for row in &countries {
            if group_labels.contains(row.entity_name.as_str()) {
                return Err(AggError::NamingCollision {
                    label: row.entity_name.clone(),
                    year: row.year,
                    first: "group series".to_string(),
                    second: format!("country {}", row.entity_id),
                });
            }
            if seen.insert(row.entity_name.clone()) {
                order.push(row.entity_name.clone());
            }
        }

        let unit = self.aggregator.method().unit();
        let mut rows: Vec<SeriesRow> = groups
            .rows
            .iter()
            .map(|r| SeriesRow {
                year: r.year,
                series: r.group.clone(),
                kind: SeriesKind::Group,
                dims: r.dims.clone(),
                value: Some(r.value),
                unit: r.unit,
            })
            .chain(countries.iter().map(|r| SeriesRow {
                year: r.year,
                series: r.entity_name.clone(),
                kind: SeriesKind::Country,
                dims: r.dims.clone(),
                value: r.value,
                unit,
            }))
            .collect();

        let position: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        rows.sort_by(|a, b| {
            (a.year, &a.dims, position.get(a.series.as_str())).cmp(&(
                b.year,
                &b.dims,
                position.get(b.series.as_str()),
            ))
        });

        log::info!(
            "composed {} series ({} groups) into {} rows",
            order.len(),
            groups.labels.len(),
            rows.len()
        );
        let table = CombinedTable {
            series_order: order,
            rows,
        };
        Ok((table, groups.decisions))
    }

    /// Aggregate every requested grouping without merging country series.
    pub fn compose_groups(
        &self,
        countries: &[PanelRow],
        denominators: Option<&[PanelRow]>,
    ) -> Result<GroupAggregates> {
        if self.groups.is_empty() {
            return Err(AggError::config("no groups requested"));
        }
        let panel = filter_panel(countries, &self.config);
        self.aggregator.gate().audit_entity_start(&panel);

        let mut labels: Vec<String> = Vec::new();
        let mut owner: BTreeMap<(i32, String), usize> = BTreeMap::new();
        let mut out = GroupAggregates::default();

        for (idx, classifier) in self.groups.iter().enumerate() {
            let filtered = PolicyClassifier {
                inner: classifier.as_ref(),
                drop_unclassified: self.unclassified == UnclassifiedPolicy::Drop,
            };
            let assigned = assign(&panel, &filtered);
            if assigned.is_empty() {
                log::warn!(
                    "{}: no entity of the panel falls into this grouping, skipping",
                    classifier.name()
                );
                continue;
            }
            for (year, label) in assigned {
                match owner.get(&(year, label.clone())) {
                    Some(&other) if other != idx => {
                        return Err(AggError::NamingCollision {
                            label,
                            year,
                            first: self.groups[other].name().to_string(),
                            second: classifier.name().to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        owner.insert((year, label.clone()), idx);
                    }
                }
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }

            let Aggregation { rows, decisions } =
                self.aggregator.run(&panel, &filtered, denominators)?;
            out.rows.extend(rows);
            out.decisions.extend(decisions);
        }

        let position: BTreeMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        out.rows.sort_by(|a, b| {
            (a.year, &a.dims, position.get(a.group.as_str())).cmp(&(
                b.year,
                &b.dims,
                position.get(b.group.as_str()),
            ))
        });
        out.labels = labels;
        Ok(out)
    }
}

/// Applies the unclassified policy on top of a requested classifier.
struct PolicyClassifier<'a> {
    inner: &'a dyn Classifier,
    drop_unclassified: bool,
}

impl Classifier for PolicyClassifier<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn classify(&self, entity_id: &str, year: i32) -> Option<String> {
        self.inner
            .classify(entity_id, year)
            .filter(|label| !(self.drop_unclassified && label == UNCLASSIFIED))
    }
}

/// One row per `(entity, year, kept dims)`: values are summed over every other dim,
/// absent when none of them is present. Rows keep first-seen order.
fn collapse_dims(panel: &[PanelRow], by: &[String]) -> Vec<PanelRow> {
    let mut index: BTreeMap<(&str, i32, BTreeMap<String, String>), usize> = BTreeMap::new();
    let mut out: Vec<PanelRow> = Vec::new();
    for row in panel {
        let dims = row.select_dims(by);
        match index.get(&(row.entity_id.as_str(), row.year, dims.clone())) {
            Some(&i) => {
                if let Some(v) = row.value {
                    out[i].value = Some(out[i].value.unwrap_or(0.0) + v);
                }
            }
            None => {
                index.insert((row.entity_id.as_str(), row.year, dims.clone()), out.len());
                out.push(PanelRow {
                    dims,
                    ..row.clone()
                });
            }
        }
    }
    out
}

/// `(year, label)` for every entity-year the aggregator will see: input rows first, in
/// input order, then the years grid expansion adds.
fn assign(panel: &[PanelRow], classifier: &PolicyClassifier<'_>) -> Vec<(i32, String)> {
    let expanded = expand_grid(panel);
    let mut seen: BTreeSet<(&str, i32)> = BTreeSet::new();
    let mut dropped: BTreeSet<&str> = BTreeSet::new();
    let mut assigned = Vec::new();
    for row in panel.iter().chain(expanded.iter()) {
        if !seen.insert((row.entity_id.as_str(), row.year)) {
            continue;
        }
        if classifier.drop_unclassified
            && classifier.inner.classify(&row.entity_id, row.year).as_deref() == Some(UNCLASSIFIED)
        {
            dropped.insert(row.entity_id.as_str());
            continue;
        }
        if let Some(label) = classifier.classify(&row.entity_id, row.year) {
            assigned.push((row.year, label));
        }
    }
    if !dropped.is_empty() {
        log::warn!(
            "{}: {} unclassified entities left out of group aggregates: {}",
            classifier.name(),
            dropped.len(),
            dropped.into_iter().collect::<Vec<_>>().join(", ")
        );
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FnClassifier;

    #[test]
    fn assign_covers_years_added_by_the_grid() {
        let only_aaa = FnClassifier::new("aaa", |id: &str, _: i32| {
            Some(if id == "AAA" { "G" } else { UNCLASSIFIED }.to_string())
        });
        let policy = PolicyClassifier {
            inner: &only_aaa,
            drop_unclassified: true,
        };
        let panel = vec![
            PanelRow::new("AAA", 2019, Some(1.0)),
            PanelRow::new("BBB", 2019, Some(1.0)),
            PanelRow::new("BBB", 2020, Some(1.0)),
        ];
        let assigned = assign(&panel, &policy);
        assert_eq!(
            assigned,
            vec![(2019, "G".to_string()), (2020, "G".to_string())]
        );
    }

    #[test]
    fn collapse_sums_over_dropped_dims_only() {
        let panel = vec![
            PanelRow::new("KEN", 2020, Some(1.0)).with_dim("source", "public"),
            PanelRow::new("KEN", 2020, Some(2.0)).with_dim("source", "private"),
            PanelRow::new("KEN", 2021, None).with_dim("source", "public"),
            PanelRow::new("KEN", 2021, None).with_dim("source", "private"),
        ];
        let all = collapse_dims(&panel, &[]);
        assert_eq!(all.len(), 2);
        assert_eq!((all[0].year, all[0].value), (2020, Some(3.0)));
        assert!(all[0].dims.is_empty());
        assert_eq!((all[1].year, all[1].value), (2021, None));

        let by_source = collapse_dims(&panel, &["source".to_string()]);
        assert_eq!(by_source, panel);
    }

    #[test]
    fn keep_policy_passes_unclassified_through() {
        let everyone = FnClassifier::new("none", |_: &str, _: i32| Some(UNCLASSIFIED.to_string()));
        let policy = PolicyClassifier {
            inner: &everyone,
            drop_unclassified: false,
        };
        assert_eq!(policy.classify("XXX", 2020).as_deref(), Some(UNCLASSIFIED));
    }
}
