use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::AggConfig;

/// Multiply by this to turn billions into units.
pub const BILLION: f64 = 1e9;
/// Multiply by this to turn millions into units.
pub const MILLION: f64 = 1e6;

/// Tidy structure used by this crate (one row = one country-year observation).
///
/// `value` is `None` when the observation is missing; absence is never encoded as zero.
/// `dims` holds optional extra grouping dimensions such as `source` or `disease`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelRow {
    pub entity_id: String, // ISO3, or a group label after aggregation
    pub entity_name: String,
    pub year: i32,
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dims: BTreeMap<String, String>,
}

impl PanelRow {
    /// Row whose display name defaults to its id.
    pub fn new(entity_id: impl Into<String>, year: i32, value: Option<f64>) -> Self {
        let entity_id = entity_id.into();
        Self {
            entity_name: entity_id.clone(),
            entity_id,
            year,
            value,
            dims: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = name.into();
        self
    }

    pub fn with_dim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dims.insert(key.into(), value.into());
        self
    }

    /// Key of the time series this row belongs to.
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            entity_id: self.entity_id.clone(),
            dims: self.dims.clone(),
        }
    }

    /// Values of the requested dimensions; dimensions the row lacks are skipped.
    pub(crate) fn select_dims(&self, by: &[String]) -> BTreeMap<String, String> {
        by.iter()
            .filter_map(|k| self.dims.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// One time series within a panel: an entity plus its extra dimensions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub entity_id: String,
    pub dims: BTreeMap<String, String>,
}

/// Grouping key used by the aggregator: a group label plus the extra dimensions
/// the caller asked to keep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub group: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dims: BTreeMap<String, String>,
}

impl GroupKey {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            dims: BTreeMap::new(),
        }
    }
}

/// Unit convention of a value. Carried explicitly on every result so callers never
/// infer "fraction vs percent" from a column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueUnit {
    /// Absolute amount (currency units, people, ...).
    Amount,
    /// Plain quotient `numerator / denominator` (per capita, or a fraction in `[0,1]`).
    Ratio,
    /// Quotient already scaled by 100.
    Percent,
}

impl ValueUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueUnit::Amount => "amount",
            ValueUnit::Ratio => "ratio",
            ValueUnit::Percent => "percent",
        }
    }
}

/// Scaling applied to a ratio: `factor` is 1 for per-unit figures and 100 for percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioScale {
    PerUnit,
    Percent,
}

impl RatioScale {
    pub fn factor(&self) -> f64 {
        match self {
            RatioScale::PerUnit => 1.0,
            RatioScale::Percent => 100.0,
        }
    }

    /// Unit convention of values produced with this scale.
    pub fn unit(&self) -> ValueUnit {
        match self {
            RatioScale::PerUnit => ValueUnit::Ratio,
            RatioScale::Percent => ValueUnit::Percent,
        }
    }
}

/// One published group-year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateRow {
    pub group: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dims: BTreeMap<String, String>,
    pub value: f64,
    pub unit: ValueUnit,
    /// Distinct entities that contributed a value to this group-year.
    pub reporting_count: usize,
    /// Reference count the completeness decision compared against.
    pub expected_count: f64,
}

impl AggregateRow {
    /// Value expressed as a percentage, or `None` for absolute amounts.
    ///
    /// Ratios are scaled by 100, percentages are returned unchanged, so calling this
    /// on any row never double-scales.
    pub fn percent_value(&self) -> Option<f64> {
        match self.unit {
            ValueUnit::Amount => None,
            ValueUnit::Ratio => Some(self.value * 100.0),
            ValueUnit::Percent => Some(self.value),
        }
    }

    /// Treat this group-year as a single-entity panel row.
    pub fn to_panel_row(&self) -> PanelRow {
        PanelRow {
            entity_id: self.group.clone(),
            entity_name: self.group.clone(),
            year: self.year,
            value: Some(self.value),
            dims: self.dims.clone(),
        }
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let m = 10f64.powi(decimals);
    (value * m).round() / m
}

/// Multiply every present value by `factor` (e.g. [`MILLION`] to go from millions to units).
pub fn scale_values(panel: &[PanelRow], factor: f64) -> Vec<PanelRow> {
    panel
        .iter()
        .map(|r| PanelRow {
            value: r.value.map(|v| v * factor),
            ..r.clone()
        })
        .collect()
}

/// Drop excluded entities and years past `max_year`.
pub fn filter_panel(panel: &[PanelRow], config: &AggConfig) -> Vec<PanelRow> {
    let excluded: BTreeSet<&str> = config.exclude.iter().map(String::as_str).collect();
    panel
        .iter()
        .filter(|r| !excluded.contains(r.entity_id.as_str()))
        .filter(|r| config.max_year.is_none_or(|max| r.year <= max))
        .cloned()
        .collect()
}
