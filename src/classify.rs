//! Group membership: which group label an entity carries in a given year.
//!
//! Every grouping dimension (continent, income level, a custom composite) is a
//! [`Classifier`], so the composer runs one parametrized pipeline instead of one copy
//! per dimension. Membership is looked up per `(entity, year)` and never cached
//! across years, since income levels change over time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AggError, Result};

/// Label of the bucket for entities the classification service does not know.
pub const UNCLASSIFIED: &str = "Unclassified";

pub const AFRICA: &str = "Africa";
pub const AFRICA_LOW_LOWER_MIDDLE: &str = "Africa (Low and lower middle income)";

pub const HIGH_INCOME: &str = "High income";
pub const UPPER_MIDDLE_INCOME: &str = "Upper middle income";
pub const LOWER_MIDDLE_INCOME: &str = "Lower middle income";
pub const LOW_INCOME: &str = "Low income";

/// Pluggable grouping strategy.
pub trait Classifier {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Group label of `entity_id` in `year`, or `None` when the entity is not part of
    /// any group of this classifier.
    fn classify(&self, entity_id: &str, year: i32) -> Option<String>;
}

/// Base classification taxonomies supplied by the classification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Taxonomy {
    Continent,
    IncomeLevel,
}

impl Taxonomy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Taxonomy::Continent => "continent",
            Taxonomy::IncomeLevel => "income_level",
        }
    }
}

impl fmt::Display for Taxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Taxonomy {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "continent" => Ok(Taxonomy::Continent),
            "income_level" | "income" => Ok(Taxonomy::IncomeLevel),
            other => Err(AggError::config(format!(
                "unknown classification taxonomy '{other}' (expected continent or income_level)"
            ))),
        }
    }
}

/// Labels of one country as returned by the classification service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryClass {
    pub continent: Option<String>,
    pub income_level: Option<String>,
}

/// Continent and income-level lookup for a set of countries.
///
/// Income levels may be overridden per year; an override applies from its year until
/// the next override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryTable {
    base: BTreeMap<String, CountryClass>,
    income_by_year: BTreeMap<String, BTreeMap<i32, String>>,
}

impl CountryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        entity_id: impl Into<String>,
        continent: Option<&str>,
        income_level: Option<&str>,
    ) {
        self.base.insert(
            entity_id.into(),
            CountryClass {
                continent: continent.map(str::to_string),
                income_level: income_level.map(str::to_string),
            },
        );
    }

    /// Builder-style [`CountryTable::insert`].
    pub fn with(mut self, entity_id: &str, continent: &str, income_level: &str) -> Self {
        self.insert(entity_id, Some(continent), Some(income_level));
        self
    }

    /// Income level of `entity_id` from `year` on.
    pub fn set_income_from(
        &mut self,
        entity_id: impl Into<String>,
        year: i32,
        income_level: impl Into<String>,
    ) {
        self.income_by_year
            .entry(entity_id.into())
            .or_default()
            .insert(year, income_level.into());
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.base.contains_key(entity_id) || self.income_by_year.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.income_by_year.is_empty()
    }

    /// Label of `entity_id` in `year` for `taxonomy`, [`UNCLASSIFIED`] when unknown.
    pub fn label(&self, entity_id: &str, year: i32, taxonomy: Taxonomy) -> String {
        let found = match taxonomy {
            Taxonomy::Continent => self
                .base
                .get(entity_id)
                .and_then(|c| c.continent.clone()),
            Taxonomy::IncomeLevel => self
                .income_by_year
                .get(entity_id)
                .and_then(|years| years.range(..=year).next_back())
                .map(|(_, level)| level.clone())
                .or_else(|| {
                    self.base
                        .get(entity_id)
                        .and_then(|c| c.income_level.clone())
                }),
        };
        found
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNCLASSIFIED.to_string())
    }
}

/// Groups entities by one base taxonomy (e.g. every continent).
#[derive(Debug, Clone)]
pub struct TaxonomyClassifier {
    table: Arc<CountryTable>,
    taxonomy: Taxonomy,
}

impl TaxonomyClassifier {
    pub fn new(table: Arc<CountryTable>, taxonomy: Taxonomy) -> Self {
        Self { table, taxonomy }
    }
}

impl Classifier for TaxonomyClassifier {
    fn name(&self) -> &str {
        self.taxonomy.as_str()
    }

    fn classify(&self, entity_id: &str, year: i32) -> Option<String> {
        Some(self.table.label(entity_id, year, self.taxonomy))
    }
}

/// A single named group defined as an intersection of base taxonomy conditions,
/// such as "continent is Africa AND income level is Low or Lower middle".
#[derive(Debug, Clone)]
pub struct CompositeClassifier {
    label: String,
    table: Arc<CountryTable>,
    conditions: Vec<(Taxonomy, BTreeSet<String>)>,
}

impl CompositeClassifier {
    pub fn new(
        label: impl Into<String>,
        table: Arc<CountryTable>,
        conditions: Vec<(Taxonomy, BTreeSet<String>)>,
    ) -> Result<Self> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(AggError::config("composite group needs a label"));
        }
        if conditions.is_empty() || conditions.iter().any(|(_, allowed)| allowed.is_empty()) {
            return Err(AggError::config(format!(
                "composite group '{label}' needs at least one non-empty condition"
            )));
        }
        Ok(Self {
            label,
            table,
            conditions,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Classifier for CompositeClassifier {
    fn name(&self) -> &str {
        &self.label
    }

    fn classify(&self, entity_id: &str, year: i32) -> Option<String> {
        self.conditions
            .iter()
            .all(|(taxonomy, allowed)| allowed.contains(&self.table.label(entity_id, year, *taxonomy)))
            .then(|| self.label.clone())
    }
}

fn labels(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// All African countries, labelled "Africa".
pub fn africa(table: Arc<CountryTable>) -> CompositeClassifier {
    CompositeClassifier {
        label: AFRICA.to_string(),
        table,
        conditions: vec![(Taxonomy::Continent, labels(&[AFRICA]))],
    }
}

/// African countries classified as low or lower-middle income in the given year.
pub fn africa_low_lower_middle(table: Arc<CountryTable>) -> CompositeClassifier {
    CompositeClassifier {
        label: AFRICA_LOW_LOWER_MIDDLE.to_string(),
        table,
        conditions: vec![
            (Taxonomy::Continent, labels(&[AFRICA])),
            (
                Taxonomy::IncomeLevel,
                labels(&[LOW_INCOME, LOWER_MIDDLE_INCOME]),
            ),
        ],
    }
}

/// Every entity is its own group; re-aggregating already aggregated series uses this
/// together with [`crate::aggregate::Aggregator::without_fill`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityClassifier;

impl Classifier for EntityClassifier {
    fn name(&self) -> &str {
        "entity"
    }

    fn classify(&self, entity_id: &str, _year: i32) -> Option<String> {
        Some(entity_id.to_string())
    }
}

/// Adapter turning a closure into a [`Classifier`].
pub struct FnClassifier<F> {
    name: String,
    f: F,
}

impl<F> FnClassifier<F>
where
    F: Fn(&str, i32) -> Option<String>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Classifier for FnClassifier<F>
where
    F: Fn(&str, i32) -> Option<String>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, entity_id: &str, year: i32) -> Option<String> {
        (self.f)(entity_id, year)
    }
}
