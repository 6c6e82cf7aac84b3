//! hexp_rs
//!
//! Group aggregation for cross-country health-expenditure panels. Turns a sparse,
//! unevenly reported country-year panel into group-level totals, medians and ratios
//! (per capita, share of GDP, share of government spending) that are safe to publish,
//! and merges them with the individual country series. Pairs with the `hexp` CLI.
//!
//! ### Features
//! - Bounded forward-fill of short reporting gaps (default 2 years)
//! - Completeness gate dropping group-years with too few reporters (default 95%)
//! - Totals, medians and ratio-of-sums aggregates with an explicit unit convention
//! - Continent, income-level and composite groups through one pluggable classifier
//! - Deterministic, first-seen series ordering in the combined output
//!
//! ### Example
//! ```
//! use std::sync::Arc;
//! use hexp_rs::{AggConfig, CountryTable, GroupComposer, Method, PanelRow, RatioScale};
//! use hexp_rs::classify::{Taxonomy, TaxonomyClassifier};
//!
//! let table = Arc::new(
//!     CountryTable::new()
//!         .with("AAA", "Africa", "Low income")
//!         .with("BBB", "Africa", "Low income"),
//! );
//! let spending = vec![
//!     PanelRow::new("AAA", 2020, Some(50.0)),
//!     PanelRow::new("BBB", 2020, Some(150.0)),
//! ];
//! let population = vec![
//!     PanelRow::new("AAA", 2020, Some(10.0)),
//!     PanelRow::new("BBB", 2020, Some(100.0)),
//! ];
//! let composer = GroupComposer::new(Method::Ratio(RatioScale::PerUnit), AggConfig::default())?
//!     .group(TaxonomyClassifier::new(table, Taxonomy::IncomeLevel));
//! let combined = composer.compose(&spending, Some(&population))?;
//! assert_eq!(combined.value("Low income", 2020), Some(1.818));
//! # Ok::<(), hexp_rs::AggError>(())
//! ```

pub mod aggregate;
pub mod classify;
pub mod compose;
pub mod config;
pub mod error;
pub mod fill;
pub mod gate;
pub mod models;
pub mod sources;
pub mod stats;
pub mod storage;

pub use aggregate::{Aggregator, Method};
pub use classify::{Classifier, CountryTable};
pub use compose::{CombinedTable, GroupComposer};
pub use config::AggConfig;
pub use error::{AggError, Result};
pub use models::{AggregateRow, GroupKey, PanelRow, RatioScale, ValueUnit};
