//! Collaborators at the edge of the core: where panels come from and where tables go.
//!
//! The core only ever sees typed in-memory panels. The traits below describe what it
//! needs from the outside world; the CSV-backed implementations cover local files,
//! and callers plug in their own for databases or remote APIs.

use ahash::AHashMap;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::classify::CountryTable;
use crate::compose::CombinedTable;
use crate::error::{AggError, Result};
use crate::models::PanelRow;
use crate::storage;

/// Supplies a country-year panel for an indicator code, optionally restricted by
/// attribute filters such as `units = national currency unit`.
pub trait IndicatorSource {
    fn load(&self, indicator: &str, filter: &BTreeMap<String, String>) -> Result<Vec<PanelRow>>;
}

impl<S: IndicatorSource + ?Sized> IndicatorSource for &S {
    fn load(&self, indicator: &str, filter: &BTreeMap<String, String>) -> Result<Vec<PanelRow>> {
        (**self).load(indicator, filter)
    }
}

/// Converts a panel to a constant-price / constant-currency basis.
pub trait PriceNormalizer {
    fn normalize(&self, panel: &[PanelRow], base_year: i32) -> Result<Vec<PanelRow>>;
}

/// Continent and income-level labels for a list of country codes.
pub trait ClassificationService {
    fn classify_countries(&self, codes: &[String]) -> Result<CountryTable>;
}

/// Accepts a finished long-format table for persistence.
pub trait Sink {
    fn write_table(&self, table: &CombinedTable) -> Result<()>;
}

/// Columns of the tidy CSV layout that are not extra dimensions.
const RESERVED: [&str; 5] = ["entity_id", "entity_name", "year", "indicator", "value"];

/// Extract the year from `YYYY`, `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_year(s: &str) -> Result<i32> {
    let s = s.trim();
    if let Ok(y) = s.parse::<i32>() {
        return Ok(y);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d.year());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.year());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.year());
    }
    Err(AggError::Parse(format!("invalid year '{s}'")))
}

/// Empty cells and the usual NA spellings are absent values, never zero.
pub fn parse_value(s: &str) -> Result<Option<f64>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    s.parse::<f64>()
        .map(Some)
        .map_err(|e| AggError::Parse(format!("invalid value '{s}': {e}")))
}

/// Tidy CSV file with `entity_id,year,value` and optionally `entity_name`, `indicator`;
/// any other column becomes an extra dimension.
#[derive(Debug, Clone)]
pub struct CsvIndicatorSource {
    path: PathBuf,
}

impl CsvIndicatorSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Every row of the file, regardless of indicator.
    pub fn load_all(&self) -> Result<Vec<PanelRow>> {
        Ok(self
            .read()?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    fn read(&self) -> Result<Vec<(Option<String>, PanelRow)>> {
        let mut rdr = csv::Reader::from_path(&self.path)?;
        let headers = rdr.headers()?.clone();
        let col = |name: &str| headers.iter().position(|h| h.trim() == name);
        let (Some(id_col), Some(year_col), Some(value_col)) =
            (col("entity_id"), col("year"), col("value"))
        else {
            return Err(AggError::Parse(format!(
                "{}: expected columns entity_id, year, value",
                self.path.display()
            )));
        };
        let name_col = col("entity_name");
        let indicator_col = col("indicator");
        let dim_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !RESERVED.contains(&h.trim()))
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();

        let mut out = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let cell = |i: usize| record.get(i).unwrap_or("").trim();
            let entity_id = cell(id_col).to_string();
            if entity_id.is_empty() {
                return Err(AggError::Parse(format!(
                    "{}: empty entity_id on data line {}",
                    self.path.display(),
                    line + 1
                )));
            }
            let entity_name = name_col
                .map(cell)
                .filter(|n| !n.is_empty())
                .unwrap_or(&entity_id)
                .to_string();
            let dims = dim_cols
                .iter()
                .map(|(i, name)| (name.clone(), cell(*i).to_string()))
                .collect();
            out.push((
                indicator_col.map(|i| cell(i).to_string()),
                PanelRow {
                    entity_id,
                    entity_name,
                    year: parse_year(cell(year_col))?,
                    value: parse_value(cell(value_col))?,
                    dims,
                },
            ));
        }
        log::debug!("read {} rows from {}", out.len(), self.path.display());
        Ok(out)
    }
}

impl IndicatorSource for CsvIndicatorSource {
    /// Rows of `indicator` whose dims match every `filter` entry. A file without an
    /// `indicator` column is treated as holding a single indicator.
    fn load(&self, indicator: &str, filter: &BTreeMap<String, String>) -> Result<Vec<PanelRow>> {
        Ok(self
            .read()?
            .into_iter()
            .filter(|(ind, _)| ind.as_deref().is_none_or(|i| i == indicator))
            .map(|(_, row)| row)
            .filter(|row| filter.iter().all(|(k, v)| row.dims.get(k) == Some(v)))
            .collect())
    }
}

/// CSV classification table: `entity_id,continent,income_level` with an optional
/// `year` column. Rows with a year set the income level from that year on.
#[derive(Debug, Clone)]
pub struct CsvClassification {
    path: PathBuf,
}

impl CsvClassification {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The whole table, for every code in the file.
    pub fn load_table(&self) -> Result<CountryTable> {
        self.read(None)
    }

    fn read(&self, only: Option<&BTreeSet<&str>>) -> Result<CountryTable> {
        let mut rdr = csv::Reader::from_path(&self.path)?;
        let headers = rdr.headers()?.clone();
        let col = |name: &str| headers.iter().position(|h| h.trim() == name);
        let Some(id_col) = col("entity_id") else {
            return Err(AggError::Parse(format!(
                "{}: expected an entity_id column",
                self.path.display()
            )));
        };
        let continent_col = col("continent");
        let income_col = col("income_level");
        let year_col = col("year");

        let mut table = CountryTable::new();
        for record in rdr.records() {
            let record = record?;
            let cell = |i: Option<usize>| {
                i.and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };
            let Some(id) = cell(Some(id_col)) else {
                continue;
            };
            if only.is_some_and(|codes| !codes.contains(id)) {
                continue;
            }
            match cell(year_col) {
                Some(year) => {
                    if let Some(income) = cell(income_col) {
                        table.set_income_from(id, parse_year(year)?, income);
                    }
                }
                None => table.insert(id, cell(continent_col), cell(income_col)),
            }
        }
        Ok(table)
    }
}

impl ClassificationService for CsvClassification {
    fn classify_countries(&self, codes: &[String]) -> Result<CountryTable> {
        let wanted: BTreeSet<&str> = codes.iter().map(String::as_str).collect();
        let table = self.read(Some(&wanted))?;
        let unknown: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|c| !table.contains(c))
            .collect();
        if !unknown.is_empty() {
            log::warn!(
                "{} codes not in {}, they will be Unclassified: {}",
                unknown.len(),
                self.path.display(),
                unknown.join(", ")
            );
        }
        Ok(table)
    }
}

/// Leaves values untouched; for panels already on the requested basis.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNormalizer;

impl PriceNormalizer for IdentityNormalizer {
    fn normalize(&self, panel: &[PanelRow], base_year: i32) -> Result<Vec<PanelRow>> {
        log::debug!("identity normalization to base year {base_year}");
        Ok(panel.to_vec())
    }
}

/// Applies externally computed per-year conversion factors (deflator times exchange
/// rate, rebased to the base year). Years without a factor come out absent.
#[derive(Debug, Clone, Default)]
pub struct FactorNormalizer {
    base_year: i32,
    factors: BTreeMap<i32, f64>,
}

impl FactorNormalizer {
    pub fn new(base_year: i32, factors: BTreeMap<i32, f64>) -> Self {
        Self { base_year, factors }
    }

    /// Factors from a `year,factor` CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P, base_year: i32) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = csv::Reader::from_path(path)?;
        let mut factors = BTreeMap::new();
        for record in rdr.records() {
            let record = record?;
            let year = parse_year(record.get(0).unwrap_or(""))?;
            match parse_value(record.get(1).unwrap_or(""))? {
                Some(f) => {
                    factors.insert(year, f);
                }
                None => log::debug!("{}: no factor for {year}", path.display()),
            }
        }
        Ok(Self::new(base_year, factors))
    }
}

impl PriceNormalizer for FactorNormalizer {
    fn normalize(&self, panel: &[PanelRow], base_year: i32) -> Result<Vec<PanelRow>> {
        if base_year != self.base_year {
            return Err(AggError::config(format!(
                "conversion factors are based on {}, not {base_year}",
                self.base_year
            )));
        }
        Ok(panel
            .iter()
            .map(|r| PanelRow {
                value: r
                    .value
                    .zip(self.factors.get(&r.year))
                    .map(|(v, f)| v * f),
                ..r.clone()
            })
            .collect())
    }
}

/// Writes tables to a file; `.json` gets JSON, anything else CSV.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Sink for FileSink {
    fn write_table(&self, table: &CombinedTable) -> Result<()> {
        let is_json = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            storage::save_json(table, &self.path)
        } else {
            storage::save_csv(table, &self.path)
        }
    }
}

type CacheKey = (String, BTreeMap<String, String>);

/// Caller-owned memo of loaded panels, keyed by indicator and filter.
///
/// Entries live until [`PanelCache::invalidate`] or [`PanelCache::clear`]; nothing is
/// shared between caches.
pub struct PanelCache<S> {
    source: S,
    entries: AHashMap<CacheKey, Vec<PanelRow>>,
}

impl<S: IndicatorSource> PanelCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            entries: AHashMap::new(),
        }
    }

    /// Cached panel for `(indicator, filter)`, loading it on first use.
    pub fn get(&mut self, indicator: &str, filter: &BTreeMap<String, String>) -> Result<&[PanelRow]> {
        let key = (indicator.to_string(), filter.clone());
        if !self.entries.contains_key(&key) {
            let rows = self.source.load(indicator, filter)?;
            self.entries.insert(key.clone(), rows);
        }
        Ok(self.entries.get(&key).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Drop every cached entry of `indicator`; returns how many were removed.
    pub fn invalidate(&mut self, indicator: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(ind, _), _| ind != indicator);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
