//! Bounded gap filling for per-entity time series.
//!
//! A *series* is one entity plus its extra dimensions ([`SeriesKey`]). All functions
//! here are pure: they return a new panel sorted by `(entity_id, dims, year)` and
//! never look across series boundaries.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{PanelRow, SeriesKey};

fn split_series(panel: &[PanelRow]) -> BTreeMap<SeriesKey, Vec<PanelRow>> {
    let mut series: BTreeMap<SeriesKey, Vec<PanelRow>> = BTreeMap::new();
    for row in panel {
        series.entry(row.series_key()).or_default().push(row.clone());
    }
    for rows in series.values_mut() {
        // stable: duplicates keep their input order
        rows.sort_by_key(|r| r.year);
    }
    series
}

/// Reindex every series onto the full set of years present anywhere in the panel,
/// inserting absent-valued rows for the years a series lacks.
///
/// Without this step a missing year is simply not a row, and gap filling has nothing
/// to fill. When a series holds duplicate rows for one year the first reported value wins.
pub fn expand_grid(panel: &[PanelRow]) -> Vec<PanelRow> {
    let years: BTreeSet<i32> = panel.iter().map(|r| r.year).collect();
    let mut out = Vec::with_capacity(panel.len());
    for (key, rows) in split_series(panel) {
        let name = rows
            .first()
            .map(|r| r.entity_name.clone())
            .unwrap_or_else(|| key.entity_id.clone());
        let mut by_year: BTreeMap<i32, Option<f64>> = BTreeMap::new();
        for r in &rows {
            let slot = by_year.entry(r.year).or_insert(None);
            if slot.is_none() {
                *slot = r.value;
            }
        }
        for &year in &years {
            out.push(PanelRow {
                entity_id: key.entity_id.clone(),
                entity_name: name.clone(),
                year,
                value: by_year.get(&year).copied().flatten(),
                dims: key.dims.clone(),
            });
        }
    }
    out
}

/// Forward-fill absent values from the most recent earlier value of the same series,
/// as long as that value is at most `limit` years old.
///
/// Years before a series' first reported value are never filled. With the default
/// limit of 2, values reported in 2015 fill 2016 and 2017 but not 2018.
pub fn fill_gaps(panel: &[PanelRow], limit: i32) -> Vec<PanelRow> {
    let mut out = Vec::with_capacity(panel.len());
    for (_, rows) in split_series(panel) {
        let mut last: Option<(i32, f64)> = None;
        for mut row in rows {
            match row.value {
                Some(v) => last = Some((row.year, v)),
                None => {
                    if let Some((seen, v)) = last {
                        if row.year - seen <= limit {
                            row.value = Some(v);
                        }
                    }
                }
            }
            out.push(row);
        }
    }
    log::debug!(
        "gap fill (limit {limit}): {} rows, {} absent after fill",
        out.len(),
        out.iter().filter(|r| r.value.is_none()).count()
    );
    out
}

/// Linearly interpolate absent values inside a series, reaching at most `limit` years
/// into a gap from each of its two reported ends.
///
/// A gap of up to `2 * limit` years is filled completely; in a longer one the middle
/// years stay absent. Nothing is extrapolated past either end of a series.
pub fn interpolate_gaps(panel: &[PanelRow], limit: i32) -> Vec<PanelRow> {
    let mut out = Vec::with_capacity(panel.len());
    for (_, mut rows) in split_series(panel) {
        let known: Vec<(i32, f64)> = rows
            .iter()
            .filter_map(|r| r.value.map(|v| (r.year, v)))
            .collect();
        for pair in known.windows(2) {
            let (y0, v0) = pair[0];
            let (y1, v1) = pair[1];
            if y1 - y0 < 2 {
                continue;
            }
            for row in rows.iter_mut() {
                let reachable = row.year - y0 <= limit || y1 - row.year <= limit;
                if row.value.is_none() && row.year > y0 && row.year < y1 && reachable {
                    let t = f64::from(row.year - y0) / f64::from(y1 - y0);
                    row.value = Some(v0 + (v1 - v0) * t);
                }
            }
        }
        out.extend(rows);
    }
    out
}
