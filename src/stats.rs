use crate::compose::{CombinedTable, SeriesKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary statistics for one series of a combined table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub series: String,
    pub kind: SeriesKind,
    pub count: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Most recent year with a value, and that value.
    pub latest: Option<(i32, f64)>,
}

/// Median of `values`; sorts the slice in place. `None` when empty.
pub fn median(values: &mut [f64]) -> Option<f64> {
    values.sort_by(|a, b| a.total_cmp(b));
    let count = values.len();
    if count == 0 {
        None
    } else if count % 2 == 1 {
        Some(values[count / 2])
    } else {
        Some((values[count / 2 - 1] + values[count / 2]) / 2.0)
    }
}

/// Compute per-series statistics, in the table's series order.
pub fn series_summary(table: &CombinedTable) -> Vec<Summary> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut missing: BTreeMap<&str, usize> = BTreeMap::new();
    let mut latest: BTreeMap<&str, (i32, f64)> = BTreeMap::new();
    let mut kinds: BTreeMap<&str, SeriesKind> = BTreeMap::new();
    for r in &table.rows {
        kinds.entry(r.series.as_str()).or_insert(r.kind);
        match r.value {
            Some(v) => {
                groups.entry(r.series.as_str()).or_default().push(v);
                let slot = latest.entry(r.series.as_str()).or_insert((r.year, v));
                if r.year >= slot.0 {
                    *slot = (r.year, v);
                }
            }
            None => *missing.entry(r.series.as_str()).or_default() += 1,
        }
    }

    let mut out = Vec::new();
    for series in &table.series_order {
        let key = series.as_str();
        let Some(&kind) = kinds.get(key) else {
            continue;
        };
        let mut vals = groups.remove(key).unwrap_or_default();
        let median = median(&mut vals);
        let count = vals.len();
        let min = vals.first().cloned();
        let max = vals.last().cloned();
        let mean = if count > 0 {
            Some(vals.iter().copied().sum::<f64>() / count as f64)
        } else {
            None
        };
        let miss = missing.get(key).cloned().unwrap_or(0);
        out.push(Summary {
            series: series.clone(),
            kind,
            count,
            missing: miss,
            min,
            max,
            mean,
            median,
            latest: latest.get(key).copied(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}
