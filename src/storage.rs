use crate::compose::{CombinedTable, SeriesKind};
use crate::error::Result;
use crate::gate::Decision;
use crate::models::AggregateRow;
use csv::WriterBuilder;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Prefix text cells that a spreadsheet would evaluate as a formula.
fn safe_cell(s: &str) -> Cow<'_, str> {
    if s.starts_with(['=', '+', '-', '@']) {
        Cow::Owned(format!("'{s}"))
    } else {
        Cow::Borrowed(s)
    }
}

fn opt_num(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Save a combined table as long-format CSV with header.
///
/// Columns: `year,series,kind,unit,value`, then one column per dim.
pub fn save_csv<P: AsRef<Path>>(table: &CombinedTable, path: P) -> Result<()> {
    let dims: Vec<String> = table.dim_names().into_iter().collect();
    let mut wtr = WriterBuilder::new().from_path(path)?;
    let mut header: Vec<String> = ["year", "series", "kind", "unit", "value"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(dims.iter().map(|d| safe_cell(d).into_owned()));
    wtr.write_record(&header)?;
    for r in &table.rows {
        let kind = match r.kind {
            SeriesKind::Country => "country",
            SeriesKind::Group => "group",
        };
        let mut record = vec![
            r.year.to_string(),
            safe_cell(&r.series).into_owned(),
            kind.to_string(),
            r.unit.as_str().to_string(),
            opt_num(r.value),
        ];
        record.extend(
            dims.iter()
                .map(|d| safe_cell(r.dims.get(d).map(String::as_str).unwrap_or("")).into_owned()),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save a combined table as pretty JSON.
pub fn save_json<P: AsRef<Path>>(table: &CombinedTable, path: P) -> Result<()> {
    let mut f = File::create(path)?;
    let s = serde_json::to_string_pretty(table)?;
    f.write_all(s.as_bytes())?;
    Ok(())
}

/// Float cell that keeps the decimal point on whole numbers (`1.0`, not `1`).
fn float(v: f64) -> String {
    format!("{v:?}")
}

/// Header of fixed columns followed by one column per dim.
fn header_with_dims(fixed: &[&str], dims: &[String]) -> Vec<String> {
    fixed
        .iter()
        .map(|s| s.to_string())
        .chain(dims.iter().map(|d| safe_cell(d).into_owned()))
        .collect()
}

fn dim_cells<'a>(
    dims: &'a [String],
    values: &'a BTreeMap<String, String>,
) -> impl Iterator<Item = String> + 'a {
    dims.iter()
        .map(|d| safe_cell(values.get(d).map(String::as_str).unwrap_or("")).into_owned())
}

/// Save group aggregates including their reporting and expected counts.
///
/// Columns: `group,year,value,unit,reporting_count,expected_count`, then one column per dim.
pub fn save_aggregates_csv<P: AsRef<Path>>(rows: &[AggregateRow], path: P) -> Result<()> {
    let dims: Vec<String> = rows
        .iter()
        .flat_map(|r| r.dims.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(header_with_dims(
        &[
            "group",
            "year",
            "value",
            "unit",
            "reporting_count",
            "expected_count",
        ],
        &dims,
    ))?;
    for r in rows {
        let mut record = vec![
            safe_cell(&r.group).into_owned(),
            r.year.to_string(),
            float(r.value),
            r.unit.as_str().to_string(),
            r.reporting_count.to_string(),
            float(r.expected_count),
        ];
        record.extend(dim_cells(&dims, &r.dims));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save a completeness report: one line per group-year judged by the gate.
///
/// Columns: `group,year,reporting,members,missing,missing_share,expected,accepted`,
/// then one column per dim of the grouping key.
pub fn save_report_csv<P: AsRef<Path>>(decisions: &[Decision], path: P) -> Result<()> {
    let dims: Vec<String> = decisions
        .iter()
        .flat_map(|d| d.key.dims.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(header_with_dims(
        &[
            "group",
            "year",
            "reporting",
            "members",
            "missing",
            "missing_share",
            "expected",
            "accepted",
        ],
        &dims,
    ))?;
    for d in decisions {
        let mut record = vec![
            safe_cell(&d.key.group).into_owned(),
            d.year.to_string(),
            d.reporting.to_string(),
            d.members.to_string(),
            d.missing().to_string(),
            d.missing_share().map(float).unwrap_or_default(),
            float(d.expected),
            d.accepted.to_string(),
        ];
        record.extend(dim_cells(&dims, &d.key.dims));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
