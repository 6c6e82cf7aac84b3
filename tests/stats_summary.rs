use std::sync::Arc;

use hexp_rs::classify::{Taxonomy, TaxonomyClassifier};
use hexp_rs::compose::SeriesKind;
use hexp_rs::stats::series_summary;
use hexp_rs::{AggConfig, CountryTable, GroupComposer, Method, PanelRow};

#[test]
fn summary_per_series_handles_missing_and_latest() {
    // AAA: [1, 2, 3, 4] -> median 2.5; BBB: [10, None, 30] -> one missing, median 20
    let table = Arc::new(
        CountryTable::new()
            .with("AAA", "Africa", "Low income")
            .with("BBB", "Europe", "High income"),
    );
    let panel = vec![
        PanelRow::new("AAA", 2018, Some(1.0)),
        PanelRow::new("AAA", 2019, Some(2.0)),
        PanelRow::new("AAA", 2020, Some(3.0)),
        PanelRow::new("AAA", 2021, Some(4.0)),
        PanelRow::new("BBB", 2018, Some(10.0)),
        PanelRow::new("BBB", 2019, None),
        PanelRow::new("BBB", 2020, Some(30.0)),
    ];
    let combined = GroupComposer::new(Method::Total, AggConfig::default().with_fill_limit(0))
        .unwrap()
        .group(TaxonomyClassifier::new(table, Taxonomy::Continent))
        .compose(&panel, None)
        .unwrap();
    let got = series_summary(&combined);

    let names: Vec<&str> = got.iter().map(|s| s.series.as_str()).collect();
    assert_eq!(names, combined.series_order);

    let aaa = got.iter().find(|s| s.series == "AAA").unwrap();
    assert_eq!(aaa.kind, SeriesKind::Country);
    assert_eq!(aaa.count, 4);
    assert_eq!(aaa.missing, 0);
    assert_eq!(aaa.median, Some(2.5));
    assert_eq!(aaa.mean, Some(2.5));
    assert_eq!(aaa.latest, Some((2021, 4.0)));

    let bbb = got.iter().find(|s| s.series == "BBB").unwrap();
    assert_eq!(bbb.count, 2);
    assert_eq!(bbb.missing, 1);
    assert_eq!(bbb.min, Some(10.0));
    assert_eq!(bbb.max, Some(30.0));
    assert_eq!(bbb.median, Some(20.0));
    assert_eq!(bbb.latest, Some((2020, 30.0)));

    let africa = got.iter().find(|s| s.series == "Africa").unwrap();
    assert_eq!(africa.kind, SeriesKind::Group);
    assert_eq!(africa.count, 4);
}
