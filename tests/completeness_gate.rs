use hexp_rs::aggregate::{Aggregator, Method};
use hexp_rs::classify::FnClassifier;
use hexp_rs::config::{AggConfig, ExpectedBasis};
use hexp_rs::gate::{CompletenessGate, GroupYearCount};
use hexp_rs::{GroupKey, PanelRow};

fn all_in_one_group() -> FnClassifier<impl Fn(&str, i32) -> Option<String>> {
    FnClassifier::new("all", |_: &str, _: i32| Some("G".to_string()))
}

fn count(year: i32, reporting: usize, members: usize) -> GroupYearCount {
    GroupYearCount {
        key: GroupKey::new("G"),
        year,
        reporting,
        members,
    }
}

/// Twenty countries; each year the first `reporting[year]` of them report a value of 1.
fn twenty_countries(reporting: &[(i32, usize)]) -> Vec<PanelRow> {
    let mut rows = Vec::new();
    for &(year, n) in reporting {
        for i in 0..20 {
            let value = (i < n).then_some(1.0);
            rows.push(PanelRow::new(format!("C{i:02}"), year, value));
        }
    }
    rows
}

#[test]
fn boundary_at_95_percent_of_membership() {
    let gate = CompletenessGate::new(0.95, ExpectedBasis::Membership).unwrap();
    let out = gate
        .evaluate(&[count(2019, 19, 20), count(2020, 18, 20)])
        .unwrap();
    assert!(out[0].accepted, "19 of 20 meets 0.95 * 20");
    assert!(!out[1].accepted, "18 of 20 falls short of 19");
    assert_eq!(out[1].missing(), 2);
    assert_eq!(out[1].missing_share(), Some(10.0));
}

#[test]
fn expected_is_the_groups_mean_reporting_count() {
    let gate = CompletenessGate::new(0.95, ExpectedBasis::MeanReporting).unwrap();
    let out = gate
        .evaluate(&[count(2019, 20, 20), count(2020, 19, 20), count(2021, 18, 20)])
        .unwrap();
    // mean = 19, 0.95 * 19 = 18.05
    assert!(out.iter().all(|d| (d.expected - 19.0).abs() < 1e-12));
    let accepted: Vec<bool> = out.iter().map(|d| d.accepted).collect();
    assert_eq!(accepted, vec![true, true, false]);
}

#[test]
fn rejected_group_years_are_dropped_not_nulled() {
    let cfg = AggConfig::default().with_fill_limit(0);
    let agg = Aggregator::new(Method::Total, &cfg).unwrap();
    let panel = twenty_countries(&[(2019, 20), (2020, 19), (2021, 18)]);
    let out = agg.run(&panel, &all_in_one_group(), None).unwrap();

    let years: Vec<i32> = out.rows.iter().map(|r| r.year).collect();
    assert_eq!(years, vec![2019, 2020]);
    assert_eq!(out.rows[0].value, 20.0);
    assert_eq!(out.rows[1].value, 19.0);
    assert_eq!(out.rows[1].reporting_count, 19);
    assert_eq!(out.decisions.len(), 3);
    assert!(!out.decisions[2].accepted);
}

#[test]
fn threshold_zero_still_needs_one_reporter() {
    let gate = CompletenessGate::new(0.0, ExpectedBasis::Membership).unwrap();
    let out = gate.evaluate(&[count(2020, 0, 5)]).unwrap();
    assert!(!out[0].accepted);
}

#[test]
fn new_country_only_counts_from_its_creation_year() {
    let cfg = AggConfig::default().with_threshold(0.5);
    let agg = Aggregator::new(Method::Total, &cfg).unwrap();
    let panel = vec![
        PanelRow::new("KEN", 2010, Some(10.0)),
        PanelRow::new("KEN", 2011, Some(10.0)),
        // present in the source before South Sudan existed
        PanelRow::new("SSD", 2010, Some(5.0)),
        PanelRow::new("SSD", 2011, Some(5.0)),
    ];
    let out = agg.run(&panel, &all_in_one_group(), None).unwrap();

    assert_eq!(out.rows.len(), 2);
    assert_eq!((out.rows[0].year, out.rows[0].value), (2010, 10.0));
    assert_eq!(out.rows[0].reporting_count, 1);
    assert_eq!((out.rows[1].year, out.rows[1].value), (2011, 15.0));
    assert_eq!(out.rows[1].reporting_count, 2);
}

#[test]
fn custom_creation_years_apply_too() {
    let cfg = AggConfig::default()
        .with_threshold(0.0)
        .with_entity_start("NEW", 2021);
    let agg = Aggregator::new(Method::Total, &cfg).unwrap();
    let panel = vec![
        PanelRow::new("OLD", 2020, Some(1.0)),
        PanelRow::new("NEW", 2020, Some(100.0)),
        PanelRow::new("OLD", 2021, Some(1.0)),
        PanelRow::new("NEW", 2021, Some(100.0)),
    ];
    let rows = agg.aggregate(&panel, &all_in_one_group(), None).unwrap();
    let values: Vec<(i32, f64)> = rows.iter().map(|r| (r.year, r.value)).collect();
    assert_eq!(values, vec![(2020, 1.0), (2021, 101.0)]);
}

#[test]
fn misspelled_creation_codes_are_reported() {
    let gate = CompletenessGate::from_config(&AggConfig::default()).unwrap();
    let panel = vec![
        PanelRow::new("SSD", 2015, Some(1.0)),
        PanelRow::new("TLS", 2015, Some(1.0)),
    ];
    // Timor-Leste is keyed as TSL in the default table
    assert_eq!(gate.audit_entity_start(&panel), vec!["TSL".to_string()]);
}

#[test]
fn invalid_threshold_is_a_configuration_error() {
    assert!(CompletenessGate::new(1.5, ExpectedBasis::MeanReporting).is_err());
    assert!(Aggregator::new(Method::Total, &AggConfig::default().with_threshold(-0.1)).is_err());
}

#[test]
fn membership_basis_from_config_judges_against_group_size() {
    let cfg = AggConfig::default()
        .with_fill_limit(0)
        .with_expected_basis(ExpectedBasis::Membership);
    let agg = Aggregator::new(Method::Total, &cfg).unwrap();
    assert_eq!(agg.gate().threshold(), 0.95);
    // every year is short of the full membership of 20, so only 19 of 20 passes
    let panel = twenty_countries(&[(2019, 19), (2020, 18)]);
    let out = agg.run(&panel, &all_in_one_group(), None).unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].year, 2019);
    assert_eq!(out.rows[0].expected_count, 20.0);
}

#[test]
fn years_without_reporters_do_not_lower_the_expected_count() {
    // H reports every year 2000-2010, which puts all those years on G's grid too
    let mut panel: Vec<PanelRow> = (2000..=2010)
        .map(|y| PanelRow::new("H00", y, Some(1.0)))
        .collect();
    for i in 0..20 {
        panel.push(PanelRow::new(format!("C{i:02}"), 2010, Some(1.0)));
    }
    for i in 0..3 {
        panel.push(PanelRow::new(format!("C{i:02}"), 2005, Some(1.0)));
    }
    let split = FnClassifier::new("split", |id: &str, _: i32| {
        Some(if id.starts_with('H') { "H" } else { "G" }.to_string())
    });
    let agg = Aggregator::new(Method::Total, &AggConfig::default()).unwrap();
    let out = agg.run(&panel, &split, None).unwrap();

    // G has 3 reporters in 2005-2007 (two of them forward-filled) and 20 in 2010:
    // expected = (3 + 3 + 3 + 20) / 4 = 7.25, and 3 < 0.95 * 7.25
    let g: Vec<_> = out.decisions.iter().filter(|d| d.key.group == "G").collect();
    assert_eq!(g.len(), 11);
    assert!(g.iter().all(|d| d.expected == 7.25));
    let published: Vec<i32> = out
        .rows
        .iter()
        .filter(|r| r.group == "G")
        .map(|r| r.year)
        .collect();
    assert_eq!(published, vec![2010]);
    assert_eq!(out.rows.iter().filter(|r| r.group == "H").count(), 11);
}

#[test]
fn group_without_any_reporter_is_rejected_everywhere() {
    let gate = CompletenessGate::new(0.0, ExpectedBasis::MeanReporting).unwrap();
    let out = gate.evaluate(&[count(2019, 0, 4), count(2020, 0, 4)]).unwrap();
    assert!(out.iter().all(|d| !d.accepted && d.expected == 0.0));
}
