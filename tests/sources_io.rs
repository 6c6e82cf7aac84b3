use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;

use hexp_rs::classify::Taxonomy;
use hexp_rs::config::{AggConfig, ExpectedBasis};
use hexp_rs::gate::CompletenessGate;
use hexp_rs::sources::{
    ClassificationService, CsvClassification, CsvIndicatorSource, IndicatorSource, PanelCache,
};
use hexp_rs::{AggError, PanelRow, Result};
use tempfile::tempdir;

const PANEL: &str = "\
entity_id,entity_name,indicator,year,value,source
KEN,Kenya,CHE,2019,100,public
KEN,Kenya,CHE,2020,NA,public
KEN,Kenya,CHE,2020,40,private
MOZ,Mozambique,CHE,2020-01-01,20,public
KEN,Kenya,POP,2020,50,public
";

#[test]
fn tidy_csv_loads_by_indicator_and_filter() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("panel.csv");
    fs::write(&path, PANEL).unwrap();
    let source = CsvIndicatorSource::new(&path);

    let filter = BTreeMap::from([("source".to_string(), "public".to_string())]);
    let rows = source.load("CHE", &filter).unwrap();
    let got: Vec<(&str, i32, Option<f64>)> = rows
        .iter()
        .map(|r| (r.entity_id.as_str(), r.year, r.value))
        .collect();
    assert_eq!(
        got,
        vec![
            ("KEN", 2019, Some(100.0)),
            ("KEN", 2020, None),
            ("MOZ", 2020, Some(20.0)),
        ]
    );
    assert_eq!(rows[0].entity_name, "Kenya");
    assert_eq!(rows[0].dims["source"], "public");

    assert_eq!(source.load("CHE", &BTreeMap::new()).unwrap().len(), 4);
    assert_eq!(source.load_all().unwrap().len(), 5);
}

#[test]
fn missing_required_column_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    fs::write(&path, "country,year,value\nKEN,2020,1\n").unwrap();
    let err = CsvIndicatorSource::new(&path).load_all().unwrap_err();
    assert!(matches!(err, AggError::Parse(_)));
}

#[test]
fn classification_csv_with_yearly_income_overrides() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("classes.csv");
    fs::write(
        &path,
        "\
entity_id,continent,income_level,year
GHA,Africa,Low income,
GHA,,Lower middle income,2011
DEU,Europe,High income,
",
    )
    .unwrap();

    let service = CsvClassification::new(&path);
    let table = service
        .classify_countries(&["GHA".to_string(), "XXX".to_string()])
        .unwrap();
    assert!(table.contains("GHA"));
    assert!(!table.contains("DEU"));
    assert_eq!(table.label("GHA", 2010, Taxonomy::IncomeLevel), "Low income");
    assert_eq!(
        table.label("GHA", 2011, Taxonomy::IncomeLevel),
        "Lower middle income"
    );
    assert_eq!(table.label("XXX", 2011, Taxonomy::Continent), "Unclassified");

    assert_eq!(service.load_table().unwrap().len(), 2);
}

struct CountingSource {
    loads: Cell<usize>,
}

impl IndicatorSource for CountingSource {
    fn load(&self, indicator: &str, _filter: &BTreeMap<String, String>) -> Result<Vec<PanelRow>> {
        self.loads.set(self.loads.get() + 1);
        Ok(vec![PanelRow::new(indicator, 2020, Some(1.0))])
    }
}

#[test]
fn panel_cache_loads_once_until_invalidated() {
    let mut cache = PanelCache::new(CountingSource {
        loads: Cell::new(0),
    });
    let none = BTreeMap::new();
    let public = BTreeMap::from([("source".to_string(), "public".to_string())]);

    assert_eq!(cache.get("CHE", &none).unwrap().len(), 1);
    cache.get("CHE", &none).unwrap();
    cache.get("CHE", &public).unwrap();
    cache.get("POP", &none).unwrap();
    assert_eq!(cache.len(), 3);

    assert_eq!(cache.invalidate("CHE"), 2);
    assert_eq!(cache.len(), 1);
    cache.get("CHE", &none).unwrap();

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn cache_serves_repeat_requests_from_memory() {
    let source = CountingSource {
        loads: Cell::new(0),
    };
    let mut cache = PanelCache::new(&source);
    let none = BTreeMap::new();
    for _ in 0..3 {
        cache.get("CHE", &none).unwrap();
    }
    drop(cache);
    assert_eq!(source.loads.get(), 1);
}

#[test]
fn config_file_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"threshold": 0.9, "fill_limit": 3, "expected_basis": "membership",
            "exclude": ["VEN"], "entity_start": {"SSD": 2011, "TLS": 2002}}"#,
    )
    .unwrap();
    let cfg = AggConfig::from_json_file(&path).unwrap();
    assert_eq!(cfg.threshold, 0.9);
    assert_eq!(cfg.fill_limit, 3);
    assert_eq!(cfg.expected_basis, ExpectedBasis::Membership);
    assert_eq!(cfg.exclude, vec!["VEN".to_string()]);
    let gate = CompletenessGate::from_config(&cfg).unwrap();
    assert!(!gate.counts("TLS", 2001));
    assert!(gate.counts("TLS", 2002));

    fs::write(&path, r#"{"threshold": 2.0}"#).unwrap();
    assert!(matches!(
        AggConfig::from_json_file(&path),
        Err(AggError::Configuration(_))
    ));
}
