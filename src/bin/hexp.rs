use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hexp_rs::classify::{self, Taxonomy, TaxonomyClassifier};
use hexp_rs::compose::UnclassifiedPolicy;
use hexp_rs::config::DEFAULT_INTERPOLATE_LIMIT;
use hexp_rs::models::{BILLION, MILLION, scale_values};
use hexp_rs::sources::{
    ClassificationService, CsvClassification, CsvIndicatorSource, FactorNormalizer,
    IdentityNormalizer, IndicatorSource, PriceNormalizer,
};
use hexp_rs::{AggConfig, GroupComposer, Method, PanelRow};
use hexp_rs::{stats, storage};
use num_format::{Locale, ToFormattedString};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "hexp",
    version,
    about = "Aggregate country health-expenditure panels into income and regional groups"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate a panel into groups and merge with the country series.
    Aggregate(AggregateArgs),
}

#[derive(ValueEnum, Clone, Debug)]
enum OutFormat {
    Csv,
    Json,
}

/// Unit the panel values are reported in.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scale {
    Units,
    Millions,
    Billions,
}

#[derive(Args, Debug)]
struct AggregateArgs {
    /// Tidy CSV panel (entity_id, year, value, optional entity_name/indicator/dims)
    #[arg(short, long)]
    panel: PathBuf,
    /// Indicator code to select from the panel file (default: every row)
    #[arg(short, long)]
    indicator: Option<String>,
    /// Attribute filters KEY=VALUE separated by comma (e.g., units=national currency unit)
    #[arg(long)]
    filter: Option<String>,
    /// Unit of the panel values; converted to units before aggregation.
    #[arg(long, value_enum, default_value_t = Scale::Units)]
    scale: Scale,
    /// Conversion factors CSV (year,factor) to constant prices of the config's base year
    #[arg(long)]
    factors: Option<PathBuf>,
    /// Classification CSV (entity_id, continent, income_level, optional year)
    #[arg(short, long)]
    classes: PathBuf,
    /// Denominator panel CSV (population, GDP, ...), required for ratio methods
    #[arg(long)]
    denominator: Option<PathBuf>,
    /// total, median, per-capita or percent
    #[arg(short, long, default_value = "total")]
    method: String,
    /// Groups separated by comma: income_level, continent, africa, africa-low-lower-middle
    #[arg(short, long, default_value = "income_level")]
    groups: String,
    /// Extra dimensions kept in the grouping key, separated by comma (e.g., source)
    #[arg(long)]
    by: Option<String>,
    /// JSON config file; command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Completeness threshold in [0, 1] (default 0.95).
    #[arg(long)]
    threshold: Option<f64>,
    /// Forward-fill horizon in years (default 2).
    #[arg(long)]
    fill_limit: Option<i32>,
    /// Interpolate up to N years into interior gaps from each end before filling (median default: 3).
    #[arg(long)]
    interpolate: Option<i32>,
    /// Aggregate unclassified countries into their own group instead of leaving them out.
    #[arg(long, default_value_t = false)]
    keep_unclassified: bool,
    /// Save the combined table to file (format inferred by --format or extension).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Output format (csv or json). If omitted, inferred from --out extension.
    #[arg(long, value_enum)]
    format: Option<OutFormat>,
    /// Write the completeness report (CSV) to this path.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Print per-series statistics to stdout.
    #[arg(long, default_value_t = false)]
    stats: bool,
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() && x.abs() >= 1_000_000.0 => {
            (x.round() as i64).to_formatted_string(&Locale::en)
        }
        Some(x) if x.is_finite() => {
            // Format up to 3 decimals, then trim trailing zeros and trailing dot.
            let s = format!("{:.3}", x);
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        _ => "NA".to_string(),
    }
}

fn parse_list(s: &str) -> Vec<String> {
    s.split([',', ';'])
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

fn parse_filter(s: &str) -> Result<BTreeMap<String, String>> {
    parse_list(s)
        .into_iter()
        .map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow::anyhow!("invalid --filter entry '{kv}', expected KEY=VALUE"))
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Aggregate(args) => cmd_aggregate(args),
    }
}

fn load_panel(path: &Path, indicator: Option<&str>, filter: &BTreeMap<String, String>) -> Result<Vec<PanelRow>> {
    let source = CsvIndicatorSource::new(path);
    let rows = match indicator {
        Some(ind) => source.load(ind, filter)?,
        None if filter.is_empty() => source.load_all()?,
        None => source
            .load_all()?
            .into_iter()
            .filter(|r| filter.iter().all(|(k, v)| r.dims.get(k) == Some(v)))
            .collect(),
    };
    Ok(rows)
}

fn cmd_aggregate(args: AggregateArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(p) => AggConfig::from_json_file(p)
            .with_context(|| format!("reading config {}", p.display()))?,
        None => AggConfig::default(),
    };
    if let Some(t) = args.threshold {
        config.threshold = t;
    }
    if let Some(n) = args.fill_limit {
        config.fill_limit = n;
    }
    config.validate()?;

    let filter = match &args.filter {
        Some(f) => parse_filter(f)?,
        None => BTreeMap::new(),
    };
    let panel = load_panel(&args.panel, args.indicator.as_deref(), &filter)
        .with_context(|| format!("reading panel {}", args.panel.display()))?;
    let panel = match args.scale {
        Scale::Units => panel,
        Scale::Millions => scale_values(&panel, MILLION),
        Scale::Billions => scale_values(&panel, BILLION),
    };
    let normalizer: Box<dyn PriceNormalizer> = match &args.factors {
        Some(p) => Box::new(
            FactorNormalizer::from_csv(p, config.base_year)
                .with_context(|| format!("reading factors {}", p.display()))?,
        ),
        None => Box::new(IdentityNormalizer),
    };
    let panel = normalizer.normalize(&panel, config.base_year)?;

    let method: Method = args.method.parse()?;
    let denominators = match &args.denominator {
        Some(p) => Some(
            CsvIndicatorSource::new(p)
                .load_all()
                .with_context(|| format!("reading denominator {}", p.display()))?,
        ),
        None => None,
    };
    if method.needs_denominator() && denominators.is_none() {
        bail!("method '{}' needs a --denominator panel", args.method);
    }

    let codes: Vec<String> = panel
        .iter()
        .map(|r| r.entity_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let table = Arc::new(CsvClassification::new(&args.classes).classify_countries(&codes)?);

    let mut composer = GroupComposer::new(method, config)?;
    for group in parse_list(&args.groups) {
        composer = match group.to_ascii_lowercase().as_str() {
            "africa" => composer.group(classify::africa(table.clone())),
            "africa-low-lower-middle" => {
                composer.group(classify::africa_low_lower_middle(table.clone()))
            }
            other => composer.group(TaxonomyClassifier::new(
                table.clone(),
                other.parse::<Taxonomy>()?,
            )),
        };
    }
    if let Some(by) = &args.by {
        composer = composer.by(&parse_list(by));
    }
    let interpolate = args
        .interpolate
        .or((method == Method::Median).then_some(DEFAULT_INTERPOLATE_LIMIT));
    if let Some(limit) = interpolate {
        composer = composer.interpolate(limit);
    }
    if args.keep_unclassified {
        composer = composer.unclassified(UnclassifiedPolicy::Keep);
    }

    let (combined, decisions) = composer.compose_with_report(&panel, denominators.as_deref())?;

    if let Some(path) = args.report.as_ref() {
        storage::save_report_csv(&decisions, path)?;
        eprintln!("Wrote completeness report to {}", path.display());
    }

    if let Some(path) = args.out.as_ref() {
        let fmt = match args.format {
            Some(OutFormat::Csv) => "csv",
            Some(OutFormat::Json) => "json",
            None => path.extension().and_then(|e| e.to_str()).unwrap_or("csv"),
        }
        .to_ascii_lowercase();
        match fmt.as_str() {
            "csv" => storage::save_csv(&combined, path)?,
            "json" => storage::save_json(&combined, path)?,
            other => bail!("unsupported format: {}", other),
        }
        eprintln!("Saved {} rows to {}", combined.rows.len(), path.display());
    }

    if args.stats || args.out.is_none() {
        for s in stats::series_summary(&combined) {
            let latest = s
                .latest
                .map(|(y, v)| format!("{y}: {}", fmt_opt(Some(v))))
                .unwrap_or_else(|| "NA".to_string());
            println!(
                "{}  count={} missing={}  min={} max={} median={}  latest={}",
                s.series,
                s.count,
                s.missing,
                fmt_opt(s.min),
                fmt_opt(s.max),
                fmt_opt(s.median),
                latest
            );
        }
    }

    Ok(())
}
