//! Read every stored document back and report data quality per metric.
use anyhow::{Context, Result};
use energyload::{
    config::{PipelineConfig, SummaryFormat},
    load::{bounded, close_bounded, connect_bounded, DocumentStore, MongoConnector, StoreTarget},
    schema::CanonicalDocument,
    validate::{Candidate, ValidationReport, Validator},
};
use serde::Serialize;
use std::{collections::BTreeMap, env};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Serialize)]
struct MetricQuality {
    /// Most recent year any country has a value for.
    latest_year: Option<u16>,
    #[serde(flatten)]
    report: ValidationReport,
}

async fn check(store: &dyn DocumentStore, config: &PipelineConfig) -> Result<Vec<MetricQuality>> {
    let docs = bounded(config.timeout, store.find_all())
        .await
        .context("reading stored documents")?;
    info!(documents = docs.len(), "read stored documents");

    let mut by_metric: BTreeMap<String, Vec<CanonicalDocument>> = BTreeMap::new();
    for doc in docs {
        by_metric.entry(doc.metric.clone()).or_default().push(doc);
    }

    let validator = Validator::new(&config.catalog.countries);
    let reports = by_metric
        .into_iter()
        .map(|(metric, docs)| {
            let latest_year = docs.iter().filter_map(|d| d.latest()).map(|(y, _)| y).max();
            let candidates = docs
                .into_iter()
                .enumerate()
                .map(|(i, document)| Candidate { row: i + 1, document })
                .collect();
            let (_, report) = validator.validate(&metric, candidates);
            MetricQuality {
                latest_year,
                report,
            }
        })
        .collect();
    Ok(reports)
}

fn print_text(results: &[MetricQuality]) {
    for MetricQuality {
        latest_year,
        report: r,
    } in results
    {
        println!("[{}]", r.metric);
        if let Some(year) = latest_year {
            println!("  latest year with data: {year}");
        }
        println!(
            "  documents {}, valid {}, invalid {}",
            r.examined,
            r.accepted,
            r.rejected.len()
        );
        println!(
            "  completeness {:.2}% ({} of {} year values)",
            r.completeness, r.tally.filled, r.tally.slots
        );
        for (year, cov) in &r.year_coverage {
            println!("    {year}: {}/{}", cov.available, cov.total);
        }
        if !r.missing_countries.is_empty() {
            println!("  missing countries: {}", r.missing_countries.join(", "));
        }
        for rejection in &r.rejected {
            let reasons: Vec<String> = rejection.reasons.iter().map(|x| x.to_string()).collect();
            println!("  invalid {}: {}", rejection.key, reasons.join("; "));
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,quality_check=info"));
    if let Ok(level) = env::var("LOG_LEVEL") {
        filter = filter.add_directive(level.parse().unwrap_or(LevelFilter::INFO.into()));
    }
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::from_env().context("loading configuration")?;
    let target = StoreTarget {
        uri: config
            .connection_string
            .clone()
            .context("MONGO_URI is required for the quality check")?,
        database: config.database.clone(),
        collection: config.collection.clone(),
        timeout: config.timeout,
    };

    let store = connect_bounded(&MongoConnector, &target).await?;
    let result = check(store.as_ref(), &config).await;
    close_bounded(store.as_ref(), config.timeout).await;
    let reports = result?;

    match config.summary_format {
        SummaryFormat::Text => print_text(&reports),
        SummaryFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }
    Ok(())
}
