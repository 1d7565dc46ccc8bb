use anyhow::{Context, Result};
use energyload::{
    config::{PipelineConfig, SummaryFormat},
    load::{MemoryConnector, MongoConnector, StoreConnector},
    pipeline::{Orchestrator, RunSummary},
};
use std::{env, sync::Arc};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, EnvFilter};

fn print_summary(summary: &RunSummary, format: SummaryFormat) -> Result<()> {
    match format {
        SummaryFormat::Text => println!("{summary}"),
        SummaryFormat::Json => println!("{}", summary.to_json()?),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ─── 1) env & logging ────────────────────────────────────────────
    dotenvy::dotenv().ok();
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,energyload=info"));
    if let Ok(level) = env::var("LOG_LEVEL") {
        filter = filter.add_directive(level.parse().unwrap_or(LevelFilter::INFO.into()));
    }
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();
    info!("startup");

    // ─── 2) configuration ────────────────────────────────────────────
    let config = PipelineConfig::from_env().context("loading configuration")?;
    let format = config.summary_format;
    let connector: Arc<dyn StoreConnector> = if config.dry_run {
        Arc::new(MemoryConnector::default())
    } else {
        Arc::new(MongoConnector)
    };

    // ─── 3) run ──────────────────────────────────────────────────────
    match Orchestrator::new(config, connector).run().await {
        Ok(summary) => print_summary(&summary, format),
        Err(failure) => {
            if let Some(partial) = &failure.partial {
                print_summary(partial, format)?;
            }
            Err(failure.into())
        }
    }
}
