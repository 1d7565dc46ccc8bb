// src/pipeline/mod.rs
//! Runs discovery, mapping, validation and loading in order and reports on
//! the run as a whole.

pub mod summary;

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::discover::locate_input;
use crate::errors::PipelineError;
use crate::load::{
    bounded, close_bounded, connect_bounded, DocumentStore, Loader, StoreConnector, StoreTarget,
};
use crate::process::read_source;
use crate::schema::{map_record, CanonicalDocument};
use crate::validate::{Candidate, Completeness, Validator};

pub use summary::{LoadOutcome, MetricSummary, RunFailure, RunSummary};

pub struct Orchestrator {
    config: PipelineConfig,
    connector: Arc<dyn StoreConnector>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self { config, connector }
    }

    fn target(&self) -> StoreTarget {
        StoreTarget {
            uri: self.config.connection_string.clone().unwrap_or_default(),
            database: self.config.database.clone(),
            collection: self.config.collection.clone(),
            timeout: self.config.timeout,
        }
    }

    fn fail(&self, error: PipelineError, partial: Option<RunSummary>, start: Instant) -> RunFailure {
        let partial = partial.map(|mut s| {
            s.elapsed_secs = start.elapsed().as_secs_f64();
            s
        });
        error!(stage = %error.stage(), error = %error, "run failed");
        RunFailure::new(error, partial)
    }

    /// Process the input file end to end.
    ///
    /// Nothing touches the store until every metric has been validated and
    /// the completeness gate has passed. Once a store handle exists it is
    /// closed before returning, whatever the outcome.
    #[tracing::instrument(level = "info", skip(self), fields(dry_run = self.config.dry_run))]
    pub async fn run(&self) -> Result<RunSummary, RunFailure> {
        let started_at = Utc::now();
        let start = Instant::now();
        let catalog = &self.config.catalog;
        let layout = &catalog.columns;

        // ─── 1) discovery ────────────────────────────────────────────────
        let input = locate_input(
            self.config.input_path.as_deref(),
            &self.config.search_dir,
            layout,
        )
        .map_err(|e| self.fail(e.into(), None, start))?;
        let table = read_source(&input, layout).map_err(|e| self.fail(e.into(), None, start))?;

        let mut summary = RunSummary::new(
            started_at,
            input.clone(),
            table.records.len(),
            self.config.dry_run,
        );

        // ─── 2) map & validate per metric ────────────────────────────────
        let validator = Validator::new(&catalog.countries);
        let mut batches: Vec<Vec<CanonicalDocument>> = Vec::new();
        for metric in &catalog.metrics {
            let candidates: Vec<Candidate> = table
                .records
                .iter()
                .filter(|r| metric.selects(r.indicator.as_deref()))
                .map(|r| Candidate {
                    row: r.row,
                    document: map_record(r, metric, layout),
                })
                .collect();
            if candidates.is_empty() {
                info!(metric = %metric.metric, "no rows for metric");
                continue;
            }

            let matched_rows = candidates.len();
            let (accepted, report) = validator.validate(&metric.metric, candidates);
            summary.metrics.push(MetricSummary {
                metric: metric.metric.clone(),
                matched_rows,
                validation: report,
                load: None,
            });
            batches.push(accepted);
        }

        if summary.metrics.is_empty() {
            return Err(self.fail(PipelineError::NothingToLoad(input), Some(summary), start));
        }

        let overall: Completeness = summary.metrics.iter().map(|m| m.validation.tally).sum();
        summary.completeness = overall.percentage();
        info!(
            completeness = summary.completeness,
            accepted = summary.accepted(),
            rejected = summary.rejected(),
            "validation complete"
        );

        if summary.completeness < self.config.min_completeness {
            let err = PipelineError::CompletenessGate {
                actual: summary.completeness,
                minimum: self.config.min_completeness,
            };
            return Err(self.fail(err, Some(summary), start));
        }

        // ─── 3) connect & load ───────────────────────────────────────────
        let target = self.target();
        let store = match connect_bounded(self.connector.as_ref(), &target).await {
            Ok(store) => store,
            Err(err) => {
                summary.load_outcome = LoadOutcome::Failed;
                return Err(self.fail(err.into(), Some(summary), start));
            }
        };

        let loaded = self.load(store.as_ref(), &batches, &mut summary).await;
        close_bounded(store.as_ref(), self.config.timeout).await;
        if let Err(err) = loaded {
            summary.load_outcome = LoadOutcome::Failed;
            return Err(self.fail(err, Some(summary), start));
        }

        summary.elapsed_secs = start.elapsed().as_secs_f64();
        info!(
            inserted = summary.inserted(),
            updated = summary.updated(),
            failed = summary.write_failures(),
            stored = ?summary.stored_documents,
            elapsed = ?start.elapsed(),
            "run complete"
        );
        Ok(summary)
    }

    async fn load(
        &self,
        store: &dyn DocumentStore,
        batches: &[Vec<CanonicalDocument>],
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let limit = self.config.timeout;
        bounded(limit, store.ensure_indexes())
            .await
            .map_err(PipelineError::Index)?;

        let loader = Loader::new(store, limit);
        for (metric, docs) in summary.metrics.iter_mut().zip(batches) {
            metric.load = Some(loader.load(docs).await);
        }
        summary.load_outcome = if summary.write_failures() == 0 {
            LoadOutcome::Completed
        } else {
            LoadOutcome::CompletedWithFailures
        };

        // read-back is informational; a failure here does not fail the run
        match bounded(limit, store.count()).await {
            Ok(total) => summary.stored_documents = Some(total),
            Err(err) => warn!(error = %err, "could not count stored documents"),
        }
        match bounded(limit, store.count_by_metric()).await {
            Ok(counts) => summary.stored_by_metric = counts,
            Err(err) => warn!(error = %err, "could not count stored documents per metric"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConnectError, DiscoveryError, Stage, StoreError};
    use crate::load::{MemoryConnector, MemoryStore, UpsertOutcome};
    use crate::schema::NaturalKey;
    use async_trait::async_trait;
    use std::{collections::BTreeMap, fs, time::Duration};
    use tempfile::{tempdir, TempDir};

    const ELECTRICITY: &str = "Population access to electricity-National (% of population)";
    const INTENSITY: &str = "Energy intensity level of primary energy (MJ/2017 PPP GDP)";

    /// A CSV with every year column from 2000 to 2022; unlisted cells are blank.
    fn portal_csv(rows: &[(&str, &str, &[(u16, &str)])]) -> String {
        let mut out = String::from("Country,Indicator,Unit,Sector,Sub-Sector,Sub-Sub-Sector");
        for year in 2000..=2022 {
            out.push_str(&format!(",{year}"));
        }
        out.push('\n');
        for (country, indicator, cells) in rows {
            out.push_str(&format!("{country},\"{indicator}\",%,Power,Access,National"));
            for year in 2000..=2022u16 {
                let cell = cells
                    .iter()
                    .find(|(y, _)| *y == year)
                    .map(|(_, c)| *c)
                    .unwrap_or("");
                out.push(',');
                out.push_str(cell);
            }
            out.push('\n');
        }
        out
    }

    fn kenya_csv(latest: &str) -> String {
        portal_csv(&[(
            "Kenya",
            ELECTRICITY,
            &[(2000, "15.0"), (2001, ""), (2022, latest)],
        )])
    }

    fn setup(csv: &str) -> (TempDir, PipelineConfig) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("energy.csv");
        fs::write(&path, csv).unwrap();
        let mut config = PipelineConfig::new("mongodb://localhost:27017");
        config.input_path = Some(path);
        config.search_dir = dir.path().to_path_buf();
        (dir, config)
    }

    fn orchestrator(config: PipelineConfig, connector: &Arc<MemoryConnector>) -> Orchestrator {
        Orchestrator::new(config, connector.clone())
    }

    #[tokio::test]
    async fn kenya_is_stored_then_updated_in_place() {
        let (dir, config) = setup(&kenya_csv("75.0"));
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));
        let key = NaturalKey::new("Kenya", "Electricity Access Rate");

        let summary = orchestrator(config.clone(), &connector).run().await.unwrap();
        assert_eq!(summary.rows_read, 1);
        assert_eq!(summary.metrics.len(), 1);
        assert_eq!(summary.inserted(), 1);
        assert_eq!(summary.load_outcome, LoadOutcome::Completed);
        assert_eq!(summary.stored_documents, Some(1));

        let stored = connector.store().get(&key).unwrap();
        assert_eq!(stored.value(2000), Some(15.0));
        assert_eq!(stored.years.get(&2001), Some(&None));
        assert_eq!(stored.value(2022), Some(75.0));
        assert_eq!(stored.country_serial, 1);
        assert_eq!(stored.sector, "Power");

        fs::write(dir.path().join("energy.csv"), kenya_csv("76.0")).unwrap();
        let summary = orchestrator(config, &connector).run().await.unwrap();
        assert_eq!((summary.inserted(), summary.updated()), (0, 1));
        assert_eq!(summary.stored_documents, Some(1));
        assert_eq!(connector.store().get(&key).unwrap().value(2022), Some(76.0));
        assert_eq!(connector.store().closes(), 2);
        assert!(connector.store().has_unique_index());
    }

    #[tokio::test]
    async fn rerunning_identical_input_adds_nothing() {
        let csv = portal_csv(&[
            ("Kenya", ELECTRICITY, &[(2000, "15.0"), (2022, "75.0")]),
            ("Ghana", ELECTRICITY, &[(2000, "45.0")]),
            ("Kenya", INTENSITY, &[(2000, "8.1"), (2010, "7.0")]),
        ]);
        let (_dir, config) = setup(&csv);
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));

        let first = orchestrator(config.clone(), &connector).run().await.unwrap();
        let second = orchestrator(config, &connector).run().await.unwrap();

        assert_eq!(first.inserted(), 3);
        assert_eq!((second.inserted(), second.updated()), (0, 3));
        assert_eq!(first.stored_documents, second.stored_documents);
        assert_eq!(
            second.stored_by_metric,
            BTreeMap::from([
                ("Electricity Access Rate".to_string(), 2),
                ("Energy Intensity".to_string(), 1),
            ])
        );
        let ghana = connector
            .store()
            .get(&NaturalKey::new("Ghana", "Electricity Access Rate"))
            .unwrap();
        assert_eq!(ghana.country_serial, 2);
    }

    #[tokio::test]
    async fn missing_input_fails_before_connecting() {
        let (dir, mut config) = setup(&kenya_csv("75.0"));
        config.input_path = Some(dir.path().join("missing.csv"));
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));

        let failure = orchestrator(config, &connector).run().await.unwrap_err();
        assert_eq!(failure.stage, Stage::Discovery);
        assert!(matches!(
            failure.error,
            PipelineError::Discovery(DiscoveryError::NotFound { .. })
        ));
        assert!(failure.partial.is_none());
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn empty_search_directory_fails_before_connecting() {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::new("mongodb://localhost:27017");
        config.search_dir = dir.path().to_path_buf();
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));

        let failure = orchestrator(config, &connector).run().await.unwrap_err();
        assert_eq!(failure.stage, Stage::Discovery);
        assert!(failure.to_string().starts_with("discovery stage failed"));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_keeps_validation_results() {
        let (_dir, config) = setup(&kenya_csv("75.0"));
        let connector = Arc::new(MemoryConnector::failing(ConnectError::Network(
            "connection refused".into(),
        )));

        let failure = orchestrator(config, &connector).run().await.unwrap_err();
        assert_eq!(failure.stage, Stage::Load);
        assert!(matches!(
            failure.error,
            PipelineError::Connection(ConnectError::Network(_))
        ));
        let partial = failure.partial.unwrap();
        assert_eq!(partial.metrics[0].validation.accepted, 1);
        assert_eq!(partial.load_outcome, LoadOutcome::Failed);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn completeness_below_minimum_loads_nothing() {
        let (_dir, mut config) = setup(&kenya_csv("75.0"));
        config.min_completeness = 50.0;
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));

        let failure = orchestrator(config, &connector).run().await.unwrap_err();
        assert_eq!(failure.stage, Stage::Validation);
        match failure.error {
            PipelineError::CompletenessGate { actual, minimum } => {
                assert!(actual < minimum);
                assert_eq!(minimum, 50.0);
            }
            other => panic!("expected completeness gate, got {other}"),
        }
        assert_eq!(connector.attempts(), 0);
        assert_eq!(connector.store().closes(), 0);
    }

    #[tokio::test]
    async fn file_without_configured_indicators_is_nothing_to_load() {
        let csv = portal_csv(&[("Kenya", "Share of renewables", &[(2000, "1")])]);
        let (_dir, config) = setup(&csv);
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));

        let failure = orchestrator(config, &connector).run().await.unwrap_err();
        assert_eq!(failure.stage, Stage::Validation);
        assert!(matches!(failure.error, PipelineError::NothingToLoad(_)));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn empty_and_blank_country_rows_are_not_stored() {
        let csv = portal_csv(&[
            ("Chad", ELECTRICITY, &[]),
            (" ", ELECTRICITY, &[(2000, "5")]),
            ("Togo", ELECTRICITY, &[(2000, "0")]),
        ]);
        let (_dir, config) = setup(&csv);
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));

        let summary = orchestrator(config, &connector).run().await.unwrap();
        let report = &summary.metrics[0].validation;
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(summary.stored_documents, Some(1));

        let togo = connector
            .store()
            .get(&NaturalKey::new("Togo", "Electricity Access Rate"))
            .unwrap();
        assert_eq!(togo.value(2000), Some(0.0));
    }

    #[tokio::test]
    async fn summary_renders_as_text_and_json() {
        let (_dir, config) = setup(&kenya_csv("75.0"));
        let connector = Arc::new(MemoryConnector::new(MemoryStore::default()));
        let summary = orchestrator(config, &connector).run().await.unwrap();

        let text = summary.to_string();
        assert!(text.contains("[Electricity Access Rate]"), "{text}");
        assert!(text.contains("Overall completeness: 8.70%"), "{text}");

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["load_outcome"], "completed");
        assert_eq!(json["metrics"][0]["validation"]["accepted"], 1);
        assert_eq!(json["stored_documents"], 1);
    }

    /// Never answers.
    struct SilentConnector;

    #[async_trait]
    impl StoreConnector for SilentConnector {
        async fn connect(
            &self,
            _target: &StoreTarget,
        ) -> Result<Box<dyn DocumentStore>, ConnectError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handshake_times_out() {
        let (_dir, mut config) = setup(&kenya_csv("75.0"));
        config.timeout = Duration::from_secs(3);

        let failure = Orchestrator::new(config, Arc::new(SilentConnector))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            PipelineError::Connection(ConnectError::Timeout(t)) if t == Duration::from_secs(3)
        ));
    }

    #[derive(Clone, Copy)]
    enum Fault {
        RefuseIndexes,
        HangIndexes,
        HangReadBack,
    }

    /// A `MemoryStore` that misbehaves in one way.
    struct FaultyStore {
        inner: MemoryStore,
        fault: Fault,
    }

    #[async_trait]
    impl DocumentStore for FaultyStore {
        async fn ensure_indexes(&self) -> Result<(), StoreError> {
            match self.fault {
                Fault::RefuseIndexes => Err(StoreError::Index("not authorized".into())),
                Fault::HangIndexes => std::future::pending().await,
                Fault::HangReadBack => self.inner.ensure_indexes().await,
            }
        }

        async fn upsert(&self, doc: &CanonicalDocument) -> Result<UpsertOutcome, StoreError> {
            self.inner.upsert(doc).await
        }

        async fn count(&self) -> Result<u64, StoreError> {
            if let Fault::HangReadBack = self.fault {
                std::future::pending::<()>().await;
            }
            self.inner.count().await
        }

        async fn count_by_metric(&self) -> Result<BTreeMap<String, u64>, StoreError> {
            if let Fault::HangReadBack = self.fault {
                std::future::pending::<()>().await;
            }
            self.inner.count_by_metric().await
        }

        async fn find_all(&self) -> Result<Vec<CanonicalDocument>, StoreError> {
            self.inner.find_all().await
        }

        async fn close(&self) {
            if let Fault::HangReadBack = self.fault {
                std::future::pending::<()>().await;
            }
            self.inner.close().await
        }
    }

    struct FaultyConnector {
        store: MemoryStore,
        fault: Fault,
    }

    #[async_trait]
    impl StoreConnector for FaultyConnector {
        async fn connect(
            &self,
            _target: &StoreTarget,
        ) -> Result<Box<dyn DocumentStore>, ConnectError> {
            Ok(Box::new(FaultyStore {
                inner: self.store.clone(),
                fault: self.fault,
            }))
        }
    }

    fn faulty(store: &MemoryStore, fault: Fault) -> Arc<FaultyConnector> {
        Arc::new(FaultyConnector {
            store: store.clone(),
            fault,
        })
    }

    #[tokio::test]
    async fn index_failure_is_fatal_and_still_closes() {
        let (_dir, config) = setup(&kenya_csv("75.0"));
        let store = MemoryStore::default();

        let failure = Orchestrator::new(config, faulty(&store, Fault::RefuseIndexes))
            .run()
            .await
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Load);
        assert!(matches!(failure.error, PipelineError::Index(_)));
        assert_eq!(store.closes(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(failure.partial.unwrap().input.ends_with("energy.csv"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_index_creation_times_out() {
        let (_dir, mut config) = setup(&kenya_csv("75.0"));
        config.timeout = Duration::from_secs(3);
        let store = MemoryStore::default();
        let orchestrator = Orchestrator::new(config, faulty(&store, Fault::HangIndexes));

        let failure = tokio::time::timeout(Duration::from_secs(3600), orchestrator.run())
            .await
            .expect("run should give up on index creation")
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Load);
        assert!(matches!(
            failure.error,
            PipelineError::Index(StoreError::Timeout(t)) if t == Duration::from_secs(3)
        ));
        assert_eq!(store.closes(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_read_back_and_close_do_not_hang_the_run() {
        let (_dir, mut config) = setup(&kenya_csv("75.0"));
        config.timeout = Duration::from_secs(3);
        let store = MemoryStore::default();
        let orchestrator = Orchestrator::new(config, faulty(&store, Fault::HangReadBack));

        let summary = tokio::time::timeout(Duration::from_secs(3600), orchestrator.run())
            .await
            .expect("run should finish despite stalled read-back")
            .unwrap();
        assert_eq!(summary.inserted(), 1);
        assert_eq!(summary.load_outcome, LoadOutcome::Completed);
        assert_eq!(summary.stored_documents, None);
        assert!(summary.stored_by_metric.is_empty());
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.closes(), 0);
    }
}
