// src/pipeline/summary.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, path::PathBuf};
use thiserror::Error;

use crate::errors::{PipelineError, Stage};
use crate::load::LoadReport;
use crate::validate::ValidationReport;

/// Rejections listed per metric in the text rendering; JSON carries all of them.
const REJECTIONS_SHOWN: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub metric: String,
    /// Rows whose indicator selected this metric.
    pub matched_rows: usize,
    pub validation: ValidationReport,
    /// `None` until the metric's batch has been written.
    pub load: Option<LoadReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    NotAttempted,
    Completed,
    CompletedWithFailures,
    Failed,
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadOutcome::NotAttempted => "not attempted",
            LoadOutcome::Completed => "completed",
            LoadOutcome::CompletedWithFailures => "completed with write failures",
            LoadOutcome::Failed => "failed",
        })
    }
}

/// What a run did, stage by stage.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub input: PathBuf,
    pub rows_read: usize,
    pub metrics: Vec<MetricSummary>,
    /// Filled year slots over all accepted documents of all metrics, in percent.
    pub completeness: f64,
    pub load_outcome: LoadOutcome,
    /// Documents in the collection after loading.
    pub stored_documents: Option<u64>,
    pub stored_by_metric: BTreeMap<String, u64>,
    pub elapsed_secs: f64,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>, input: PathBuf, rows_read: usize, dry_run: bool) -> Self {
        Self {
            started_at,
            input,
            rows_read,
            metrics: Vec::new(),
            completeness: 0.0,
            load_outcome: LoadOutcome::NotAttempted,
            stored_documents: None,
            stored_by_metric: BTreeMap::new(),
            elapsed_secs: 0.0,
            dry_run,
        }
    }

    pub fn accepted(&self) -> usize {
        self.metrics.iter().map(|m| m.validation.accepted).sum()
    }

    pub fn rejected(&self) -> usize {
        self.metrics.iter().map(|m| m.validation.rejected.len()).sum()
    }

    pub fn inserted(&self) -> usize {
        self.loads().map(|l| l.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.loads().map(|l| l.updated).sum()
    }

    pub fn write_failures(&self) -> usize {
        self.loads().map(|l| l.failures.len()).sum()
    }

    fn loads(&self) -> impl Iterator<Item = &LoadReport> {
        self.metrics.iter().filter_map(|m| m.load.as_ref())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Energy data load ===")?;
        writeln!(f, "Started:        {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Input:          {}", self.input.display())?;
        writeln!(f, "Rows read:      {}", self.rows_read)?;
        if self.dry_run {
            writeln!(f, "Mode:           dry run (in-memory store)")?;
        }

        for m in &self.metrics {
            let v = &m.validation;
            writeln!(f)?;
            writeln!(f, "[{}]", m.metric)?;
            writeln!(
                f,
                "  rows matched {}, accepted {}, rejected {}",
                m.matched_rows,
                v.accepted,
                v.rejected.len()
            )?;
            writeln!(
                f,
                "  completeness {:.2}% ({} of {} year values)",
                v.completeness, v.tally.filled, v.tally.slots
            )?;
            writeln!(
                f,
                "  countries covered {}, missing from roster {}",
                v.countries_covered,
                v.missing_countries.len()
            )?;
            if let Some(load) = &m.load {
                writeln!(
                    f,
                    "  written: {} inserted, {} updated, {} failed",
                    load.inserted,
                    load.updated,
                    load.failures.len()
                )?;
                for failure in &load.failures {
                    writeln!(f, "    write failed for {}: {}", failure.key, failure.reason)?;
                }
            }
            for rejection in v.rejected.iter().take(REJECTIONS_SHOWN) {
                let reasons: Vec<String> = rejection.reasons.iter().map(|r| r.to_string()).collect();
                writeln!(
                    f,
                    "    row {} ({}): {}",
                    rejection.row,
                    rejection.key,
                    reasons.join("; ")
                )?;
            }
            if v.rejected.len() > REJECTIONS_SHOWN {
                writeln!(f, "    ... {} more", v.rejected.len() - REJECTIONS_SHOWN)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Overall completeness: {:.2}%", self.completeness)?;
        writeln!(f, "Load:                 {}", self.load_outcome)?;
        if let Some(total) = self.stored_documents {
            writeln!(f, "Stored documents:     {total}")?;
            for (metric, count) in &self.stored_by_metric {
                writeln!(f, "  {metric}: {count}")?;
            }
        }
        write!(f, "Elapsed:              {:.2}s", self.elapsed_secs)
    }
}

/// A fatal error with the stage it happened in and whatever the run had
/// produced up to that point.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
    pub partial: Option<Box<RunSummary>>,
}

impl RunFailure {
    pub fn new(error: PipelineError, partial: Option<RunSummary>) -> Self {
        Self {
            stage: error.stage(),
            error,
            partial: partial.map(Box::new),
        }
    }
}
