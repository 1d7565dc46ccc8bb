//! Error types for each stage of the pipeline.
//! Configuration, discovery and connection failures end a run; record-level
//! rejections and per-document write failures are collected into reports.
use serde::Serialize;
use std::{fmt, path::PathBuf, time::Duration};
use thiserror::Error;

/// Pipeline stage a fatal error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Validation,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Discovery => "discovery",
            Stage::Validation => "validation",
            Stage::Load => "load",
        })
    }
}

/// Invalid or missing settings at the configuration boundary.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read metric catalog {}: {source}", .path.display())]
    CatalogIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse metric catalog: {0}")]
    CatalogParse(#[from] serde_yaml::Error),
    #[error("invalid metric catalog: {0}")]
    Catalog(String),
}

/// The input file could not be located.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("input file {} not found", .path.display())]
    NotFound { path: PathBuf },
    #[error("no recognizable data file found in {}", .dir.display())]
    NoCandidates { dir: PathBuf },
    #[error(
        "{} candidate data files in {}: {}; set CSV_FILE_PATH to choose one",
        .candidates.len(),
        .dir.display(),
        list_paths(.candidates)
    )]
    Ambiguous {
        dir: PathBuf,
        candidates: Vec<PathBuf>,
    },
    #[error("cannot read {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

fn list_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The located file could not be read into records.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV parse error in {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{} has no `{column}` column", .path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("{} has no year columns between 2000 and 2022", .path.display())]
    NoYearColumns { path: PathBuf },
}

/// Why a single document was excluded from loading.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("required field `{field}` is empty")]
    EmptyField { field: &'static str },
    #[error("country_serial must be positive")]
    NonPositiveSerial,
    #[error("no year has a value")]
    NoYearValues,
    #[error("year {year} is outside 2000..=2022")]
    YearOutOfRange { year: u16 },
    #[error("same country and metric as row {first_row}")]
    DuplicateKey { first_row: usize },
}

/// Opening the document store failed.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("store unreachable: {0}")]
    Network(String),
    #[error("no response from store within {0:?}")]
    Timeout(Duration),
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
    #[error("{0}")]
    Other(String),
}

/// A store operation failed after the connection was established.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("index creation failed: {0}")]
    Index(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("read failed: {0}")]
    Read(String),
    #[error("malformed stored document: {0}")]
    Decode(String),
}

/// Failures that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("no configured metric matched any row of {}", .0.display())]
    NothingToLoad(PathBuf),
    #[error("completeness {actual:.2}% is below the minimum of {minimum:.2}%")]
    CompletenessGate { actual: f64, minimum: f64 },
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectError),
    #[error("index assurance failed: {0}")]
    Index(StoreError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Discovery(_) | PipelineError::Read(_) => Stage::Discovery,
            PipelineError::NothingToLoad(_) | PipelineError::CompletenessGate { .. } => {
                Stage::Validation
            }
            PipelineError::Connection(_) | PipelineError::Index(_) => Stage::Load,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_named_in_messages() {
        let err = PipelineError::from(DiscoveryError::NotFound {
            path: PathBuf::from("missing.csv"),
        });
        assert_eq!(err.stage(), Stage::Discovery);
        assert_eq!(err.to_string(), "input file missing.csv not found");

        let err = PipelineError::from(ConnectError::Timeout(Duration::from_secs(3)));
        assert_eq!(err.stage(), Stage::Load);
        assert_eq!(Stage::Load.to_string(), "load");
    }

    #[test]
    fn ambiguous_lists_candidates() {
        let err = DiscoveryError::Ambiguous {
            dir: PathBuf::from("data"),
            candidates: vec![PathBuf::from("data/a.csv"), PathBuf::from("data/b.csv")],
        };
        assert_eq!(
            err.to_string(),
            "2 candidate data files in data: data/a.csv, data/b.csv; set CSV_FILE_PATH to choose one"
        );
    }
}
