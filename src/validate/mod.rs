// src/validate/mod.rs
//! Per-document checks and the dataset-wide completeness score.

use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    iter::Sum,
    ops::AddAssign,
};
use tracing::{info, warn};

use crate::errors::RejectReason;
use crate::schema::{year_in_range, CanonicalDocument, NaturalKey};

/// A mapped document with the source row it came from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub row: usize,
    pub document: CanonicalDocument,
}

/// Filled year values against year slots; reduces over any set of documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub filled: usize,
    pub slots: usize,
}

impl Completeness {
    pub fn of(doc: &CanonicalDocument) -> Self {
        Self {
            filled: doc.filled_years(),
            slots: doc.years.len(),
        }
    }

    /// Share of filled slots in percent; 0 when there are no slots.
    pub fn percentage(&self) -> f64 {
        if self.slots == 0 {
            0.0
        } else {
            self.filled as f64 * 100.0 / self.slots as f64
        }
    }
}

impl AddAssign for Completeness {
    fn add_assign(&mut self, rhs: Self) {
        self.filled += rhs.filled;
        self.slots += rhs.slots;
    }
}

impl Sum for Completeness {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, c| {
            acc += c;
            acc
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub row: usize,
    pub key: NaturalKey,
    pub reasons: Vec<RejectReason>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct YearCoverage {
    pub available: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub metric: String,
    pub examined: usize,
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
    pub tally: Completeness,
    /// Percentage of filled year slots over accepted documents.
    pub completeness: f64,
    pub year_coverage: BTreeMap<u16, YearCoverage>,
    pub countries_covered: usize,
    /// Roster countries with no accepted document.
    pub missing_countries: Vec<String>,
}

/// Structural checks for one document. An empty list means valid.
pub fn check_document(doc: &CanonicalDocument) -> Vec<RejectReason> {
    let mut reasons = Vec::new();

    let required = [
        ("country", &doc.country),
        ("metric", &doc.metric),
        ("unit", &doc.unit),
        ("sector", &doc.sector),
        ("sub_sector", &doc.sub_sector),
        ("sub_sub_sector", &doc.sub_sub_sector),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            reasons.push(RejectReason::EmptyField { field });
        }
    }

    if doc.country_serial == 0 {
        reasons.push(RejectReason::NonPositiveSerial);
    }

    for year in doc.years.keys().filter(|y| !year_in_range(**y)) {
        reasons.push(RejectReason::YearOutOfRange { year: *year });
    }

    let has_value = doc
        .years
        .iter()
        .any(|(year, value)| year_in_range(*year) && value.is_some());
    if !has_value {
        reasons.push(RejectReason::NoYearValues);
    }

    reasons
}

/// Validates batches of mapped documents against the roster of expected countries.
pub struct Validator<'a> {
    roster: &'a [String],
}

impl<'a> Validator<'a> {
    pub fn new(roster: &'a [String]) -> Self {
        Self { roster }
    }

    /// Split `candidates` into accepted documents and a report. Failing
    /// documents are recorded and skipped; the batch always completes.
    /// A second row with an already accepted `(country, metric)` is rejected.
    #[tracing::instrument(level = "info", skip(self, candidates), fields(candidates = candidates.len()))]
    pub fn validate(
        &self,
        metric: &str,
        candidates: Vec<Candidate>,
    ) -> (Vec<CanonicalDocument>, ValidationReport) {
        let examined = candidates.len();
        let mut accepted: Vec<CanonicalDocument> = Vec::with_capacity(examined);
        let mut rejected = Vec::new();
        let mut first_rows: HashMap<NaturalKey, usize> = HashMap::new();

        for Candidate { row, document } in candidates {
            let key = document.key();
            let mut reasons = check_document(&document);
            if let Some(first_row) = first_rows.get(&key) {
                reasons.push(RejectReason::DuplicateKey {
                    first_row: *first_row,
                });
            }

            if reasons.is_empty() {
                first_rows.insert(key, row);
                accepted.push(document);
            } else {
                let listed: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
                warn!(row, key = %key, reasons = ?listed, "rejected record");
                rejected.push(Rejection { row, key, reasons });
            }
        }

        let tally: Completeness = accepted.iter().map(Completeness::of).sum();

        let mut year_coverage: BTreeMap<u16, YearCoverage> = BTreeMap::new();
        for doc in &accepted {
            for (year, value) in &doc.years {
                let cov = year_coverage.entry(*year).or_default();
                cov.total += 1;
                if value.is_some() {
                    cov.available += 1;
                }
            }
        }

        let covered: BTreeSet<&str> = accepted.iter().map(|d| d.country.as_str()).collect();
        let missing_countries: Vec<String> = self
            .roster
            .iter()
            .filter(|c| !covered.contains(c.as_str()))
            .cloned()
            .collect();

        let report = ValidationReport {
            metric: metric.to_string(),
            examined,
            accepted: accepted.len(),
            rejected,
            tally,
            completeness: tally.percentage(),
            year_coverage,
            countries_covered: covered.len(),
            missing_countries,
        };

        info!(
            metric,
            examined = report.examined,
            accepted = report.accepted,
            rejected = report.rejected.len(),
            completeness = report.completeness,
            "validated batch"
        );

        (accepted, report)
    }
}
