// src/schema/types.rs

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// First year column accepted into a document.
pub const FIRST_YEAR: u16 = 2000;
/// Last year column accepted into a document.
pub const LAST_YEAR: u16 = 2022;

pub fn year_in_range(year: u16) -> bool {
    (FIRST_YEAR..=LAST_YEAR).contains(&year)
}

/// The `(country, metric)` pair that identifies a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub country: String,
    pub metric: String,
}

impl NaturalKey {
    pub fn new(country: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.country, self.metric)
    }
}

/// One data row of the source CSV, before mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// 1-based position among the data rows of the file.
    pub row: usize,
    pub country: String,
    /// 1-based ordinal of the country by first appearance in the file, 0 if blank.
    pub country_ordinal: u32,
    pub indicator: Option<String>,
    pub unit: Option<String>,
    pub sector: Option<String>,
    pub sub_sector: Option<String>,
    pub sub_sub_sector: Option<String>,
    /// `(header, cell)` for every column that is not layout metadata, in file order.
    pub cells: Vec<(String, String)>,
}

/// The stored unit: one country and one metric with its yearly series.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDocument {
    pub country: String,
    pub country_serial: u32,
    pub metric: String,
    pub unit: String,
    pub sector: String,
    pub sub_sector: String,
    pub sub_sub_sector: String,
    pub source_link: String,
    pub source: String,
    /// `None` marks "no data", which is distinct from a recorded zero.
    pub years: BTreeMap<u16, Option<f64>>,
}

impl CanonicalDocument {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.country.clone(), self.metric.clone())
    }

    pub fn value(&self, year: u16) -> Option<f64> {
        self.years.get(&year).copied().flatten()
    }

    /// Number of year slots holding a value.
    pub fn filled_years(&self) -> usize {
        self.years.values().filter(|v| v.is_some()).count()
    }

    /// Most recent year holding a value, with that value.
    pub fn latest(&self) -> Option<(u16, f64)> {
        self.years
            .iter()
            .rev()
            .find_map(|(year, value)| value.map(|v| (*year, v)))
    }
}
