// src/schema/columns.rs

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::year_in_range;
use crate::config::ColumnLayout;
use crate::process::utils::clean_str;

static YEAR_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}$").expect("year header pattern should be valid"));

/// Metadata columns a layout can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    Country,
    Indicator,
    Unit,
    Sector,
    SubSector,
    SubSubSector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Year(u16),
    Metadata(MetadataField),
    Ignored,
}

/// Decide what a header names. Four-digit headers inside the accepted year
/// range are year columns; other four-digit headers are ignored rather than
/// rejected. Layout names match case-insensitively after trimming.
pub fn classify(column: &str, layout: &ColumnLayout) -> ColumnKind {
    let name = clean_str(column);

    if YEAR_HEADER.is_match(&name) {
        return match name.parse::<u16>() {
            Ok(year) if year_in_range(year) => ColumnKind::Year(year),
            _ => ColumnKind::Ignored,
        };
    }

    layout
        .field_for(&name)
        .map(ColumnKind::Metadata)
        .unwrap_or(ColumnKind::Ignored)
}

/// Year columns of a header row, in file order.
pub fn year_columns(headers: &[String], layout: &ColumnLayout) -> Vec<u16> {
    headers
        .iter()
        .filter_map(|h| match classify(h, layout) {
            ColumnKind::Year(year) => Some(year),
            _ => None,
        })
        .collect()
}
