// src/schema/mapper.rs

use std::collections::BTreeMap;
use tracing::trace;

use super::columns::{classify, ColumnKind};
use super::types::{CanonicalDocument, RawRecord};
use crate::config::{ColumnLayout, MetricConfig};
use crate::process::utils::{clean_str, parse_value};

/// Configured label, or the row's own value when the label is blank.
fn label(configured: &str, from_row: Option<&String>) -> String {
    let configured = configured.trim();
    if configured.is_empty() {
        from_row.map(|s| clean_str(s)).unwrap_or_default()
    } else {
        configured.to_string()
    }
}

/// Turn one row into one document for `metric`.
///
/// Every in-range year column of the row becomes a key of the document,
/// holding `None` when the cell is blank or unparsable. Headers that are not
/// year columns are skipped. The country is trimmed but never rejected here;
/// that is the validator's job.
pub fn map_record(
    record: &RawRecord,
    metric: &MetricConfig,
    layout: &ColumnLayout,
) -> CanonicalDocument {
    let mut years = BTreeMap::new();
    for (header, cell) in &record.cells {
        if let ColumnKind::Year(year) = classify(header, layout) {
            let value = parse_value(cell);
            if value.is_none() && !clean_str(cell).is_empty() {
                trace!(row = record.row, year, cell = %cell, "unparsable cell stored as null");
            }
            years.insert(year, value);
        }
    }

    CanonicalDocument {
        country: clean_str(&record.country),
        country_serial: record.country_ordinal,
        metric: label(&metric.metric, record.indicator.as_ref()),
        unit: label(&metric.unit, record.unit.as_ref()),
        sector: label(&metric.sector, record.sector.as_ref()),
        sub_sector: label(&metric.sub_sector, record.sub_sector.as_ref()),
        sub_sub_sector: label(&metric.sub_sub_sector, record.sub_sub_sector.as_ref()),
        source_link: metric.source_link.trim().to_string(),
        source: metric.source.trim().to_string(),
        years,
    }
}
