// src/process/reader.rs

use csv::ReaderBuilder;
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use super::utils::{clean_str, non_blank};
use crate::config::ColumnLayout;
use crate::errors::ReadError;
use crate::schema::{classify, year_columns, ColumnKind, MetadataField, RawRecord};

/// Parsed contents of the input file.
#[derive(Debug)]
pub struct SourceTable {
    pub path: PathBuf,
    pub headers: Vec<String>,
    /// Year columns found in the header row, in file order.
    pub year_columns: Vec<u16>,
    pub records: Vec<RawRecord>,
}

impl SourceTable {
    /// Distinct non-blank countries, i.e. the highest ordinal handed out.
    pub fn country_count(&self) -> u32 {
        self.records
            .iter()
            .map(|r| r.country_ordinal)
            .max()
            .unwrap_or(0)
    }
}

/// Read the CSV at `path` into raw records.
#[tracing::instrument(level = "info", skip(path, layout), fields(path = %path.as_ref().display()))]
pub fn read_source<P: AsRef<Path>>(path: P, layout: &ColumnLayout) -> Result<SourceTable, ReadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = read_records(BufReader::new(file), path, layout)?;
    info!(
        rows = table.records.len(),
        countries = table.country_count(),
        years = table.year_columns.len(),
        "read source table"
    );
    Ok(table)
}

/// Parse CSV text from any reader. `path` only labels errors.
pub fn read_records<R: Read>(
    reader: R,
    path: &Path,
    layout: &ColumnLayout,
) -> Result<SourceTable, ReadError> {
    let csv_err = |source: csv::Error| ReadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // tolerate short or long rows
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(clean_str)
        .collect();
    let kinds: Vec<ColumnKind> = headers.iter().map(|h| classify(h, layout)).collect();

    let has = |field: MetadataField| kinds.contains(&ColumnKind::Metadata(field));
    if !has(MetadataField::Country) {
        return Err(ReadError::MissingColumn {
            path: path.to_path_buf(),
            column: layout.country.clone(),
        });
    }
    if let Some(indicator) = &layout.indicator {
        if !has(MetadataField::Indicator) {
            return Err(ReadError::MissingColumn {
                path: path.to_path_buf(),
                column: indicator.clone(),
            });
        }
    }

    let year_columns = year_columns(&headers, layout);
    if year_columns.is_empty() {
        return Err(ReadError::NoYearColumns {
            path: path.to_path_buf(),
        });
    }
    debug!(?year_columns, "detected year columns");

    let mut ordinals: HashMap<String, u32> = HashMap::new();
    let mut records = Vec::new();

    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(csv_err)?;
        let row = idx + 1;
        if record.len() != headers.len() {
            warn!(
                row,
                fields = record.len(),
                expected = headers.len(),
                "row width differs from header"
            );
        }

        let mut raw = RawRecord {
            row,
            ..RawRecord::default()
        };
        for (i, header) in headers.iter().enumerate() {
            let cell = record.get(i).unwrap_or("");
            match kinds[i] {
                ColumnKind::Metadata(MetadataField::Country) => raw.country = cell.to_string(),
                ColumnKind::Metadata(MetadataField::Indicator) => raw.indicator = non_blank(cell),
                ColumnKind::Metadata(MetadataField::Unit) => raw.unit = non_blank(cell),
                ColumnKind::Metadata(MetadataField::Sector) => raw.sector = non_blank(cell),
                ColumnKind::Metadata(MetadataField::SubSector) => raw.sub_sector = non_blank(cell),
                ColumnKind::Metadata(MetadataField::SubSubSector) => {
                    raw.sub_sub_sector = non_blank(cell)
                }
                ColumnKind::Year(_) | ColumnKind::Ignored => {
                    raw.cells.push((header.clone(), cell.to_string()))
                }
            }
        }

        let country = clean_str(&raw.country);
        raw.country_ordinal = if country.is_empty() {
            0
        } else {
            let next = ordinals.len() as u32 + 1;
            *ordinals.entry(country).or_insert(next)
        };
        records.push(raw);
    }

    Ok(SourceTable {
        path: path.to_path_buf(),
        headers,
        year_columns,
        records,
    })
}
