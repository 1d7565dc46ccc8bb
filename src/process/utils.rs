/// Markers the source data uses for "no value".
const NULL_MARKERS: &[&str] = &["", "null", "na", "n/a", "nan", "none", "..", "-"];

/// Trim whitespace, a leading byte-order mark and outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('\u{feff}').trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Coerce a cell to a number. Blank cells, null markers, unparsable text and
/// non-finite values all become `None`; zero stays zero.
pub fn parse_value(raw: &str) -> Option<f64> {
    let cell = clean_str(raw);
    if NULL_MARKERS.iter().any(|m| cell.eq_ignore_ascii_case(m)) {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `Some(trimmed)` unless the cell is blank.
pub fn non_blank(raw: &str) -> Option<String> {
    let cell = clean_str(raw);
    (!cell.is_empty()).then_some(cell)
}
