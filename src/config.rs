// src/config.rs
//! Run configuration. Built once at the binary boundary and handed to the
//! orchestrator; nothing below the orchestrator reads the environment.

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, env, fs, path::Path, path::PathBuf, time::Duration};

use crate::errors::ConfigError;
use crate::schema::MetadataField;

pub const DEFAULT_DATABASE: &str = "africa_energy_db";
pub const DEFAULT_COLLECTION: &str = "energy_metrics";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Gate disabled unless `MIN_COMPLETENESS` is set.
pub const DEFAULT_MIN_COMPLETENESS: f64 = 0.0;

/// Header names of the metadata columns in the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    pub country: String,
    pub indicator: Option<String>,
    pub unit: Option<String>,
    pub sector: Option<String>,
    pub sub_sector: Option<String>,
    pub sub_sub_sector: Option<String>,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            country: "Country".into(),
            indicator: Some("Indicator".into()),
            unit: Some("Unit".into()),
            sector: Some("Sector".into()),
            sub_sector: Some("Sub-Sector".into()),
            sub_sub_sector: Some("Sub-Sub-Sector".into()),
        }
    }
}

impl ColumnLayout {
    /// Metadata field named by `header`, compared case-insensitively.
    pub fn field_for(&self, header: &str) -> Option<MetadataField> {
        let header = header.trim();
        let matches = |name: &str| !header.is_empty() && name.trim().eq_ignore_ascii_case(header);

        if matches(&self.country) {
            return Some(MetadataField::Country);
        }
        [
            (&self.indicator, MetadataField::Indicator),
            (&self.unit, MetadataField::Unit),
            (&self.sector, MetadataField::Sector),
            (&self.sub_sector, MetadataField::SubSector),
            (&self.sub_sub_sector, MetadataField::SubSubSector),
        ]
        .into_iter()
        .find_map(|(name, field)| name.as_deref().filter(|n| matches(n)).map(|_| field))
    }
}

/// Descriptor for one metric: which rows feed it and the labels its documents carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Indicator label selecting rows; `None` takes every row of the file.
    #[serde(default)]
    pub indicator: Option<String>,
    pub metric: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub sub_sector: String,
    #[serde(default)]
    pub sub_sub_sector: String,
    /// Attribution, defaulted from the catalog.
    #[serde(default)]
    pub source: String,
    /// Source-file label, defaulted from the catalog.
    #[serde(default)]
    pub source_link: String,
}

impl MetricConfig {
    /// Whether a row's indicator label selects it for this metric.
    pub fn selects(&self, indicator: Option<&str>) -> bool {
        match &self.indicator {
            None => true,
            Some(wanted) => indicator.map(str::trim) == Some(wanted.trim()),
        }
    }
}

/// The set of metrics a run processes, with the roster and column layout they share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCatalog {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_source_link")]
    pub source_link: String,
    /// Countries expected in every metric, used for coverage reporting.
    #[serde(default = "default_roster")]
    pub countries: Vec<String>,
    #[serde(default)]
    pub columns: ColumnLayout,
    pub metrics: Vec<MetricConfig>,
}

fn default_source() -> String {
    "World Bank/International Energy Agency".into()
}

fn default_source_link() -> String {
    "Africa Energy Portal Dataset".into()
}

fn default_roster() -> Vec<String> {
    AFRICAN_COUNTRIES.iter().map(|c| c.to_string()).collect()
}

pub static AFRICAN_COUNTRIES: &[&str] = &[
    "Algeria",
    "Angola",
    "Benin",
    "Botswana",
    "Burkina Faso",
    "Burundi",
    "Cameroon",
    "Cape Verde",
    "Central African Republic",
    "Chad",
    "Comoros",
    "Congo Democratic Republic",
    "Congo Republic",
    "Cote d'Ivoire",
    "Djibouti",
    "Egypt",
    "Equatorial Guinea",
    "Eritrea",
    "Eswatini",
    "Ethiopia",
    "Gabon",
    "Gambia",
    "Ghana",
    "Guinea",
    "Guinea Bissau",
    "Kenya",
    "Lesotho",
    "Liberia",
    "Libya",
    "Madagascar",
    "Malawi",
    "Mali",
    "Mauritania",
    "Mauritius",
    "Morocco",
    "Mozambique",
    "Namibia",
    "Niger",
    "Nigeria",
    "Rwanda",
    "Sao Tome and Principe",
    "Senegal",
    "Seychelles",
    "Sierra Leone",
    "Somalia",
    "South Africa",
    "South Sudan",
    "Sudan",
    "Tanzania",
    "Togo",
    "Tunisia",
    "Uganda",
    "Zambia",
    "Zimbabwe",
];

fn portal_metric(
    indicator: &str,
    metric: &str,
    unit: &str,
    sector: &str,
    sub_sector: &str,
    sub_sub_sector: &str,
) -> MetricConfig {
    MetricConfig {
        indicator: Some(indicator.into()),
        metric: metric.into(),
        unit: unit.into(),
        sector: sector.into(),
        sub_sector: sub_sector.into(),
        sub_sub_sector: sub_sub_sector.into(),
        source: default_source(),
        source_link: default_source_link(),
    }
}

impl Default for MetricCatalog {
    /// The four Africa Energy Portal indicators.
    fn default() -> Self {
        Self {
            source: default_source(),
            source_link: default_source_link(),
            countries: default_roster(),
            columns: ColumnLayout::default(),
            metrics: vec![
                portal_metric(
                    "Population access to electricity-National (% of population)",
                    "Electricity Access Rate",
                    "%",
                    "Power",
                    "Access",
                    "National",
                ),
                portal_metric(
                    "Energy: Population with access to clean cooking fuels (% of population)",
                    "Clean Cooking Access Rate",
                    "%",
                    "Energy",
                    "Access",
                    "Clean Cooking",
                ),
                portal_metric(
                    "Energy: Population without access to clean cooking fuels (millions of people)",
                    "Clean Cooking Access Gap",
                    "millions",
                    "Energy",
                    "Access Gap",
                    "Clean Cooking",
                ),
                portal_metric(
                    "Energy intensity level of primary energy (MJ/2017 PPP GDP)",
                    "Energy Intensity",
                    "MJ/2017 PPP GDP",
                    "Energy Efficiency",
                    "Intensity",
                    "Primary Energy",
                ),
            ],
        }
    }
}

impl MetricCatalog {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let catalog: MetricCatalog = serde_yaml::from_str(text)?;
        catalog.resolve()
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::CatalogIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Fill per-metric provenance from the catalog and reject unusable catalogs.
    fn resolve(mut self) -> Result<Self, ConfigError> {
        if self.metrics.is_empty() {
            return Err(ConfigError::Catalog("no metrics defined".into()));
        }
        if self.columns.country.trim().is_empty() {
            return Err(ConfigError::Catalog("country column name is empty".into()));
        }

        let mut names = HashSet::new();
        for m in &mut self.metrics {
            if m.metric.trim().is_empty() {
                return Err(ConfigError::Catalog("metric with an empty name".into()));
            }
            if !names.insert(m.metric.clone()) {
                return Err(ConfigError::Catalog(format!(
                    "metric `{}` defined twice",
                    m.metric
                )));
            }
            if m.indicator.is_some() && self.columns.indicator.is_none() {
                return Err(ConfigError::Catalog(format!(
                    "metric `{}` selects by indicator but the layout has no indicator column",
                    m.metric
                )));
            }
            if m.source.trim().is_empty() {
                m.source = self.source.clone();
            }
            if m.source_link.trim().is_empty() {
                m.source_link = self.source_link.clone();
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryFormat {
    #[default]
    Text,
    Json,
}

/// Everything a run needs, resolved.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Required unless `dry_run` is set.
    pub connection_string: Option<String>,
    pub database: String,
    pub collection: String,
    /// Explicit input file; when `None` the search directory is scanned.
    pub input_path: Option<PathBuf>,
    pub search_dir: PathBuf,
    /// Percentage below which nothing is loaded.
    pub min_completeness: f64,
    /// Bound on the connection handshake and on each write.
    pub timeout: Duration,
    pub catalog: MetricCatalog,
    pub summary_format: SummaryFormat,
    /// Load into an in-memory store instead of the configured database.
    pub dry_run: bool,
}

impl PipelineConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            database: DEFAULT_DATABASE.into(),
            collection: DEFAULT_COLLECTION.into(),
            input_path: None,
            search_dir: PathBuf::from("."),
            min_completeness: DEFAULT_MIN_COMPLETENESS,
            timeout: DEFAULT_TIMEOUT,
            catalog: MetricCatalog::default(),
            summary_format: SummaryFormat::Text,
            dry_run: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let dry_run = match get("DRY_RUN") {
            Some(v) => parse_bool("DRY_RUN", &v)?,
            None => false,
        };

        let connection_string = match get("MONGO_URI") {
            Some(uri) => Some(check_connection_string(uri)?),
            None if dry_run => None,
            None => return Err(ConfigError::Missing("MONGO_URI")),
        };

        let min_completeness = match get("MIN_COMPLETENESS") {
            Some(v) => parse_percentage("MIN_COMPLETENESS", &v)?,
            None => DEFAULT_MIN_COMPLETENESS,
        };

        let timeout = match get("STORE_TIMEOUT_SECS") {
            Some(v) => match v.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "STORE_TIMEOUT_SECS",
                        value: v,
                        reason: "expected a positive number of seconds".into(),
                    })
                }
            },
            None => DEFAULT_TIMEOUT,
        };

        let summary_format = match get("SUMMARY_FORMAT").as_deref() {
            None => SummaryFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("text") => SummaryFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("json") => SummaryFormat::Json,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    key: "SUMMARY_FORMAT",
                    value: v.to_string(),
                    reason: "expected `text` or `json`".into(),
                })
            }
        };

        let catalog = match get("METRICS_FILE") {
            Some(path) => MetricCatalog::from_yaml_file(Path::new(&path))?,
            None => MetricCatalog::default(),
        };

        Ok(Self {
            connection_string,
            database: get("DATABASE_NAME").unwrap_or_else(|| DEFAULT_DATABASE.into()),
            collection: get("COLLECTION_NAME").unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            input_path: get("CSV_FILE_PATH").map(PathBuf::from),
            search_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            min_completeness,
            timeout,
            catalog,
            summary_format,
            dry_run,
        })
    }
}

fn check_connection_string(uri: String) -> Result<String, ConfigError> {
    if uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://") {
        Ok(uri)
    } else {
        Err(ConfigError::Invalid {
            key: "MONGO_URI",
            value: redact_uri(&uri),
            reason: "expected a mongodb:// or mongodb+srv:// connection string".into(),
        })
    }
}

fn parse_percentage(key: &'static str, value: &str) -> Result<f64, ConfigError> {
    let trimmed = value.trim_end_matches('%').trim();
    match trimmed.parse::<f64>() {
        Ok(p) if (0.0..=100.0).contains(&p) => Ok(p),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected a percentage between 0 and 100".into(),
        }),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

/// Hide credentials in a connection string before it reaches logs or errors.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://").map(|i| i + 3) else {
        return uri.to_string();
    };
    // userinfo can only appear in the authority, which ends at the first `/` or `?`
    let rest = &uri[scheme_end..];
    let authority = rest.find(['/', '?']).map_or(rest, |end| &rest[..end]);
    match authority.rfind('@') {
        Some(at) if at > 0 => format!("{}***{}", &uri[..scheme_end], &rest[at..]),
        _ => uri.to_string(),
    }
}
