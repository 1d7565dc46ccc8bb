// src/load/mongo.rs

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, IndexOptions},
    Client, Collection, IndexModel,
};
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, info};

use super::{DocumentStore, StoreConnector, StoreTarget, UpsertOutcome};
use crate::config::redact_uri;
use crate::errors::{ConnectError, StoreError};
use crate::schema::CanonicalDocument;

/// Name of the unique index on `(country, metric)`.
pub const UNIQUE_INDEX: &str = "country_metric_unique";

const APP_NAME: &str = "energyload";

// Server error codes for AuthenticationFailed and Unauthorized.
const AUTH_CODES: &[i32] = &[18, 13];

// Text the driver embeds in a server-selection error when the last attempt
// failed at the socket or resolver rather than simply running out of time.
const NETWORK_MARKERS: &[&str] = &[
    "I/O error",
    "Connection refused",
    "connection refused",
    "DNS",
    "dns",
    "failed to lookup",
];

/// Driver error kinds, reduced to what decides the reported connect failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverFailure {
    Authentication,
    ServerSelection,
    Network,
    InvalidArgument,
    Other,
}

impl DriverFailure {
    fn of(err: &MongoError) -> Self {
        match err.kind.as_ref() {
            ErrorKind::Authentication { .. } => DriverFailure::Authentication,
            ErrorKind::Command(cmd) if AUTH_CODES.contains(&cmd.code) => {
                DriverFailure::Authentication
            }
            ErrorKind::InvalidArgument { .. } => DriverFailure::InvalidArgument,
            ErrorKind::ServerSelection { .. } => DriverFailure::ServerSelection,
            ErrorKind::DnsResolve { .. } | ErrorKind::Io(_) => DriverFailure::Network,
            _ => DriverFailure::Other,
        }
    }
}

/// Map a driver failure to a connect error.
///
/// Server selection only fails once `limit` has run out. It is reported as
/// `Timeout` unless its message shows the last attempt was refused, failed
/// to resolve or failed to authenticate.
fn classify_connect_error(
    failure: DriverFailure,
    message: String,
    limit: Duration,
) -> ConnectError {
    let auth_rejected = message.contains("Authentication failed");
    let unreachable = NETWORK_MARKERS.iter().any(|m| message.contains(m));
    match failure {
        DriverFailure::Authentication => ConnectError::Authentication(message),
        DriverFailure::InvalidArgument => ConnectError::InvalidTarget(message),
        DriverFailure::Network => ConnectError::Network(message),
        _ if auth_rejected => ConnectError::Authentication(message),
        DriverFailure::ServerSelection if unreachable => ConnectError::Network(message),
        DriverFailure::ServerSelection => ConnectError::Timeout(limit),
        DriverFailure::Other => ConnectError::Other(message),
    }
}

fn connect_error(err: &MongoError, limit: Duration) -> ConnectError {
    classify_connect_error(DriverFailure::of(err), err.to_string(), limit)
}

/// Filter selecting the stored document with the same natural key.
fn key_filter(doc: &CanonicalDocument) -> Document {
    doc! {
        "country": doc.country.as_str(),
        "metric": doc.metric.as_str(),
    }
}

/// Stored shape: metadata fields plus one `"YYYY"` key per year, `null` when empty.
pub fn to_bson(doc: &CanonicalDocument) -> Document {
    let mut out = doc! {
        "country": doc.country.as_str(),
        "country_serial": i64::from(doc.country_serial),
        "metric": doc.metric.as_str(),
        "unit": doc.unit.as_str(),
        "sector": doc.sector.as_str(),
        "sub_sector": doc.sub_sector.as_str(),
        "sub_sub_sector": doc.sub_sub_sector.as_str(),
        "source_link": doc.source_link.as_str(),
        "source": doc.source.as_str(),
    };
    for (year, value) in &doc.years {
        out.insert(year.to_string(), value.map_or(Bson::Null, Bson::Double));
    }
    out
}

fn is_year_key(key: &str) -> bool {
    key.len() == 4 && key.bytes().all(|b| b.is_ascii_digit())
}

/// Read a stored document back. Year keys outside 2000..=2022 are kept so a
/// quality check can report them.
pub fn from_bson(stored: &Document) -> Result<CanonicalDocument, StoreError> {
    let text = |field: &str| -> Result<String, StoreError> {
        stored
            .get_str(field)
            .map(str::to_string)
            .map_err(|e| StoreError::Decode(format!("{field}: {e}")))
    };
    let optional_text = |field: &str| stored.get_str(field).unwrap_or_default().to_string();

    let serial = match stored.get("country_serial") {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(f)) if f.fract() == 0.0 => *f as i64,
        other => {
            return Err(StoreError::Decode(format!(
                "country_serial: unexpected value {other:?}"
            )))
        }
    };
    let country_serial = u32::try_from(serial)
        .map_err(|_| StoreError::Decode(format!("country_serial: {serial} out of range")))?;

    let mut years = BTreeMap::new();
    for (key, value) in stored.iter().filter(|(k, _)| is_year_key(k)) {
        let year: u16 = key
            .parse()
            .map_err(|_| StoreError::Decode(format!("bad year key {key}")))?;
        let value = match value {
            Bson::Double(f) => Some(*f),
            Bson::Int32(n) => Some(f64::from(*n)),
            Bson::Int64(n) => Some(*n as f64),
            Bson::Null | Bson::Undefined => None,
            other => {
                return Err(StoreError::Decode(format!(
                    "{key}: unexpected value {other:?}"
                )))
            }
        };
        years.insert(year, value);
    }

    Ok(CanonicalDocument {
        country: text("country")?,
        country_serial,
        metric: text("metric")?,
        unit: text("unit")?,
        sector: text("sector")?,
        sub_sector: text("sub_sector")?,
        sub_sub_sector: text("sub_sub_sector")?,
        source_link: optional_text("source_link"),
        source: optional_text("source"),
        years,
    })
}

/// A MongoDB collection holding one document per `(country, metric)`.
pub struct MongoStore {
    client: Client,
    collection: Collection<Document>,
}

impl MongoStore {
    /// Parse the connection string, bound selection and connect time by the
    /// target's timeout, and ping before handing the store out.
    #[tracing::instrument(
        level = "info",
        skip(target),
        fields(database = %target.database, collection = %target.collection)
    )]
    pub async fn connect(target: &StoreTarget) -> Result<Self, ConnectError> {
        let mut options = ClientOptions::parse(&target.uri)
            .await
            .map_err(|e| connect_error(&e, target.timeout))?;
        options.app_name = Some(APP_NAME.to_string());
        options.server_selection_timeout = Some(target.timeout);
        options.connect_timeout = Some(target.timeout);

        let client =
            Client::with_options(options).map_err(|e| connect_error(&e, target.timeout))?;
        let database = client.database(&target.database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| connect_error(&e, target.timeout))?;

        info!(uri = %redact_uri(&target.uri), "connected to document store");
        Ok(Self {
            collection: database.collection(&target.collection),
            client,
        })
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = IndexModel::builder()
            .keys(doc! { "country": 1, "metric": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name(UNIQUE_INDEX.to_string())
                    .build(),
            )
            .build();
        let secondary = [
            doc! { "country_serial": 1 },
            doc! { "sector": 1, "sub_sector": 1 },
            doc! { "metric": 1 },
        ]
        .into_iter()
        .map(|keys| IndexModel::builder().keys(keys).build());

        self.collection
            .create_indexes(std::iter::once(unique).chain(secondary))
            .await
            .map_err(|e| StoreError::Index(e.to_string()))?;
        debug!("indexes ensured");
        Ok(())
    }

    async fn upsert(&self, doc: &CanonicalDocument) -> Result<UpsertOutcome, StoreError> {
        let result = self
            .collection
            .replace_one(key_filter(doc), to_bson(doc))
            .upsert(true)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(if result.upserted_id.is_some() {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.collection
            .count_documents(doc! {})
            .await
            .map_err(|e| StoreError::Read(e.to_string()))
    }

    async fn count_by_metric(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let pipeline = vec![doc! {
            "$group": { "_id": "$metric", "count": { "$sum": 1 } }
        }];
        let groups: Vec<Document> = self
            .collection
            .aggregate(pipeline)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        let mut counts = BTreeMap::new();
        for group in groups {
            let metric = group.get_str("_id").unwrap_or_default().to_string();
            let count = match group.get("count") {
                Some(Bson::Int32(n)) => *n as u64,
                Some(Bson::Int64(n)) => *n as u64,
                _ => 0,
            };
            counts.insert(metric, count);
        }
        Ok(counts)
    }

    async fn find_all(&self) -> Result<Vec<CanonicalDocument>, StoreError> {
        let stored: Vec<Document> = self
            .collection
            .find(doc! {})
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;
        stored.iter().map(from_bson).collect()
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        debug!("document store connection closed");
    }
}

/// Connects to MongoDB deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(&self, target: &StoreTarget) -> Result<Box<dyn DocumentStore>, ConnectError> {
        let store = MongoStore::connect(target).await?;
        Ok(Box::new(store))
    }
}
