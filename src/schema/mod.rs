pub mod columns;
pub mod mapper;
pub mod types;

pub use columns::{classify, year_columns, ColumnKind, MetadataField};
pub use mapper::map_record;
pub use types::{
    year_in_range, CanonicalDocument, NaturalKey, RawRecord, FIRST_YEAR, LAST_YEAR,
};
