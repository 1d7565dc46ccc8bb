//! Load energy indicator tables from CSV into a document store: one document
//! per country and metric, validated and upserted on the natural key.

pub mod config;
pub mod discover;
pub mod errors;
pub mod load;
pub mod pipeline;
pub mod process;
pub mod schema;
pub mod validate;
