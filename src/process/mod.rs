// src/process/mod.rs
pub mod reader;
pub mod utils;

pub use reader::{read_records, read_source, SourceTable};
