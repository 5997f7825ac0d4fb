//! Data ingestion module - clean, stage, promote and load Airbnb exports

pub mod clean;
pub mod columns;
pub mod db;
pub mod enrich;
pub mod error;
pub mod parse;
pub mod pipeline;
pub mod sanitize;
pub mod stage;
pub mod types;
pub mod utils;
pub mod write;

pub use error::LoadError;
pub use types::*;
