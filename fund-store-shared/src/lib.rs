//! # Fund Store Shared
//!
//! Record types shared by the repository and the ingestion pipeline.
//!
//! Records are persisted as schemaless JSON documents. Every stored document
//! carries the storage identity field [`ID_FIELD`], which always equals the
//! record's identity key.

mod fund;
mod record;
mod stock;

pub use fund::{Fund, FundType, HistoricPrice, Holding, ShareClass};
pub use record::{Document, Record, RecordError, ID_FIELD, SCORE_FIELD};
pub use stock::Stock;
