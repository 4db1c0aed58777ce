//! The `Record` trait and document conversion helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Storage identity field, always equal to the record's key.
pub const ID_FIELD: &str = "_id";

/// Field holding the relevance score of a full-text match.
pub const SCORE_FIELD: &str = "score";

/// Errors converting between records and documents.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record did not serialize to a JSON object.
    #[error("Record is not a JSON object")]
    NotAnObject,

    /// Serde failure in either direction.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A domain entity with a stable, unique identity key.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the identity field inside the serialized document.
    const KEY_FIELD: &'static str;

    /// The identity key.
    fn key(&self) -> &str;

    /// Whether this record signals removal rather than an update.
    fn is_obsolete(&self) -> bool {
        false
    }

    /// Serialize into a storage document with `_id` set to the key.
    fn to_document(&self) -> Result<Document, RecordError> {
        match serde_json::to_value(self)? {
            Value::Object(mut doc) => {
                doc.insert(ID_FIELD.to_string(), Value::String(self.key().to_string()));
                Ok(doc)
            }
            _ => Err(RecordError::NotAnObject),
        }
    }

    /// Rebuild a record from a storage document.
    ///
    /// Storage-internal fields (`_id`, relevance score) are ignored.
    fn from_document(mut doc: Document) -> Result<Self, RecordError> {
        doc.remove(ID_FIELD);
        doc.remove(SCORE_FIELD);
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}
