//! Input batch loading
//!
//! A batch is a JSON object mapping each collection name to an array of
//! documents. The shape is checked up front so that a malformed batch is
//! rejected before any database work starts.

use serde_json::{Map, Value};
use std::path::Path;

use crate::error::InputError;

/// A single source document
pub type Document = Map<String, Value>;

/// Documents grouped by collection, in input order
#[derive(Debug, Clone, Default)]
pub struct InputBatch {
    collections: Vec<(String, Vec<Document>)>,
}

impl InputBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a collection to the batch
    pub fn push(&mut self, collection: impl Into<String>, documents: Vec<Document>) {
        self.collections.push((collection.into(), documents));
    }

    /// Validate and convert a parsed JSON value
    pub fn from_value(value: Value) -> Result<Self, InputError> {
        let Value::Object(root) = value else {
            return Err(InputError::NotAnObject);
        };

        let mut batch = InputBatch::new();
        for (collection, documents) in root {
            let Value::Array(items) = documents else {
                return Err(InputError::NotAList(collection));
            };

            let mut parsed = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(document) => parsed.push(document),
                    _ => {
                        return Err(InputError::DocumentNotAnObject {
                            collection,
                            index,
                        });
                    }
                }
            }
            batch.push(collection, parsed);
        }

        Ok(batch)
    }

    /// Parse a batch from JSON text
    pub fn parse(content: &str) -> Result<Self, InputError> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| InputError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Load a batch from a JSON file
    pub fn load(path: &Path) -> Result<Self, InputError> {
        if !path.exists() {
            return Err(InputError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| InputError::ReadFailed(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Collection names in input order
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate collections with their documents
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.collections
            .iter()
            .map(|(name, documents)| (name.as_str(), documents.as_slice()))
    }

    /// Number of collections in the batch
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Check if the batch holds no collections
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
