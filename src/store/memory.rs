//! In-memory template store

use crate::error::{Error, Result};
use crate::store::TemplateStore;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Template store backed by a map of name to contents
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: BTreeMap<String, Bytes>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document
    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<Bytes>) {
        self.documents.insert(name.into(), contents.into());
    }

    /// Builder-style variant of [`MemoryStore::insert`]
    pub fn with(mut self, name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        self.insert(name, contents);
        self
    }

    /// Names of all stored documents, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl TemplateStore for MemoryStore {
    fn read(&self, name: &str) -> Result<Bytes> {
        self.documents
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AssetNotFound {
                name: name.to_string(),
            })
    }
}
