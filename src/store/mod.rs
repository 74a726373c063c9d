//! Template Stores
//!
//! Lookup of raw template documents by name. The generator only ever reads
//! through [`TemplateStore`], so templates can live in memory, on disk or
//! anywhere else that answers synchronously and deterministically.

mod directory;
mod memory;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

use crate::error::Result;
use bytes::Bytes;

// =============================================================================
// TemplateStore Trait
// =============================================================================

/// Source of named template documents
///
/// A lookup for a name that does not exist must fail with
/// [`Error::AssetNotFound`](crate::error::Error::AssetNotFound).
pub trait TemplateStore: Send + Sync {
    /// Read the raw bytes of a named document
    fn read(&self, name: &str) -> Result<Bytes>;
}

impl<T: TemplateStore + ?Sized> TemplateStore for &T {
    fn read(&self, name: &str) -> Result<Bytes> {
        (**self).read(name)
    }
}
