//! Filesystem template store
//!
//! Resolves template names as paths relative to a root directory.

use crate::error::{Error, Result};
use crate::store::TemplateStore;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Template store rooted on a directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root_path: PathBuf,
}

impl DirectoryStore {
    /// Create a store reading from `root_path`
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    /// Map a template name to a path under the root
    ///
    /// Names must be relative and must not climb out of the root.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if name.is_empty() || escapes {
            return Err(Error::Configuration(format!(
                "Invalid template name: {:?}",
                name
            )));
        }

        Ok(self.root_path.join(relative))
    }
}

impl TemplateStore for DirectoryStore {
    fn read(&self, name: &str) -> Result<Bytes> {
        let path = self.resolve(name)?;
        debug!("Reading template {} from {}", name, path.display());

        match std::fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::AssetNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn test_store() -> (DirectoryStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("base")).unwrap();
        std::fs::write(tmp.path().join("base/node.yaml"), "kind: DaemonSet\n").unwrap();
        (DirectoryStore::new(tmp.path()), tmp)
    }

    #[test]
    fn test_read_nested_name() {
        let (store, _tmp) = test_store();

        let contents = store.read("base/node.yaml").unwrap();
        assert_eq!(contents.as_ref(), b"kind: DaemonSet\n");
    }

    #[test]
    fn test_missing_template() {
        let (store, _tmp) = test_store();

        let err = store.read("base/controller.yaml").unwrap_err();
        assert_matches!(err, Error::AssetNotFound { name } if name == "base/controller.yaml");
    }

    #[test]
    fn test_rejects_escaping_names() {
        let (store, _tmp) = test_store();

        assert_matches!(store.read("../secret.yaml"), Err(Error::Configuration(_)));
        assert_matches!(store.read("/etc/passwd"), Err(Error::Configuration(_)));
        assert_matches!(store.read(""), Err(Error::Configuration(_)));
        assert_matches!(store.read("base/../../secret.yaml"), Err(Error::Configuration(_)));
    }
}
