//! Canonicalizer
//!
//! Re-serializes documents through an untyped tree whose mappings are sorted
//! by key, so two generator runs that differ only in field order produce
//! byte-identical files. Only used when persisting; the in-memory bundle is
//! handed out as generated.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Canonicalize a YAML stream
///
/// Each document of a multi-document stream is canonicalized separately and
/// the stream is re-joined with `---` separators.
pub fn sanitize(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = String::new();

    for (index, document) in serde_yaml::Deserializer::from_slice(data).enumerate() {
        let value = Value::deserialize(document)?;
        if index > 0 {
            output.push_str("---\n");
        }
        output.push_str(&serde_yaml::to_string(&value)?);
    }

    Ok(output.into_bytes())
}

/// Canonicalize a file in place
///
/// Returns whether the file contents changed.
pub fn sanitize_file(path: &Path) -> Result<bool> {
    let original = std::fs::read(path)?;
    let sanitized = sanitize(&original).map_err(|e| match e {
        Error::Yaml(inner) => Error::parse(path.display().to_string(), inner),
        other => other,
    })?;

    if sanitized == original {
        debug!("{} already canonical", path.display());
        return Ok(false);
    }

    std::fs::write(path, &sanitized)?;
    debug!("Canonicalized {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    const UNSORTED: &str = r#"
spec:
  replicas: 2
  selector:
    matchLabels:
      app: csi
kind: Deployment
apiVersion: apps/v1
metadata:
  name: controller
  annotations:
    z: last
    a: first
"#;

    #[test]
    fn test_sanitize_sorts_keys() {
        let output = String::from_utf8(sanitize(UNSORTED.as_bytes()).unwrap()).unwrap();

        let api = output.find("apiVersion").unwrap();
        let kind = output.find("kind").unwrap();
        let metadata = output.find("metadata").unwrap();
        let spec = output.find("spec").unwrap();
        assert!(api < kind && kind < metadata && metadata < spec);
        assert!(output.find("a: first").unwrap() < output.find("z: last").unwrap());
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            UNSORTED,
            "b: [3, 1, 2]\na: {y: 1.5, x: true}\n",
            "kind: ConfigMap\ndata:\n  key: \"multi\\nline\"\n",
            "a: 1\n---\nb: 2\n",
        ];

        for input in inputs {
            let once = sanitize(input.as_bytes()).unwrap();
            let twice = sanitize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_sanitize_keeps_content() {
        let once = sanitize(UNSORTED.as_bytes()).unwrap();
        let before: Value = serde_yaml::from_str(UNSORTED).unwrap();
        let after: Value = serde_yaml::from_slice(&once).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_sanitize_multi_document() {
        let output = String::from_utf8(sanitize(b"b: 1\na: 2\n---\nd: 3\nc: 4\n").unwrap()).unwrap();
        assert_eq!(output, "a: 2\nb: 1\n---\nc: 4\nd: 3\n");
    }

    #[test]
    fn test_sanitize_rejects_malformed() {
        assert_matches!(sanitize(b"a: [1, 2\n"), Err(Error::Yaml(_)));
    }

    #[test]
    fn test_sanitize_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deployment.yaml");
        std::fs::write(&path, UNSORTED).unwrap();

        assert!(sanitize_file(&path).unwrap());
        assert!(!sanitize_file(&path).unwrap());

        let broken = tmp.path().join("broken.yaml");
        std::fs::write(&broken, "a: [1\n").unwrap();
        assert_matches!(sanitize_file(&broken), Err(Error::Parse { .. }));
    }
}
