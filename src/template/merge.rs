//! Document Merge Engine
//!
//! Two ways of combining YAML documents:
//!
//! - [`overlay_merge`]: structural merge. Mappings merge key by key, the
//!   overlay wins on scalar conflicts, sequences are concatenated with the
//!   overlay's items after the base's. Containers, volumes and ports are never
//!   matched by name or index; a merged sidecar is always an additional entry.
//! - [`point_patch`]: ordered RFC 6902 operations, one at a time. Used where a
//!   single scalar has to be appended to an existing list, e.g. extra
//!   command-line arguments of a sidecar.
//!
//! `overlay_merge(a, b)` and `overlay_merge(b, a)` differ in list order; the
//! caller decides which side comes first.

use crate::error::{Error, Result};
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use serde_json::Value;

/// Pointer tokens of the end of the first container's argument list in a pod
/// template, `/spec/template/spec/containers/0/args/-`
pub const FIRST_CONTAINER_ARGS_TOKENS: [&str; 7] =
    ["spec", "template", "spec", "containers", "0", "args", "-"];

// =============================================================================
// Document
// =============================================================================

/// A parsed YAML document with the name it was read under
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    name: String,
    root: Value,
}

impl Document {
    /// Parse raw YAML bytes
    ///
    /// The root must be a mapping; empty documents, scalars and sequences are
    /// rejected along with malformed YAML.
    pub fn parse(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let name = name.into();
        let root: Value = serde_yaml::from_slice(data).map_err(|e| Error::parse(&name, e))?;

        if !root.is_object() {
            return Err(Error::parse(
                name,
                format!("document root must be a mapping, found {}", kind_of(&root)),
            ));
        }

        Ok(Self { name, root })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_root(self) -> Value {
        self.root
    }

    /// Look up a value by JSON pointer, e.g. `/spec/template/spec/containers`
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.root.pointer(pointer)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(&self.root)?.into_bytes())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "an empty document",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

// =============================================================================
// Overlay Merge
// =============================================================================

/// Merge `overlay` into `base`
///
/// The result keeps the base document's name.
pub fn overlay_merge(base: Document, overlay: Document) -> Document {
    let Document { name, mut root } = base;
    merge_value(&mut root, overlay.root);
    Document { name, root }
}

/// Merge one tree into another in place
pub fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_value(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            base_items.extend(overlay_items);
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

// =============================================================================
// Point Patch
// =============================================================================

/// Apply RFC 6902 operations one after another
///
/// Fails on the first operation whose target path does not exist.
pub fn point_patch(base: Document, ops: &[PatchOperation]) -> Result<Document> {
    let Document { name, mut root } = base;

    for op in ops {
        json_patch::patch(&mut root, std::slice::from_ref(op)).map_err(|e| {
            Error::PatchFailed {
                name: name.clone(),
                reason: e.to_string(),
            }
        })?;
    }

    Ok(Document { name, root })
}

/// Build an `add` operation appending `value` to the list at `path`
pub fn append_operation(path: PointerBuf, value: &str) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path,
        value: Value::String(value.to_string()),
    })
}

/// One `add` operation per argument, appended to the first container's args
pub fn extra_argument_operations<S: AsRef<str>>(arguments: &[S]) -> Vec<PatchOperation> {
    arguments
        .iter()
        .map(|arg| {
            append_operation(
                PointerBuf::from_tokens(FIRST_CONTAINER_ARGS_TOKENS),
                arg.as_ref(),
            )
        })
        .collect()
}
