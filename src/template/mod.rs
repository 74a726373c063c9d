//! Template processing
//!
//! Token substitution over raw bytes and the two document merge strategies.

pub mod merge;
pub mod replace;

pub use merge::{
    extra_argument_operations, merge_value, overlay_merge, point_patch, Document,
    FIRST_CONTAINER_ARGS_TOKENS,
};
pub use replace::Replacements;
