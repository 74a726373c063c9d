//! Built-in driver definitions
//!
//! Composition models shipped with the generator, looked up by name from the
//! CLI. Custom drivers are loaded from YAML with
//! [`GeneratorConfig::from_yaml`](crate::config::GeneratorConfig::from_yaml).

pub mod aws_ebs;

use crate::config::GeneratorConfig;

/// Names accepted by [`by_name`]
pub fn names() -> &'static [&'static str] {
    &[aws_ebs::NAME]
}

/// Look up a built-in driver definition
pub fn by_name(name: &str) -> Option<GeneratorConfig> {
    match name {
        aws_ebs::NAME => Some(aws_ebs::config()),
        _ => None,
    }
}
