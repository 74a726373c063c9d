//! Token Substitution
//!
//! Literal placeholder replacement over raw template bytes. No knowledge of
//! document structure: `${NAMESPACE}` is replaced wherever it occurs.

use crate::error::{Error, Result};

/// Ordered list of (placeholder, value) pairs
///
/// Pairs are applied in order, so a value introduced by an earlier pair can
/// itself contain placeholders that a later pair rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    pairs: Vec<(String, String)>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat `[placeholder, value, placeholder, value, ...]` list
    ///
    /// Fails when the list has an odd number of elements.
    pub fn from_flat<S: AsRef<str>>(flat: &[S]) -> Result<Self> {
        if flat.len() % 2 != 0 {
            return Err(Error::Configuration(format!(
                "Replacement list must contain placeholder/value pairs, got {} elements",
                flat.len()
            )));
        }

        let pairs = flat
            .chunks_exact(2)
            .map(|pair| (pair[0].as_ref().to_string(), pair[1].as_ref().to_string()))
            .collect();
        Ok(Self { pairs })
    }

    /// Append a pair
    pub fn push(&mut self, placeholder: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((placeholder.into(), value.into()));
    }

    /// Builder-style variant of [`Replacements::push`]
    pub fn with(mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(placeholder, value);
        self
    }

    /// Concatenate: pairs of `self` apply before pairs of `later`
    pub fn chain(&self, later: &Replacements) -> Replacements {
        let mut pairs = self.pairs.clone();
        pairs.extend(later.pairs.iter().cloned());
        Replacements { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Replace every occurrence of every placeholder, pair by pair
    pub fn apply(&self, input: &[u8]) -> Vec<u8> {
        let mut output = input.to_vec();
        for (placeholder, value) in &self.pairs {
            output = replace_all(&output, placeholder.as_bytes(), value.as_bytes());
        }
        output
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Replacements {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Replace non-overlapping occurrences of `from`, scanning left to right
fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return haystack.to_vec();
    }

    let mut output = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = find(rest, from) {
        output.extend_from_slice(&rest[..pos]);
        output.extend_from_slice(to);
        rest = &rest[pos + from.len()..];
    }
    output.extend_from_slice(rest);
    output
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
