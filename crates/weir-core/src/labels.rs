//! Canonicalized label sets and the stale-series marker.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::CoreError;

/// The distinguished NaN payload that marks the end of a series.
///
/// Regular float comparison cannot see it (NaN != NaN), so detection
/// compares bit patterns.
pub const STALE_NAN: f64 = f64::from_bits(0x7ff0_0000_0000_0002);

/// True when the sample value is the stale-series marker.
pub fn is_stale_nan(value: f64) -> bool {
    value.to_bits() == STALE_NAN.to_bits()
}

/// An immutable, canonicalized set of label pairs.
///
/// Pairs are sorted by key at construction and the inner storage is shared
/// by reference: cloning a `LabelSet` is an `Arc` bump. Empty keys are
/// rejected; duplicate keys keep the last value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LabelSet {
    pairs: Arc<Vec<Label>>,
}

/// One `name=value` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl LabelSet {
    /// An empty label set
    pub fn empty() -> Self {
        LabelSet {
            pairs: Arc::new(Vec::new()),
        }
    }

    /// Canonicalize pairs into a label set. Empty names are rejected;
    /// duplicates collapse to the last value seen.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Result<Self, CoreError> {
        let mut map = BTreeMap::new();
        for (name, value) in pairs {
            if name.is_empty() {
                return Err(CoreError::Other("label name must not be empty".to_string()));
            }
            map.insert(name, value);
        }
        Ok(LabelSet {
            pairs: Arc::new(map.into_iter().map(|(name, value)| Label { name, value }).collect()),
        })
    }

    /// Convenience constructor from string pairs; panics on empty names,
    /// so only for use with literal inputs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        LabelSet::new(
            pairs
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        )
        .unwrap_or_else(|err| panic!("invalid literal label set: {}", err))
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no labels remain
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The value of a label, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .binary_search_by(|label| label.name.as_str().cmp(name))
            .ok()
            .map(|index| self.pairs[index].value.as_str())
    }

    /// Iterate pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.pairs.iter()
    }

    /// A builder seeded with this set's pairs
    pub fn to_builder(&self) -> LabelSetBuilder {
        LabelSetBuilder {
            pairs: self
                .pairs
                .iter()
                .map(|label| (label.name.clone(), label.value.clone()))
                .collect(),
        }
    }

    /// A stable 64-bit hash of the canonical form
    pub fn hash_value(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Debug for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// Mutable accumulation of label pairs, finished into a [`LabelSet`].
#[derive(Default)]
pub struct LabelSetBuilder {
    pairs: BTreeMap<String, String>,
}

impl LabelSetBuilder {
    /// An empty builder
    pub fn new() -> Self {
        LabelSetBuilder::default()
    }

    /// Set a label, overwriting any existing value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.insert(name.into(), value.into());
        self
    }

    /// Remove a label
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.pairs.remove(name);
        self
    }

    /// The current value of a label
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.get(name).map(String::as_str)
    }

    /// Finish into a canonical label set. Empty names are rejected.
    pub fn build(self) -> Result<LabelSet, CoreError> {
        LabelSet::new(self.pairs)
    }
}
