//! Scan metadata: a flat, string-keyed property map.
//!
//! A `ScanMetadata` travels with every session. It is seeded by the caller
//! (scan parameters, origin, operator notes), extended by the recorder at start
//! and finish (timestamps, duration, point count, throughput, status), and
//! finally written out as `<base>_metadata.json` and as TDMS root properties.
//!
//! Keys are kept sorted so the JSON artifact is stable across runs.
//!
//! ## `MetadataBuilder`
//!
//! A builder for assembling the caller-supplied part step by step:
//!
//! ```rust
//! use beamscan::metadata::MetadataBuilder;
//!
//! let metadata = MetadataBuilder::new()
//!     .experiment_name("beam profile")
//!     .parameter("dwell_time", 0.5)
//!     .parameter("daq_channel", 0)
//!     .build();
//! assert_eq!(metadata.get("daq_channel"), Some(&serde_json::json!(0)));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{btree_map, BTreeMap};

/// Flat key/value metadata for one scan session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ScanMetadata {
    entries: BTreeMap<String, Value>,
}

impl ScanMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one entry, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Looks up one entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Copies every entry of `other` over this map (last writer wins).
    pub fn merge(&mut self, other: &ScanMetadata) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for ScanMetadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A builder for constructing `ScanMetadata` instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: ScanMetadata,
}

impl MetadataBuilder {
    /// New empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `experiment_name`.
    pub fn experiment_name(mut self, name: &str) -> Self {
        self.inner.insert("experiment_name", name);
        self
    }

    /// Sets `description`.
    pub fn description(mut self, description: &str) -> Self {
        self.inner.insert("description", description);
        self
    }

    /// Sets an arbitrary entry.
    pub fn parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.inner.insert(key, value);
        self
    }

    /// Stamps `software_version` with this crate's version.
    pub fn software_version(mut self) -> Self {
        self.inner.insert("software_version", env!("CARGO_PKG_VERSION"));
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> ScanMetadata {
        self.inner
    }
}
