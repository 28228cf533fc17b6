//! Merge-job idempotency keys
//!
//! A merge job records that an N-to-1 fusion finished for a particular set of
//! inputs. The key is canonical: the same inputs in any order produce the same
//! string.

use super::asset::AssetType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between canonical key components
pub const MERGE_KEY_DELIMITER: &str = "-";

/// Order-independent identity of a set of merge inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeKey(String);

impl MergeKey {
    /// Key over catalog ids, sorted numerically ("7,3" and "3,7" both give "3-7")
    pub fn from_ids(ids: &[i64]) -> Self {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let parts: Vec<String> = sorted.iter().map(|id| id.to_string()).collect();
        MergeKey(parts.join(MERGE_KEY_DELIMITER))
    }

    /// Key over textual labels, sorted lexicographically
    ///
    /// Used for merges keyed by calendar day, where ISO dates sort chronologically.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sorted: Vec<String> = labels.into_iter().map(Into::into).collect();
        sorted.sort();
        sorted.dedup();
        MergeKey(sorted.join(MERGE_KEY_DELIMITER))
    }

    /// Wrap a key read back from the catalog
    pub fn from_stored(value: impl Into<String>) -> Self {
        MergeKey(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A completed N-to-1 fusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeJob {
    pub parent_type: AssetType,
    pub child_type: AssetType,
    pub parent_ids: MergeKey,
}

impl MergeJob {
    pub fn new(parent_type: AssetType, child_type: AssetType, parent_ids: MergeKey) -> Self {
        Self {
            parent_type,
            child_type,
            parent_ids,
        }
    }
}
