//! Name Resolver
//!
//! Deterministic node identities: `{prefix}-{index}` with the index
//! zero-padded to `max(2, digits(end))`. The same (index, end, prefix) always
//! yields the same identity, which lets a destroy pass find everything a
//! previous create pass made without any persisted state.

use crate::fleet::range::NodeRange;
use serde::{Deserialize, Serialize};

/// Minimum zero-padding applied to node indices
pub const MIN_PADDING_WIDTH: usize = 2;

/// Canonical name of one node, shared by its pool, volumes and domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Image file name of the volume at 1-based `position`
    pub fn volume_name(&self, position: usize) -> String {
        format!("{}-d{}.img", self.0, position)
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Padding width for a range ending at `end`
pub fn padding_width(end: u32) -> usize {
    end.to_string().len().max(MIN_PADDING_WIDTH)
}

/// Identity of `index` within a range ending at `end`
pub fn resolve(index: u32, end: u32, prefix: &str) -> NodeIdentity {
    let width = padding_width(end);
    NodeIdentity(format!("{}-{:0width$}", prefix, index, width = width))
}

/// Resolver bound to one prefix and one range
#[derive(Debug, Clone)]
pub struct NameResolver {
    prefix: String,
    range: NodeRange,
}

impl NameResolver {
    pub fn new(prefix: impl Into<String>, range: NodeRange) -> Self {
        Self {
            prefix: prefix.into(),
            range,
        }
    }

    pub fn resolve(&self, index: u32) -> NodeIdentity {
        resolve(index, self.range.end(), &self.prefix)
    }

    /// (index, identity) pairs in ascending index order
    pub fn identities(&self) -> impl Iterator<Item = (u32, NodeIdentity)> + '_ {
        self.range.indices().map(move |index| (index, self.resolve(index)))
    }
}
