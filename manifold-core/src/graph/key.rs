//! Tracking keys: the unit of invalidation.

use std::fmt;

use super::ids::CellId;
use crate::value::{KeyPath, PathSegment};

/// How much of the value at a path a read depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// Only the value found at exactly this path. Recorded by navigation and
    /// leaf reads.
    Shallow,
    /// The whole subtree rooted at this path. Recorded by snapshots, so any
    /// write at, above or below the path invalidates it.
    Deep,
}

/// A cell identity plus a path within that cell's value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    pub cell: CellId,
    pub path: KeyPath,
    pub scope: KeyScope,
}

impl TrackingKey {
    pub fn new(cell: CellId, path: KeyPath, scope: KeyScope) -> Self {
        Self { cell, path, scope }
    }

    /// The part of this key's path strictly below `container` in `cell`, if
    /// the key reads something inside it.
    pub fn below(&self, cell: CellId, container: &KeyPath) -> Option<&[PathSegment]> {
        if self.cell != cell {
            return None;
        }
        container.relative(&self.path).filter(|rest| !rest.is_empty())
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            KeyScope::Shallow => "",
            KeyScope::Deep => "/**",
        };
        write!(f, "{}:{}{}", self.cell, self.path, scope)
    }
}
