//! Paths into nested values.
//!
//! A [`KeyPath`] addresses a node inside a cell's value. Paths double as the
//! property part of a tracking key, so they are hashed and compared often and
//! are kept inline for the common shallow case.

use std::fmt;
use std::ops::Deref;

use smallvec::SmallVec;

use super::{is_equal, MapKey, Value};

/// One step into a nested value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Field of an object.
    Key(String),
    /// Element of an array.
    Index(usize),
    /// Entry of a map.
    Entry(MapKey),
    /// Element count of the container (or string) at the parent path.
    /// Only valid as the last segment.
    Length,
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl From<MapKey> for PathSegment {
    fn from(key: MapKey) -> Self {
        PathSegment::Entry(key)
    }
}

/// Location of a node inside a cell's value. The empty path is the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(SmallVec<[PathSegment; 4]>);

impl KeyPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut path = self.clone();
        path.0.push(segment);
        path
    }

    /// This path without its last segment. The root has no parent.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].iter().cloned().collect()))
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// True when `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &KeyPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// The segments of `other` below `self`, if `self` is a prefix of it.
    pub fn relative<'a>(&self, other: &'a KeyPath) -> Option<&'a [PathSegment]> {
        self.is_prefix_of(other).then(|| &other.0[self.0.len()..])
    }
}

impl Deref for KeyPath {
    type Target = [PathSegment];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<PathSegment> for KeyPath {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(root)");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => f.write_str(key)?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
                PathSegment::Entry(MapKey::String(key)) => write!(f, "[{key:?}]")?,
                PathSegment::Entry(key) => write!(f, "[{key}]")?,
                PathSegment::Length if i == 0 => f.write_str("length")?,
                PathSegment::Length => f.write_str(".length")?,
            }
        }
        Ok(())
    }
}

/// What a path resolves to: a node of the tree, or a synthesized length.
#[derive(Debug, Clone, Copy)]
pub enum Slot<'a> {
    Value(&'a Value),
    Len(usize),
}

impl Slot<'_> {
    /// Deep equality between two resolved slots.
    pub fn same_as(&self, other: &Slot<'_>) -> bool {
        match (self, other) {
            (Slot::Value(a), Slot::Value(b)) => is_equal(a, b),
            (Slot::Len(a), Slot::Len(b)) => a == b,
            _ => false,
        }
    }
}

/// Whether the slot at `path` resolves the same way below `old` and `new`.
/// A path missing on both sides counts as unchanged.
pub fn unchanged_at(old: &Value, new: &Value, path: &[PathSegment]) -> bool {
    match (resolve(old, path), resolve(new, path)) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_as(&b),
        _ => false,
    }
}

/// Resolve `path` below `root`. Returns `None` when any segment is missing.
pub fn resolve<'a>(root: &'a Value, path: &[PathSegment]) -> Option<Slot<'a>> {
    let mut node = root;
    for (i, segment) in path.iter().enumerate() {
        if let PathSegment::Length = segment {
            return if i + 1 == path.len() {
                node.len().map(Slot::Len)
            } else {
                None
            };
        }
        node = node.child(segment)?;
    }
    Some(Slot::Value(node))
}
