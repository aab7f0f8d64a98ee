//! Tracked views into a state cell.
//!
//! A [`Tracked`] is a cell handle plus a path. Navigating with [`Tracked::at`]
//! records a shallow read of the child path; [`Tracked::get`] snapshots the
//! subtree and records a deep read. Writes through a view go back to the
//! cell, so every write compares, stores and then triggers exactly the keys
//! it changed.
//!
//! Views are cheap and hold no borrow of the cell. A view whose path no
//! longer resolves reads as `Null` and its writes fail with
//! [`Error::MissingPath`].

use std::cmp::Ordering;
use std::fmt;

use super::state::{State, Writer};
use crate::error::{Error, Result};
use crate::graph::KeyScope;
use crate::value::{resolve, KeyPath, MapKey, PathSegment, Slot, Value};

/// A tracked location inside a state cell.
#[derive(Clone)]
pub struct Tracked {
    cell: State,
    path: KeyPath,
}

impl Tracked {
    pub(crate) fn new(cell: State, path: KeyPath) -> Self {
        Self { cell, path }
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// The cell this view reads from.
    pub fn state(&self) -> &State {
        &self.cell
    }

    /// View of a child. Records a shallow read of the child path.
    pub fn at(&self, segment: impl Into<PathSegment>) -> Tracked {
        let path = self.path.child(segment.into());
        self.cell.track(&path, KeyScope::Shallow);
        Tracked::new(self.cell.clone(), path)
    }

    /// View of a map entry.
    pub fn entry(&self, key: impl Into<MapKey>) -> Tracked {
        self.at(PathSegment::Entry(key.into()))
    }

    /// Snapshot of the subtree, `Null` when the path does not resolve.
    /// Records a deep read.
    pub fn get(&self) -> Value {
        self.cell.track(&self.path, KeyScope::Deep);
        self.get_untracked()
    }

    pub fn get_untracked(&self) -> Value {
        self.with(|node| node.cloned().unwrap_or_default())
    }

    /// Whether the path currently resolves to a value.
    pub fn exists(&self) -> bool {
        self.cell.track(&self.path, KeyScope::Shallow);
        self.with(|node| node.is_some())
    }

    /// Element count of the container or string at this path. Records a read
    /// of the length key only, so element rewrites that keep the count do
    /// not invalidate it.
    pub fn len(&self) -> Option<usize> {
        let path = self.path.child(PathSegment::Length);
        self.cell.track(&path, KeyScope::Shallow);
        self.cell.peek(|root| match resolve(root, &path) {
            Some(Slot::Len(len)) => Some(len),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len().map_or(true, |len| len == 0)
    }

    /// Whether a map has an entry for `key` (or an object has a field named
    /// `key`). Records a read of that entry only.
    pub fn has(&self, key: impl Into<MapKey>) -> bool {
        let key = key.into();
        let segment = self.with(|node| match (node, &key) {
            (Some(Value::Object(_)), MapKey::String(field)) => PathSegment::Key(field.clone()),
            _ => PathSegment::Entry(key.clone()),
        });
        let path = self.path.child(segment);
        self.cell.track(&path, KeyScope::Shallow);
        self.cell.peek(|root| resolve(root, &path).is_some())
    }

    /// Whether a set or array contains a deep-equal element.
    pub fn contains(&self, value: &Value) -> bool {
        self.cell.track(&self.path, KeyScope::Deep);
        self.with(|node| match node {
            Some(Value::Set(set)) => set.contains(value),
            Some(Value::Array(items)) => items.iter().any(|item| item == value),
            _ => false,
        })
    }

    /// Segments addressing the children of the container at this path.
    pub fn keys(&self) -> Vec<PathSegment> {
        self.cell.track(&self.path, KeyScope::Deep);
        self.with(|node| match node {
            Some(Value::Object(fields)) => fields.keys().cloned().map(PathSegment::Key).collect(),
            Some(Value::Map(entries)) => entries.keys().cloned().map(PathSegment::Entry).collect(),
            Some(Value::Array(items)) => (0..items.len()).map(PathSegment::Index).collect(),
            _ => Vec::new(),
        })
    }

    /// One view per array element. Records a read of the length and of each
    /// index.
    pub fn elements(&self) -> Vec<Tracked> {
        let len = self.len().unwrap_or(0);
        let is_array = self.with(|node| matches!(node, Some(Value::Array(_))));
        if !is_array {
            return Vec::new();
        }
        (0..len).map(|index| self.at(index)).collect()
    }

    fn with<R>(&self, f: impl FnOnce(Option<&Value>) -> R) -> R {
        self.cell.peek(|root| match resolve(root, &self.path) {
            Some(Slot::Value(node)) => f(Some(node)),
            _ => f(None),
        })
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write a child. Writing index `len` of an array appends.
    pub fn set(&self, segment: impl Into<PathSegment>, value: impl Into<Value>) -> Result<bool> {
        let path = self.path.child(segment.into());
        self.cell.write_as(Writer::Caller, &path, value.into())
    }

    /// Replace the value at this path.
    pub fn replace(&self, value: impl Into<Value>) -> Result<bool> {
        self.cell.write_as(Writer::Caller, &self.path, value.into())
    }

    /// Insert or overwrite a map entry.
    pub fn insert(&self, key: impl Into<MapKey>, value: impl Into<Value>) -> Result<bool> {
        self.set(PathSegment::Entry(key.into()), value)
    }

    /// Delete an object field or map entry, returning it.
    pub fn remove(&self, segment: impl Into<PathSegment>) -> Result<Option<Value>> {
        let path = self.path.child(segment.into());
        self.cell.remove_at(&path)
    }

    /// Append an element. Returns the new length, or the unchanged length
    /// when the write to a computed cell is ignored.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        match self.array_op(move |items| {
            items.push(value);
            items.len()
        })? {
            Some(len) => Ok(len),
            None => Ok(self.current_len()),
        }
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        Ok(self.array_op(Vec::pop)?.flatten())
    }

    /// Remove the first element.
    pub fn shift(&self) -> Result<Option<Value>> {
        Ok(self
            .array_op(|items| (!items.is_empty()).then(|| items.remove(0)))?
            .flatten())
    }

    /// Prepend an element. Returns the new length, same as [`push`](Self::push).
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        match self.array_op(move |items| {
            items.insert(0, value);
            items.len()
        })? {
            Some(len) => Ok(len),
            None => Ok(self.current_len()),
        }
    }

    /// Remove `delete` elements starting at `start` and insert `items` in
    /// their place. Out-of-range arguments are clamped. Returns the removed
    /// elements.
    pub fn splice<I, V>(&self, start: usize, delete: usize, items: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let inserted: Vec<Value> = items.into_iter().map(Into::into).collect();
        self.array_op(move |array| {
            let start = start.min(array.len());
            let end = start.saturating_add(delete).min(array.len());
            array.splice(start..end, inserted).collect()
        })
        .map(Option::unwrap_or_default)
    }

    /// Sort with the natural order of values (see [`compare_values`]).
    pub fn sort(&self) -> Result<()> {
        self.array_op(|items| items.sort_by(compare_values)).map(drop)
    }

    /// Sort with a custom comparator. The comparator runs while the cell is
    /// being written and must not read it.
    pub fn sort_by<F>(&self, compare: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.array_op(|items| items.sort_by(compare)).map(drop)
    }

    pub fn reverse(&self) -> Result<()> {
        self.array_op(|items| items.reverse()).map(drop)
    }

    /// Add to a set. Returns false if a deep-equal element was present.
    pub fn add(&self, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        let path = self.path.clone();
        self.cell.mutate(&self.path, move |node| match node {
            Value::Set(set) => Ok(set.insert(value)),
            other => Err(Error::NotContainer {
                path,
                kind: other.kind(),
            }),
        })
        .map(Option::unwrap_or_default)
    }

    /// Remove from a set. Returns whether an element was removed.
    pub fn delete(&self, value: &Value) -> Result<bool> {
        let path = self.path.clone();
        self.cell.mutate(&self.path, move |node| match node {
            Value::Set(set) => Ok(set.remove(value)),
            other => Err(Error::NotContainer {
                path,
                kind: other.kind(),
            }),
        })
        .map(Option::unwrap_or_default)
    }

    /// Empty the container at this path.
    pub fn clear(&self) -> Result<()> {
        let path = self.path.clone();
        self.cell.mutate(&self.path, move |node| {
            match node {
                Value::Set(set) => set.clear(),
                Value::Map(entries) => entries.clear(),
                Value::Object(fields) => fields.clear(),
                Value::Array(items) => items.clear(),
                other => {
                    return Err(Error::NotContainer {
                        path,
                        kind: other.kind(),
                    })
                }
            }
            Ok(())
        })
        .map(drop)
    }

    /// Element count at this path without tracking.
    fn current_len(&self) -> usize {
        self.cell
            .peek(|root| match resolve(root, &self.path) {
                Some(Slot::Value(node)) => node.len(),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn array_op<R, F>(&self, op: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut Vec<Value>) -> R,
    {
        let path = self.path.clone();
        self.cell.mutate(&self.path, move |node| match node {
            Value::Array(items) => Ok(op(items)),
            other => Err(Error::NotContainer {
                path,
                kind: other.kind(),
            }),
        })
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("state", &self.cell.name())
            .field("path", &format_args!("{}", self.path))
            .finish()
    }
}

/// Natural order used by [`Tracked::sort`]: null, booleans, numbers,
/// strings, dates, then everything else in its current order.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Date(_) => 4,
            _ => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
