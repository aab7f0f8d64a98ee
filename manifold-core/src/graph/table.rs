//! Per-cell Dependency Table
//!
//! Each state cell owns a table mapping the paths read inside its value to
//! the effects that read them. Tracking adds entries, effect cleanup removes
//! them, and a write asks the table which effects the write invalidates.
//!
//! # Invalidation Rule
//!
//! A write at path `P` that replaces subtree `old` with subtree `new`
//! invalidates:
//!
//! 1. the shallow key at `P`;
//! 2. deep keys at `P` and at every ancestor of `P`;
//! 3. every key strictly below `P` whose resolved value differs between
//!    `old` and `new`, or all of them when either side is not composite.
//!
//! Siblings of `P` and shallow keys at ancestors of `P` are untouched, which
//! is what keeps a write to `user.name` from re-running an effect that only
//! read `user.age`.

use indexmap::{IndexMap, IndexSet};

use super::ids::EffectId;
use super::key::KeyScope;
use crate::value::{unchanged_at, KeyPath, Value};

/// Subscriptions for the paths of one cell.
#[derive(Debug, Default)]
pub struct DependencyTable {
    entries: IndexMap<(KeyPath, KeyScope), IndexSet<EffectId>>,
}

impl DependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `effect` as a reader of `path`. Returns false if it already
    /// was one.
    pub fn subscribe(&mut self, path: KeyPath, scope: KeyScope, effect: EffectId) -> bool {
        self.entries.entry((path, scope)).or_default().insert(effect)
    }

    /// Remove a subscription. The key itself is dropped with its last
    /// subscriber.
    pub fn unsubscribe(&mut self, path: &KeyPath, scope: KeyScope, effect: EffectId) {
        let key = (path.clone(), scope);
        if let Some(subscribers) = self.entries.get_mut(&key) {
            subscribers.shift_remove(&effect);
            if subscribers.is_empty() {
                self.entries.shift_remove(&key);
            }
        }
    }

    /// Effects subscribed to exactly this key, in subscription order.
    pub fn subscribers(&self, path: &KeyPath, scope: KeyScope) -> impl Iterator<Item = EffectId> + '_ {
        self.entries
            .get(&(path.clone(), scope))
            .into_iter()
            .flat_map(|subscribers| subscribers.iter().copied())
    }

    /// Number of distinct keys with at least one subscriber.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of distinct effects subscribed to any key.
    pub fn subscriber_count(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .collect::<IndexSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `effect` is subscribed to this key.
    pub fn contains(&self, path: &KeyPath, scope: KeyScope, effect: EffectId) -> bool {
        self.entries
            .get(&(path.clone(), scope))
            .is_some_and(|subscribers| subscribers.contains(&effect))
    }

    /// Effects invalidated by a write at `at` that replaced `old` with `new`.
    ///
    /// `keep_exact` filters the shallow subscribers of `at` itself; the other
    /// rules are unconditional. The result is in key order, then
    /// subscription order, without duplicates.
    pub fn invalidated<F>(&self, at: &KeyPath, old: &Value, new: &Value, keep_exact: F) -> IndexSet<EffectId>
    where
        F: Fn(EffectId) -> bool,
    {
        let coarse = !(old.is_composite() && new.is_composite());
        let mut hit = IndexSet::new();

        for ((path, scope), subscribers) in &self.entries {
            if path.is_prefix_of(at) {
                match scope {
                    KeyScope::Deep => hit.extend(subscribers.iter().copied()),
                    KeyScope::Shallow if path == at => {
                        hit.extend(subscribers.iter().copied().filter(|id| keep_exact(*id)))
                    }
                    KeyScope::Shallow => {}
                }
            } else if let Some(below) = at.relative(path) {
                if coarse || !unchanged_at(old, new, below) {
                    hit.extend(subscribers.iter().copied());
                }
            }
        }

        hit
    }
}
