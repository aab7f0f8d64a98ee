//! Dependency Graph
//!
//! This module holds the bookkeeping behind fine-grained invalidation:
//! which effect read which part of which cell, and which effects are waiting
//! to re-run.
//!
//! # Overview
//!
//! The graph is bipartite. On one side are tracking keys (a cell plus a path
//! inside its value), on the other side are effects. An edge means "this
//! effect read this key during its last run". Edges are owned by the cell
//! side, in a [`DependencyTable`] per cell, and each edge is mirrored by a
//! cleanup callback on the effect that removes it.
//!
//! # Design Decisions
//!
//! 1. Tables live with their cell rather than in one global map, so a cell
//!    that is dropped takes its edges with it and a write only scans the keys
//!    of the cell being written.
//!
//! 2. Effects are re-tracked from scratch on every run. There is no
//!    topological ordering: computed cells are effects too, and a computed
//!    cell that settles on an unchanged value stops propagation through the
//!    equality gate on its write.
//!
//! 3. The pending set is insertion-ordered (`indexmap`), which fixes the run
//!    order of a pass to the order effects were first invalidated.

mod ids;
mod key;
mod scheduler;
mod table;

pub use ids::{CellId, EffectId};
pub use key::{KeyScope, TrackingKey};
pub use scheduler::{Pass, Scheduler};
pub use table::DependencyTable;
