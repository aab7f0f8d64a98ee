//! Manifold Core
//!
//! This crate provides the reactive state engine behind the Manifold
//! templating layer. It implements:
//!
//! - State cells holding nested data, tracked per property and index
//! - Computed cells derived from other cells
//! - Effects that re-run when the data they read changes
//! - A batching scheduler with bounded recursion
//!
//! Template parsing and DOM binding live in the layers built on top of this
//! crate; they create cells, register effects and read values through the
//! API exported here.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: The value model, paths into values, and deep equality
//! - `graph`: Tracking keys, per-cell dependency tables, and the scheduler
//! - `reactive`: State cells, computed cells, effects, and the runtime
//! - `config`: Runtime limits and policies
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use manifold_core::reactive::Runtime;
//! use serde_json::json;
//! use std::{cell::Cell, rc::Rc};
//!
//! let rt = Runtime::new();
//! let store = rt.state(json!({ "user": { "name": "Alice", "age": 25 } }));
//!
//! let name_runs = Rc::new(Cell::new(0));
//! let (s, runs) = (store.clone(), name_runs.clone());
//! rt.effect(move || {
//!     s.value().at("user").at("name").get();
//!     runs.set(runs.get() + 1);
//! });
//!
//! // Only the effect that read `user.name` re-runs
//! store.value().at("user").set("name", "Bob").unwrap();
//! store.value().at("user").set("age", 26).unwrap();
//! assert_eq!(name_runs.get(), 2);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod value;

pub use config::{ComputedWritePolicy, RuntimeConfig};
pub use error::{Error, Result};
pub use reactive::{
    batch, computed, computed_named, effect, lookup, on_cleanup, state, state_named, untracked,
    Disposer, Overflow, Runtime, State, Tracked,
};
pub use value::{is_equal, KeyPath, MapKey, PathSegment, Value, ValueSet};
