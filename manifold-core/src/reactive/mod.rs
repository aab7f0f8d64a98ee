//! Reactive Primitives
//!
//! This module implements the reactive engine: state cells, computed cells
//! and effects, tied together by a runtime.
//!
//! # Concepts
//!
//! ## State Cells
//!
//! A [`State`] holds a nested [`Value`](crate::value::Value). Reads inside a
//! running effect are recorded per path, so an effect that read `user.name`
//! is re-run when `user.name` changes and not when `user.age` does. Writes
//! that leave the value deep-equal to what it was are dropped.
//!
//! ## Computed Cells
//!
//! A computed cell is a state cell written only by its own internal effect,
//! which re-derives the value whenever something it read changes.
//!
//! ## Effects
//!
//! An effect is a side-effecting computation that re-runs whenever data it
//! read changes. Its dependencies are rebuilt on every run, so conditional
//! reads work as expected.
//!
//! # Implementation Notes
//!
//! Tracking is ambient: each [`Runtime`] keeps an execution context naming
//! the running effect, and a read consults it instead of receiving the effect
//! as an argument. Invalidated effects are queued in an insertion-ordered
//! pending set and flushed synchronously, with [`Runtime::batch`] available
//! to coalesce several writes into one flush.
//!
//! Everything here is single-threaded. Use one runtime per thread (the free
//! functions use the thread's default runtime).

mod computed;
mod context;
mod effect;
mod runtime;
mod state;
mod tracked;

pub use computed::{computed, computed_named};
pub use effect::Disposer;
pub use runtime::{batch, effect, lookup, on_cleanup, state, state_named, untracked, Overflow, Runtime};
pub use state::State;
pub use tracked::{compare_values, Tracked};
