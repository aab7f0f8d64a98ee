//! Error types for the reactive engine.
//!
//! Only caller mistakes surface as errors: writing through a path that does
//! not exist, treating a scalar as a container, writing to a computed cell
//! when the runtime is configured to reject such writes. The engine's own
//! safety valves (recursion and flush caps, re-entrant runs) are not errors;
//! they are reported through `tracing` and the runtime's overflow hook.

use thiserror::Error;

use crate::value::KeyPath;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by state-cell writes and configuration loading.
#[derive(Debug, Error)]
pub enum Error {
    /// An external write targeted a computed cell and the runtime is
    /// configured with `ComputedWritePolicy::Reject`.
    #[error("cannot write to computed state `{name}`")]
    ComputedWrite { name: String },

    /// An intermediate segment of a write path does not exist.
    #[error("no value at path `{path}`")]
    MissingPath { path: KeyPath },

    /// A child write or container method was applied to a value of the
    /// wrong kind.
    #[error("value at `{path}` is {kind}, not a container supporting this operation")]
    NotContainer { path: KeyPath, kind: &'static str },

    /// An array index past the end (writing at `len` appends).
    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A segment kind that does not address this container kind.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}
