//! Runtime Configuration
//!
//! The caps that bound runaway propagation and the policy for writes aimed
//! at computed cells. Configuration is plain serde data so the templating
//! layer can ship it alongside its own settings as JSON.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default ceiling on nested effect runs.
pub const DEFAULT_MAX_EFFECT_DEPTH: usize = 100;

/// Default number of passes a single flush may make over the pending set.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 10;

/// What happens when a caller writes to a computed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputedWritePolicy {
    /// Discard the write and return `Ok`.
    #[default]
    Ignore,
    /// Return `Error::ComputedWrite`.
    Reject,
}

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of effects that may be executing at once on the call
    /// stack. Runs past this depth are dropped.
    pub max_effect_depth: usize,

    /// Maximum number of passes one flush makes. Effects still pending after
    /// the last pass are dropped.
    pub max_flush_passes: usize,

    /// Policy for external writes to computed cells.
    pub computed_writes: ComputedWritePolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_effect_depth: DEFAULT_MAX_EFFECT_DEPTH,
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
            computed_writes: ComputedWritePolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the effect depth ceiling.
    pub fn with_max_effect_depth(mut self, depth: usize) -> Self {
        self.max_effect_depth = depth;
        self
    }

    /// Set the flush pass cap.
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes;
        self
    }

    /// Set the computed-cell write policy.
    pub fn with_computed_writes(mut self, policy: ComputedWritePolicy) -> Self {
        self.computed_writes = policy;
        self
    }
}
