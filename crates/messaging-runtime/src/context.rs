//! Operation context carried through queue calls.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution context of a queue operation.
///
/// Carries the trace id that links the operation to the causal chain it is
/// part of. Envelopes created from a context inherit its trace id, and log
/// events emitted on its behalf are tagged with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    trace_id: Option<String>,
}

impl Context {
    /// Context without a trace id
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to the given trace id
    pub fn from_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
        }
    }

    /// Context for an optional trace id, e.g. the one stored on an envelope
    pub fn from_optional_trace_id(trace_id: Option<&str>) -> Self {
        Self {
            trace_id: trace_id.map(str::to_string),
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.trace_id.as_deref().unwrap_or("---"))
    }
}
