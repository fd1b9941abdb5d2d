//! Error types for the schedule engine.
//!
//! Schedule primitives report a [`ScheduleError`]; the crate-level
//! [`TenschedError`] wraps it together with I/O and serialization failures.

use crate::ir::node::NodeId;
use serde::{Serialize, Deserialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum TenschedError {
    /// A schedule primitive rejected its request
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Malformed module or script JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised by a schedule primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ScheduleError {
    /// The kind of schedule error
    pub kind: ScheduleErrorKind,
    /// The error message
    pub message: String,
    /// Offending node, if any
    pub node: Option<NodeId>,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(node) = self.node {
            write!(f, " (at {})", node)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleErrorKind {
    /// Node is not of the kind the primitive operates on
    InvalidNodeKind,
    /// Access index out of range, gather/scatter or rank mismatch
    UnsupportedAccessPattern,
    /// Rewrite would not leave exactly one writer of the new tensor
    AmbiguousRewriteResult,
    /// Destination tensor has no buffer bound
    UnboundBuffer,
    /// Target block does not contain exactly one store
    MultiplicityViolation,
    /// No legal sequence to splice the new block into
    InsertionPointNotFound,
}

impl fmt::Display for ScheduleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleErrorKind::InvalidNodeKind => "invalid node kind",
            ScheduleErrorKind::UnsupportedAccessPattern => "unsupported access pattern",
            ScheduleErrorKind::AmbiguousRewriteResult => "ambiguous rewrite result",
            ScheduleErrorKind::UnboundBuffer => "unbound buffer",
            ScheduleErrorKind::MultiplicityViolation => "multiplicity violation",
            ScheduleErrorKind::InsertionPointNotFound => "insertion point not found",
        };
        f.write_str(name)
    }
}

impl ScheduleError {
    pub fn new(kind: ScheduleErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), node: None }
    }

    /// Attach the offending node.
    pub fn at(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn invalid_node_kind(node: NodeId, expected: &str, found: &str) -> Self {
        Self::new(
            ScheduleErrorKind::InvalidNodeKind,
            format!("expected {}, found {}", expected, found),
        )
        .at(node)
    }

    pub fn unsupported_access(message: impl Into<String>) -> Self {
        Self::new(ScheduleErrorKind::UnsupportedAccessPattern, message)
    }

    pub fn insertion_point_not_found(node: NodeId, message: impl Into<String>) -> Self {
        Self::new(ScheduleErrorKind::InsertionPointNotFound, message).at(node)
    }
}

/// Result type for schedule primitives.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Result type using TenschedError.
pub type TenschedResult<T> = Result<T, TenschedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScheduleError::invalid_node_kind(NodeId(7), "ScheduleBlockRealize", "Store");
        let s = format!("{}", err);
        assert!(s.starts_with("invalid node kind"));
        assert!(s.contains("Store"));
        assert!(s.contains("%7"));
    }

    #[test]
    fn test_wraps_into_top_level() {
        let err: TenschedError = ScheduleError::new(ScheduleErrorKind::UnboundBuffer, "C").into();
        assert!(err.to_string().contains("unbound buffer"));
    }
}
