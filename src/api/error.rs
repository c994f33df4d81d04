use thiserror::Error;

use crate::rewrites::RewriteError;

/// Categorical error kinds surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An argument had the wrong shape or value.
    ArgumentType,
    /// A cursor of the wrong variety was supplied.
    CursorKind,
    /// A stale cursor, or one forwarded to ⊥.
    InvalidCursor,
    /// A rewrite-specific legality check failed (including unification
    /// and effect analysis).
    PreconditionUnmet,
    /// An engine invariant was violated.
    Bug,
}

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("argument {index}, '{name}' to {op}: {reason}")]
    Argument {
        index: usize,
        name: String,
        op: String,
        reason: String,
    },
    #[error("{op}: expected a {expected} cursor, got a {got} cursor")]
    CursorKind {
        op: String,
        expected: String,
        got: String,
    },
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("{op}: {reason}")]
    Precondition { op: String, reason: String },
    #[error("internal invariant violated: {0}")]
    Bug(String),
}

impl SchedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedError::Argument { .. } => ErrorKind::ArgumentType,
            SchedError::CursorKind { .. } => ErrorKind::CursorKind,
            SchedError::InvalidCursor(_) => ErrorKind::InvalidCursor,
            SchedError::Precondition { .. } => ErrorKind::PreconditionUnmet,
            SchedError::Bug(_) => ErrorKind::Bug,
        }
    }

    pub(crate) fn from_rewrite(op: &str, e: RewriteError) -> SchedError {
        match e {
            RewriteError::Precondition(reason) => SchedError::Precondition {
                op: op.to_string(),
                reason,
            },
            RewriteError::BadCursor => {
                SchedError::InvalidCursor(format!("cursor does not resolve for {op}"))
            }
            RewriteError::Type(t) => SchedError::Precondition {
                op: op.to_string(),
                reason: t.to_string(),
            },
            RewriteError::Unify(u) => SchedError::Precondition {
                op: op.to_string(),
                reason: u.to_string(),
            },
            RewriteError::Bug(b) => SchedError::Bug(b),
        }
    }
}
