//! Error taxonomy of the document engine.

use thiserror::Error;

use crate::clock::TimeTicket;

/// Every failure the engine reports.
///
/// Caller mistakes (`InvalidArgument`, `SchemaValidation`, `Refused`,
/// `Unimplemented`) leave the document untouched. The remaining variants mean
/// that an operation referenced state this replica does not have, which for a
/// remote change indicates diverged replicas; see [`DocError::is_fatal`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("schema validation failed: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    #[error("refused: {0}")]
    Refused(String),
    #[error("element not found: {0}")]
    ElementNotFound(TimeTicket),
    #[error("element {ticket} is not {expected}")]
    TypeMismatch {
        ticket: TimeTicket,
        expected: &'static str,
    },
    #[error("position not found: {0}")]
    PositionNotFound(String),
    #[error("document invariant violated: {0}")]
    Invariant(String),
}

impl DocError {
    /// Registry and invariant failures. These are logged at error level
    /// where they are raised and always propagated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DocError::ElementNotFound(_)
                | DocError::TypeMismatch { .. }
                | DocError::PositionNotFound(_)
                | DocError::Invariant(_)
        )
    }

    pub(crate) fn not_found(ticket: TimeTicket) -> Self {
        let err = DocError::ElementNotFound(ticket);
        tracing::error!(error = %err, "fatal document error");
        err
    }

    pub(crate) fn type_mismatch(ticket: TimeTicket, expected: &'static str) -> Self {
        let err = DocError::TypeMismatch { ticket, expected };
        tracing::error!(error = %err, "fatal document error");
        err
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        let err = DocError::Invariant(msg.into());
        tracing::error!(error = %err, "fatal document error");
        err
    }
}
