//! Error taxonomy for the cache and mutation layer.
//!
//! Four leaf errors describe *what* went wrong:
//!
//! - [`TransportError`]: the network call failed or returned a non-2xx status.
//! - [`ValidationError`]: a response failed normalization at the fetch boundary.
//! - [`StageTransitionError`]: an illegal pipeline move, rejected locally.
//! - [`MutationConflictError`]: the remote store rejected an optimistic change.
//!
//! They are aggregated into [`QueryError`] (read path) and [`MutationError`]
//! (write path). None of them is fatal to the process: query errors are
//! recorded per cache entry, mutation errors always roll back before they
//! reach the caller.
//!
//! Every error is `Clone` because a single fetch result is handed to every
//! waiter attached to the same in-flight request.

use thiserror::Error;

use crate::key::QueryKey;
use crate::pipeline::Stage;

// =============================================================================
// Leaf Errors
// =============================================================================

/// A network or HTTP failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// HTTP status code, when the server answered at all.
    pub status: Option<u16>,
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// A failure without an HTTP status (connection refused, timeout, ...).
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// A non-2xx HTTP response.
    #[must_use]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Returns `true` for 409 responses, which the mutation path reports
    /// as a [`MutationConflictError`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.status, Some(409))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(
                formatter,
                "request failed with status {status}: {}",
                self.message
            ),
            None => write!(formatter, "request failed: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// A response that failed normalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: String,
    /// What was wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// An illegal pipeline-stage move.
///
/// Produced before any network call is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move deal from {from} to {to}: {reason}")]
pub struct StageTransitionError {
    /// Stage the deal currently sits in.
    pub from: Stage,
    /// Requested destination.
    pub to: Stage,
    /// Why the move was refused.
    pub reason: TransitionRejection,
}

/// Reasons a stage transition is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    /// The origin stage is absorbing.
    AbsorbingOrigin,
    /// Origin and destination are the same stage.
    SameStage,
}

impl std::fmt::Display for TransitionRejection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AbsorbingOrigin => write!(formatter, "cannot move deals from closed stages"),
            Self::SameStage => write!(formatter, "deal is already in that stage"),
        }
    }
}

/// The remote store rejected an optimistically applied change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("change rejected by server: {message}")]
pub struct MutationConflictError {
    /// Server-provided explanation.
    pub message: String,
}

impl MutationConflictError {
    /// Creates a new conflict error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// Read Path
// =============================================================================

/// Errors surfaced by queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The loader's network call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response failed normalization; nothing was written to the cache.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The fetch was superseded (for example by a mutation's `begin`).
    #[error("fetch for {0} was cancelled")]
    Cancelled(QueryKey),

    /// Cached data under the key has a different type than requested.
    #[error("cached value for {key} is not a {expected}")]
    TypeMismatch {
        /// The key that was read.
        key: QueryKey,
        /// Name of the requested type.
        expected: &'static str,
    },

    /// The background task running the loader panicked.
    #[error("fetch task for {0} aborted unexpectedly")]
    Aborted(QueryKey),
}

// =============================================================================
// Write Path
// =============================================================================

/// Errors surfaced by mutations.
///
/// By the time a caller sees one of these, the cache has already been rolled
/// back to its pre-mutation state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// Illegal move; no network call was made.
    #[error(transparent)]
    Transition(#[from] StageTransitionError),

    /// The server refused the change.
    #[error(transparent)]
    Conflict(#[from] MutationConflictError),

    /// The network call failed.
    #[error(transparent)]
    Transport(TransportError),

    /// The server response failed normalization.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The speculative update could not be applied to the cache.
    #[error("speculative update failed: {0}")]
    Speculation(QueryError),
}

impl From<TransportError> for MutationError {
    fn from(error: TransportError) -> Self {
        if error.is_conflict() {
            Self::Conflict(MutationConflictError::new(error.message))
        } else {
            Self::Transport(error)
        }
    }
}

impl From<QueryError> for MutationError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::Transport(transport) => transport.into(),
            QueryError::Validation(validation) => Self::Validation(validation),
            other => Self::Speculation(other),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
