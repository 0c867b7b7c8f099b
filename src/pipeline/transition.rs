//! Stage-transition state machine.
//!
//! Edges exist between every pair of distinct stages, except that nothing
//! leaves an absorbing stage. Backward moves (re-review) are legal.
//! Rejection is purely local: no network call is made for an illegal move.

use crate::error::{StageTransitionError, TransitionRejection};

use super::Stage;

/// A validated move between two distinct stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageTransition {
    /// Origin stage.
    pub from: Stage,
    /// Destination stage.
    pub to: Stage,
}

impl StageTransition {
    /// Returns `true` if the move goes left on the board.
    #[must_use]
    pub fn is_backward(self) -> bool {
        self.to < self.from
    }
}

/// Gatekeeper for pipeline moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTransitionValidator;

impl StageTransitionValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a move.
    ///
    /// # Errors
    ///
    /// Returns [`StageTransitionError`] if `from` is absorbing or equals `to`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dealboard::pipeline::{Stage, StageTransitionValidator};
    ///
    /// let validator = StageTransitionValidator::new();
    /// assert!(validator.validate(Stage::ActiveReview, Stage::InitialReview).is_ok());
    /// assert!(validator.validate(Stage::Dead, Stage::InitialReview).is_err());
    /// ```
    pub fn validate(self, from: Stage, to: Stage) -> Result<StageTransition, StageTransitionError> {
        let reject = |reason| StageTransitionError { from, to, reason };
        if from.is_absorbing() {
            return Err(reject(TransitionRejection::AbsorbingOrigin));
        }
        if from == to {
            return Err(reject(TransitionRejection::SameStage));
        }
        Ok(StageTransition { from, to })
    }

    /// Returns `true` if the move is legal.
    #[must_use]
    pub fn can_transition(self, from: Stage, to: Stage) -> bool {
        self.validate(from, to).is_ok()
    }

    /// Every stage reachable from `from` in one move.
    pub fn allowed_targets(self, from: Stage) -> impl Iterator<Item = Stage> {
        Stage::ALL
            .into_iter()
            .filter(move |&to| self.can_transition(from, to))
    }
}
