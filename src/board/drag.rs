//! Turning drag gestures into stage moves.
//!
//! A drop becomes one of:
//!
//! - nothing, when the card lands in its own column;
//! - a cancellation, when the drag is aborted or lands outside every column;
//! - a rejection, when the move is illegal (one notification, no state
//!   change);
//! - a [`StageChange`] handed to [`DealCommands::move_deal`].

use std::sync::Arc;

use crate::deals::{DealCommands, MOVE_REJECTED_TITLE, StageChange};
use crate::error::{MutationError, StageTransitionError};
use crate::notify::{Notification, Notifier};
use crate::pipeline::{Deal, DealId, PipelineView, Stage, StageTransitionValidator};

use super::BoardState;

/// Where a card was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// A column.
    Column(Stage),
    /// Another card; the drop lands in that card's column.
    Card(DealId),
    /// Outside every column.
    Outside,
}

/// What a release decided, before any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragDecision {
    /// Same column or no drag in progress.
    NoOp,
    /// Aborted; the card is back in its origin column.
    Cancelled,
    /// Illegal move; already notified.
    Rejected(StageTransitionError),
    /// Legal move to run.
    Move(StageChange),
}

/// What a completed drop did.
#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    /// Nothing to do.
    NoOp,
    /// Aborted.
    Cancelled,
    /// Illegal move, rejected locally.
    Rejected(StageTransitionError),
    /// The server accepted the move.
    Moved(Deal),
    /// The server refused the move; the cache was rolled back.
    Failed(MutationError),
}

/// Drives one board's drag gestures.
pub struct DragController {
    board: BoardState,
    validator: StageTransitionValidator,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for DragController {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DragController")
            .field("board", &self.board)
            .finish_non_exhaustive()
    }
}

impl DragController {
    /// A controller over a board showing `view`.
    #[must_use]
    pub fn new(view: &PipelineView, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            board: BoardState::from_pipeline(view),
            validator: StageTransitionValidator::new(),
            notifier,
        }
    }

    /// The board being driven.
    #[must_use]
    pub const fn board(&self) -> &BoardState {
        &self.board
    }

    /// Re-renders from new pipeline data.
    pub fn refresh(&mut self, view: &PipelineView) {
        self.board.refresh(view);
    }

    /// Picks up a card. Returns `false` if it cannot be dragged.
    pub fn press(&mut self, id: &DealId) -> bool {
        self.board.pick_up(id)
    }

    /// Moves the pointer over `target`.
    pub fn hover(&mut self, target: &DropTarget) {
        let stage = self.resolve(target);
        self.board.hover(stage);
    }

    /// Aborts the drag (escape key).
    pub fn cancel(&mut self) -> DragDecision {
        match self.board.release() {
            Some(card) => {
                tracing::debug!(deal = %card.deal.id, origin = %card.origin, "drag cancelled");
                DragDecision::Cancelled
            }
            None => DragDecision::NoOp,
        }
    }

    /// Ends the drag on `target` and decides what to do.
    pub fn release(&mut self, target: &DropTarget) -> DragDecision {
        let to = self.resolve(target);
        let Some(card) = self.board.release() else {
            return DragDecision::NoOp;
        };
        let Some(to) = to else {
            tracing::debug!(deal = %card.deal.id, "card dropped outside the board");
            return DragDecision::Cancelled;
        };
        if to == card.origin {
            return DragDecision::NoOp;
        }
        match self.validator.validate(card.origin, to) {
            Ok(transition) => DragDecision::Move(StageChange {
                deal_id: card.deal.id,
                from: transition.from,
                to: transition.to,
            }),
            Err(error) => {
                tracing::info!(deal = %card.deal.id, error = %error, "drop rejected");
                self.notifier.notify(Notification::error(MOVE_REJECTED_TITLE, &error));
                DragDecision::Rejected(error)
            }
        }
    }

    /// Ends the drag on `target` and, for a legal move, runs it.
    pub async fn drop_on(&mut self, target: &DropTarget, commands: &DealCommands) -> DragOutcome {
        match self.release(target) {
            DragDecision::NoOp => DragOutcome::NoOp,
            DragDecision::Cancelled => DragOutcome::Cancelled,
            DragDecision::Rejected(error) => DragOutcome::Rejected(error),
            DragDecision::Move(change) => match commands.move_deal(change).await {
                Ok(deal) => DragOutcome::Moved(deal),
                Err(error) => DragOutcome::Failed(error),
            },
        }
    }

    fn resolve(&self, target: &DropTarget) -> Option<Stage> {
        match target {
            DropTarget::Column(stage) => Some(*stage),
            DropTarget::Card(id) => self.board.stage_of(id),
            DropTarget::Outside => None,
        }
    }
}
