//! The kanban board and its drag interaction.

mod drag;
mod state;

pub use drag::{DragController, DragDecision, DragOutcome, DropTarget};
pub use state::{BoardState, DraggedCard};
