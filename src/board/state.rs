//! Kanban columns derived from the pipeline view.

use crate::pipeline::{Deal, DealId, PipelineView, Stage};

/// The card currently being dragged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraggedCard {
    /// The dragged deal as it was when picked up.
    pub deal: Deal,
    /// Column the card was picked up from.
    pub origin: Stage,
    /// Column currently under the pointer.
    pub over: Option<Stage>,
}

/// What the board shows: one column per stage plus an optional drag.
///
/// The dragged card is rendered in the column under the pointer, or in its
/// origin column when the pointer is elsewhere. Ending the drag without a
/// move therefore puts it back where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardState {
    view: PipelineView,
    dragging: Option<DraggedCard>,
}

impl BoardState {
    /// A board showing `view`.
    #[must_use]
    pub fn from_pipeline(view: &PipelineView) -> Self {
        Self {
            view: view.clone(),
            dragging: None,
        }
    }

    /// Replaces the underlying data, keeping a drag in progress if the card
    /// still exists.
    pub fn refresh(&mut self, view: &PipelineView) {
        self.view = view.clone();
        if let Some(drag) = &self.dragging {
            if self.view.find(&drag.deal.id).is_none() {
                tracing::debug!(deal = %drag.deal.id, "dragged card vanished; drag dropped");
                self.dragging = None;
            }
        }
    }

    /// The data behind the board.
    #[must_use]
    pub const fn view(&self) -> &PipelineView {
        &self.view
    }

    /// The drag in progress.
    #[must_use]
    pub const fn dragging(&self) -> Option<&DraggedCard> {
        self.dragging.as_ref()
    }

    /// The column a deal sits in, ignoring any drag.
    #[must_use]
    pub fn stage_of(&self, id: &DealId) -> Option<Stage> {
        self.view.stage_of(id)
    }

    /// The cards to render in `stage`.
    #[must_use]
    pub fn cards(&self, stage: Stage) -> Vec<&Deal> {
        let dragged = self.dragging.as_ref();
        let mut cards: Vec<&Deal> = self.view[stage]
            .deals
            .iter()
            .filter(|deal| dragged.is_none_or(|drag| drag.deal.id != deal.id))
            .collect();
        if let Some(drag) = dragged {
            if drag.over.unwrap_or(drag.origin) == stage {
                cards.push(&drag.deal);
            }
        }
        cards
    }

    /// Starts dragging `id`. Returns `false` if the deal is not on the board
    /// or another drag is in progress.
    pub fn pick_up(&mut self, id: &DealId) -> bool {
        if self.dragging.is_some() {
            return false;
        }
        let Some(deal) = self.view.find(id).cloned() else {
            return false;
        };
        self.dragging = Some(DraggedCard {
            origin: deal.stage,
            deal,
            over: None,
        });
        true
    }

    /// Moves the pointer over `stage`, or off every column.
    pub fn hover(&mut self, stage: Option<Stage>) {
        if let Some(drag) = &mut self.dragging {
            drag.over = stage;
        }
    }

    /// Ends the drag and returns the card.
    pub fn release(&mut self) -> Option<DraggedCard> {
        self.dragging.take()
    }
}
