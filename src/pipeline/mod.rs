//! Deal pipeline domain: stages, deals, derived views and the
//! stage-transition state machine.
//!
//! Legacy stage names are mapped onto the canonical six-stage set at
//! ingestion ([`RawDeal::normalize`]); nothing past this boundary ever sees a
//! legacy literal.

mod deal;
mod stage;
mod transition;
mod view;

pub use deal::{Deal, DealFilters, DealId, DealList, RawDeal};
pub use stage::Stage;
pub use transition::{StageTransition, StageTransitionValidator};
pub use view::{DealStats, PipelineView, StageGroup};
