//! Planning passes, bottom to top: [`layout`] resolves tensor layouts
//! from the overlap flags, [`schedule`] packs one configuration into
//! the arena, [`optimize`] searches over configurations.

pub mod layout;
pub mod optimize;
pub mod schedule;

pub use layout::assign_layouts;
pub use optimize::Optimizer;
pub use schedule::schedule;

use crate::helpe::*;

/// Plans a model end to end: baseline with maximal in-place overlap,
/// then the greedy slack-budgeted search. Returns the planned model
/// (addresses, buffer grants and final flags written in) and the peak
/// arena size in bytes.
pub fn plan(model: Model, slack: f64) -> Result<(Model, ByteSteps), PlanError> {
    Optimizer::new(model)?.optimize(slack)
}
