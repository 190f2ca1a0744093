//! Planning.
//!
//! Compares the declared resources with the last applied state and decides
//! one action per resource, in an order the executor can follow.

mod diff;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffType, PlannedValue, ResourceDiff};
pub use plan::{ActionType, Plan, PlanEntry, Planner};
