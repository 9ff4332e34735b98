//! Reply policy — business hours, quotas, blocks, and burst limits.

mod evaluator;
mod hours;

pub use evaluator::{PolicyDecision, PolicyEvaluator, SuppressReason};
pub use hours::{DaySchedule, WeeklySchedule};
