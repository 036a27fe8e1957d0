//! Question-to-plan translation: the deterministic rule cascade and the
//! orchestration layer that optionally escalates to an external planning
//! backend.

pub mod builder;
pub mod rules;

pub use builder::PlanBuilder;
pub use rules::{rule_based, IntentRule, PlannerContext, RulePlanner};
