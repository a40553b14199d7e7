//! Rules — filters that select events plus the macros they trigger.

pub mod engine;
pub mod model;
pub mod seed;

pub use engine::{EvaluationReport, Processing, RuleEngine, RuleReport, evaluate_rule};
pub use model::{Rule, RuleDefinition, RuleOutcome};
