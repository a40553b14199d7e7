//! Macros — ordered task lists run against the bank for a matching rule.

pub mod model;
pub mod runner;
pub mod scope;
pub mod workers;

pub use model::{Macro, Operand, Task};
pub use runner::{MacroOutcome, MacroReport, MacroRunner};
pub use scope::VariableScope;
pub use workers::TaskWorkers;
