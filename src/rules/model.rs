//! Rule definitions and per-rule evaluation results.

use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::filters::Filter;
use crate::macros::Macro;

/// A rule as authored: filters plus the macros to run when all pass.
///
/// This is the shape of the seed rules file and of `insert_rule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub macros: Vec<Macro>,
}

/// A stored rule owned by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub filters: Vec<Filter>,
    pub macros: Vec<Macro>,
}

impl Rule {
    /// Filters as evaluated: a `call: created` filter goes first unless the
    /// rule already names a call type.
    pub fn effective_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::with_capacity(self.filters.len() + 1);
        if !self.filters.iter().any(Filter::is_call) {
            filters.push(Filter::default_call());
        }
        filters.extend(self.filters.iter().cloned());
        filters
    }
}

/// How a rule's filter list resolved for one event.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Passed,
    /// The filter at this index returned false.
    Failed { filter_index: usize },
    /// The filter at this index was misconfigured.
    Errored {
        filter_index: usize,
        error: FilterError,
    },
}

impl RuleOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}
