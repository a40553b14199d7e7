//! Macro runner — drives a macro's tasks in order over one scope.

use tracing::{info, warn};

use crate::accounts::UserAccount;
use crate::error::TaskError;
use crate::macros::model::Macro;
use crate::macros::scope::VariableScope;
use crate::macros::workers::TaskWorkers;
use crate::transactions::Event;

/// How one macro invocation ended.
#[derive(Debug)]
pub enum MacroOutcome {
    /// Every task ran. Holds the final scope.
    Completed(VariableScope),
    /// A task failed; later tasks were skipped.
    Failed {
        task_index: usize,
        task: &'static str,
        error: TaskError,
    },
}

#[derive(Debug)]
pub struct MacroReport {
    pub macro_name: String,
    pub outcome: MacroOutcome,
}

impl MacroReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, MacroOutcome::Completed(_))
    }
}

#[derive(Clone)]
pub struct MacroRunner {
    workers: TaskWorkers,
}

impl MacroRunner {
    pub fn new(workers: TaskWorkers) -> Self {
        Self { workers }
    }

    /// Run one macro from a prepared scope.
    pub async fn run_macro(&self, mac: &Macro, scope: VariableScope) -> MacroReport {
        let transaction_id = scope.origin_id().unwrap_or_default().to_string();
        let mut scope = scope;

        for (task_index, task) in mac.tasks.iter().enumerate() {
            scope = match self.workers.run(task, scope).await {
                Ok(next) => next,
                Err(error) => {
                    warn!(
                        transaction_id = %transaction_id,
                        macro_name = %mac.name,
                        task_index,
                        task = task.label(),
                        "{error}"
                    );
                    return MacroReport {
                        macro_name: mac.name.clone(),
                        outcome: MacroOutcome::Failed {
                            task_index,
                            task: task.label(),
                            error,
                        },
                    };
                }
            };
        }

        if !mac.tasks.is_empty() {
            info!(transaction_id = %transaction_id, "Completed running tasks for {}.", mac.name);
        }
        MacroReport {
            macro_name: mac.name.clone(),
            outcome: MacroOutcome::Completed(scope),
        }
    }

    /// Run a rule's macros for an event, one after another. A failing
    /// macro does not stop the ones after it.
    pub async fn run_macros(
        &self,
        macros: &[Macro],
        event: &Event,
        user: Option<&UserAccount>,
    ) -> Vec<MacroReport> {
        let mut reports = Vec::with_capacity(macros.len());
        for mac in macros {
            let scope = VariableScope::for_event(user.cloned(), event, &mac.name);
            reports.push(self.run_macro(mac, scope).await);
        }
        reports
    }
}
