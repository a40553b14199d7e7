//! Rule engine — evaluates a user's rules against an event and runs the
//! macros of every rule that passes.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::accounts::UserAccount;
use crate::error::DatabaseError;
use crate::macros::{MacroReport, MacroRunner};
use crate::rules::model::{Rule, RuleOutcome};
use crate::store::Database;
use crate::transactions::Event;

/// Result for one rule: its filter outcome and, if it passed, the reports
/// of its macros in list order.
#[derive(Debug)]
pub struct RuleReport {
    pub rule_name: String,
    pub outcome: RuleOutcome,
    pub macros: Vec<MacroReport>,
}

#[derive(Debug)]
pub struct EvaluationReport {
    pub transaction_id: String,
    pub user_id: String,
    pub rules: Vec<RuleReport>,
}

impl EvaluationReport {
    pub fn passed(&self) -> impl Iterator<Item = &RuleReport> {
        self.rules.iter().filter(|r| r.outcome.passed())
    }
}

/// What happened when an event reached the engine.
#[derive(Debug)]
pub enum Processing {
    /// No user owns the event's account.
    UnknownAccount,
    Evaluated(EvaluationReport),
}

/// Evaluate a rule's filters in order, stopping at the first that fails
/// or errors.
pub fn evaluate_rule(rule: &Rule, event: &Event) -> RuleOutcome {
    for (filter_index, filter) in rule.effective_filters().iter().enumerate() {
        match filter.evaluate(event) {
            Ok(true) => continue,
            Ok(false) => return RuleOutcome::Failed { filter_index },
            Err(error) => return RuleOutcome::Errored { filter_index, error },
        }
    }
    RuleOutcome::Passed
}

#[derive(Clone)]
pub struct RuleEngine {
    db: Arc<dyn Database>,
    runner: MacroRunner,
}

impl RuleEngine {
    pub fn new(db: Arc<dyn Database>, runner: MacroRunner) -> Self {
        Self { db, runner }
    }

    /// Run the owner's rules for `event`.
    ///
    /// Filter and task failures are logged and reported, never returned as
    /// errors. Only storage failures while loading the user or rules are.
    pub async fn process(&self, event: &Event) -> Result<Processing, DatabaseError> {
        let Some(user) = self.db.get_user_by_account_id(&event.account_id).await? else {
            warn!(
                transaction_id = %event.id,
                account_id = %event.account_id,
                "No user for account, skipping rules"
            );
            return Ok(Processing::UnknownAccount);
        };

        let rules = self.db.get_rules_for_user(&user.id).await?;
        debug!(transaction_id = %event.id, rules = rules.len(), "Evaluating rules");

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in &rules {
            let outcome = evaluate_rule(rule, event);
            match &outcome {
                RuleOutcome::Passed => {
                    info!(transaction_id = %event.id, "Rule {} PASSED for {}", rule.name, event.description);
                }
                RuleOutcome::Failed { filter_index } => {
                    debug!(transaction_id = %event.id, rule = %rule.name, filter_index, "Rule did not match");
                }
                RuleOutcome::Errored { filter_index, error } => {
                    let filter = rule
                        .effective_filters()
                        .get(*filter_index)
                        .map_or("unknown", |f| f.label());
                    warn!(transaction_id = %event.id, rule = %rule.name, filter_index, filter, "{error}");
                }
            }
            outcomes.push(outcome);
        }

        // Matching rules share no state, so their macro lists run side by side.
        let runs = rules.iter().zip(&outcomes).map(|(rule, outcome)| {
            let user = &user;
            async move {
                if outcome.passed() {
                    self.run_rule_macros(rule, event, user).await
                } else {
                    Vec::new()
                }
            }
        });
        let macro_reports = join_all(runs).await;

        let reports = rules
            .into_iter()
            .zip(outcomes)
            .zip(macro_reports)
            .map(|((rule, outcome), macros)| RuleReport {
                rule_name: rule.name,
                outcome,
                macros,
            })
            .collect();

        Ok(Processing::Evaluated(EvaluationReport {
            transaction_id: event.id.clone(),
            user_id: user.id,
            rules: reports,
        }))
    }

    async fn run_rule_macros(
        &self,
        rule: &Rule,
        event: &Event,
        user: &UserAccount,
    ) -> Vec<MacroReport> {
        self.runner.run_macros(&rule.macros, event, Some(user)).await
    }
}
