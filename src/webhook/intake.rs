//! Webhook intake — dedup through the ledger, then hand off to the engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::error::{Error, LedgerError};
use crate::gateway::BankGateway;
use crate::ledger::{AddOutcome, RequestLedger};
use crate::macros::{MacroRunner, TaskWorkers};
use crate::rules::{EvaluationReport, Processing, RuleEngine};
use crate::store::Database;
use crate::transactions::{Event, WebhookPayload};

/// Default wait between creating a record and re-checking it is current.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Why an accepted webhook did or did not trigger rules.
#[derive(Debug)]
pub enum IntakeOutcome {
    /// An earlier delivery already covers this one.
    Duplicate,
    /// A newer delivery for the transaction arrived during the settle delay.
    Superseded,
    /// Another delivery of the same call type was already chosen to process.
    AlreadyProcessed,
    UnknownAccount,
    Processed(EvaluationReport),
    /// The engine could not load rules. Logged, not retried.
    ProcessingFailed(String),
}

impl IntakeOutcome {
    pub fn processed(&self) -> bool {
        matches!(self, Self::Processed(_))
    }
}

#[derive(Clone)]
pub struct WebhookIntake {
    ledger: RequestLedger,
    engine: RuleEngine,
    settle_delay: Duration,
}

impl WebhookIntake {
    pub fn new(ledger: RequestLedger, engine: RuleEngine, settle_delay: Duration) -> Self {
        Self {
            ledger,
            engine,
            settle_delay,
        }
    }

    /// Wire the full pipeline over one database and gateway.
    pub fn assemble(
        db: Arc<dyn Database>,
        gateway: Arc<dyn BankGateway>,
        grace_window: Duration,
        settle_delay: Duration,
    ) -> Self {
        let ledger = RequestLedger::new(db.clone(), grace_window);
        let engine = RuleEngine::new(db, MacroRunner::new(TaskWorkers::new(gateway)));
        Self::new(ledger, engine, settle_delay)
    }

    /// Handle one delivery.
    ///
    /// Returns `Err` only for a malformed envelope or a ledger failure;
    /// everything downstream of the dedup decision ends in `Ok`.
    pub async fn handle(&self, webhook: WebhookPayload) -> Result<IntakeOutcome, Error> {
        let mut event = Event::from_webhook(webhook, Utc::now())?;

        let record_id = match self.ledger.add_if_new(&event).await? {
            AddOutcome::Created { record_id } => record_id,
            AddOutcome::Duplicate => {
                log_request(false, &event);
                return Ok(IntakeOutcome::Duplicate);
            }
        };

        tokio::time::sleep(self.settle_delay).await;

        if !self.ledger.is_most_recent(&event.id, record_id).await? {
            log_request(false, &event);
            return Ok(IntakeOutcome::Superseded);
        }
        log_request(true, &event);

        let primary = self
            .ledger
            .mark_processing_and_primality(&mut event, record_id)
            .await?;
        if event.processing_started_at.is_none() {
            info!(
                transaction_id = %event.id,
                record_id,
                call_type = %event.call_type,
                "Call type already processed, skipping"
            );
            return Ok(IntakeOutcome::AlreadyProcessed);
        }
        debug!(transaction_id = %event.id, primary, "Processing delivery");

        Ok(match self.engine.process(&event).await {
            Ok(Processing::Evaluated(report)) => IntakeOutcome::Processed(report),
            Ok(Processing::UnknownAccount) => IntakeOutcome::UnknownAccount,
            Err(e) => {
                error!(transaction_id = %event.id, "Failed to process transaction: {e}");
                IntakeOutcome::ProcessingFailed(e.to_string())
            }
        })
    }
}

fn log_request(new_request: bool, event: &Event) {
    let label = if new_request { "Handling" } else { "Repeat" };
    info!(transaction_id = %event.id, "{label}: {} {}", event.description, event.id);
}

/// Whether an intake error should make the sender retry.
pub fn is_retryable(err: &Error) -> bool {
    matches!(
        err,
        Error::Ledger(LedgerError::Unavailable(_) | LedgerError::Contention { .. })
            | Error::Database(_)
    )
}
