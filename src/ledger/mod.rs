//! Request ledger — decides whether an inbound event is new work.
//!
//! Three checks, each backed by one atomic storage operation:
//! `add_if_new` (dedup on content hash and the grace window),
//! `is_most_recent` (has a newer delivery superseded this one) and
//! `mark_processing_and_primality` (exactly one primary per transaction,
//! and one processed delivery per transaction and call type).
//!
//! No storage failure is ever reported as "duplicate".

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::error::{DatabaseError, LedgerError};
use crate::store::{Database, RequestRecord};
use crate::transactions::Event;

/// Default grace window for near-duplicate deliveries.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_millis(1000);

/// Result of [`RequestLedger::add_if_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Created { record_id: i64 },
    Duplicate,
}

impl AddOutcome {
    pub fn created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    pub fn record_id(&self) -> Option<i64> {
        match self {
            Self::Created { record_id } => Some(*record_id),
            Self::Duplicate => None,
        }
    }
}

#[derive(Clone)]
pub struct RequestLedger {
    db: Arc<dyn Database>,
    grace_window: Duration,
}

impl RequestLedger {
    pub fn new(db: Arc<dyn Database>, grace_window: Duration) -> Self {
        Self { db, grace_window }
    }

    /// Record the event unless it duplicates an earlier delivery.
    pub async fn add_if_new(&self, event: &Event) -> Result<AddOutcome, LedgerError> {
        let inserted = self
            .db
            .insert_request_if_new(event, self.grace_window)
            .await
            .map_err(|e| classify(&event.id, e))?;

        Ok(match inserted {
            Some(record_id) => AddOutcome::Created { record_id },
            None => {
                debug!(transaction_id = %event.id, hash = %event.content_hash, "Duplicate delivery");
                AddOutcome::Duplicate
            }
        })
    }

    /// True iff no later record exists for the transaction.
    pub async fn is_most_recent(
        &self,
        transaction_id: &str,
        record_id: i64,
    ) -> Result<bool, LedgerError> {
        let newer = self
            .db
            .has_newer_request(transaction_id, record_id)
            .await
            .map_err(|e| classify(transaction_id, e))?;
        Ok(!newer)
    }

    /// Decide primality for `record_id` and stamp the event.
    ///
    /// Sets `event.first_processed`, and `event.processing_started_at` when
    /// this is the first delivery of its call type to be processed.
    /// Returns whether this record is primary.
    pub async fn mark_processing_and_primality(
        &self,
        event: &mut Event,
        record_id: i64,
    ) -> Result<bool, LedgerError> {
        let claim = self
            .db
            .claim_primary(&event.id, record_id, Utc::now())
            .await
            .map_err(|e| classify(&event.id, e))?
            .ok_or(LedgerError::RecordNotFound { record_id })?;

        event.first_processed = Some(claim.is_primary);
        event.processing_started_at = claim.processing_started_at;
        debug!(
            transaction_id = %event.id,
            record_id,
            primary = claim.is_primary,
            "Primality decided"
        );
        Ok(claim.is_primary)
    }

    pub async fn records(&self, transaction_id: &str) -> Result<Vec<RequestRecord>, LedgerError> {
        Ok(self.db.list_requests(transaction_id).await?)
    }
}

fn classify(transaction_id: &str, err: DatabaseError) -> LedgerError {
    match err {
        DatabaseError::Constraint(reason) => LedgerError::Contention {
            transaction_id: transaction_id.to_string(),
            reason,
        },
        other => LedgerError::Unavailable(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::transactions::WebhookPayload;

    async fn ledger() -> RequestLedger {
        let db = LibSqlBackend::new_memory().await.unwrap();
        RequestLedger::new(Arc::new(db), DEFAULT_GRACE_WINDOW)
    }

    fn event(notes: &str) -> Event {
        Event::from_webhook(
            WebhookPayload {
                call_type: "transaction.created".into(),
                data: serde_json::json!({
                    "id": "tx_7",
                    "amount": 1200,
                    "account_id": "acc_1",
                    "description": "SALARY",
                    "notes": notes
                }),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_identical_adds_create_once() {
        let ledger = ledger().await;
        let e = event("");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let e = e.clone();
                tokio::spawn(async move { ledger.add_if_new(&e).await })
            })
            .collect();

        let mut created = 0;
        for h in handles {
            if h.await.unwrap().unwrap().created() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(ledger.records("tx_7").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_delivery_supersedes_first() {
        let ledger = ledger().await;
        let first = ledger.add_if_new(&event("")).await.unwrap();
        let second = ledger.add_if_new(&event("enriched")).await.unwrap();

        let first_id = first.record_id().unwrap();
        let second_id = second.record_id().unwrap();
        assert!(!ledger.is_most_recent("tx_7", first_id).await.unwrap());
        assert!(ledger.is_most_recent("tx_7", second_id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_primality_has_one_winner() {
        let ledger = ledger().await;
        let mut ids = Vec::new();
        for notes in ["", "a", "ab", "abc", "abcd", "abcde"] {
            ids.push(ledger.add_if_new(&event(notes)).await.unwrap().record_id().unwrap());
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let ledger = ledger.clone();
                let mut e = event("");
                tokio::spawn(async move {
                    let primary = ledger.mark_processing_and_primality(&mut e, id).await?;
                    Ok::<_, LedgerError>((primary, e))
                })
            })
            .collect();

        let mut winners = 0;
        for h in handles {
            let (primary, e) = h.await.unwrap().unwrap();
            assert_eq!(e.first_processed, Some(primary));
            if primary {
                assert!(e.processing_started_at.is_some());
                winners += 1;
            } else {
                assert!(e.processing_started_at.is_none());
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn unknown_record_is_reported() {
        let ledger = ledger().await;
        let mut e = event("");
        let err = ledger
            .mark_processing_and_primality(&mut e, 99)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::RecordNotFound { record_id: 99 }));
    }

    #[test]
    fn constraint_maps_to_contention() {
        let err = classify("tx_7", DatabaseError::Constraint("UNIQUE constraint failed".into()));
        assert!(matches!(err, LedgerError::Contention { .. }));
        let err = classify("tx_7", DatabaseError::Query("disk I/O error".into()));
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }
}
