//! Unified `Database` trait — single async interface for all persistence.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::accounts::UserAccount;
use crate::error::DatabaseError;
use crate::rules::{Rule, RuleDefinition};
use crate::transactions::Event;

/// One row of the request ledger.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: i64,
    pub transaction_id: String,
    pub call_type: String,
    pub content_hash: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    /// `None` until primality has been decided for this record.
    pub is_primary: Option<bool>,
}

/// Result of deciding primality for a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryClaim {
    pub is_primary: bool,
    pub processing_started_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic database trait covering the ledger, users and rules.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Request ledger ──────────────────────────────────────────────

    /// Insert a ledger record for `event` unless a record for the same
    /// transaction has the same content hash, or was created within
    /// `grace_window` of the event with a payload at least as large.
    ///
    /// Check and insert happen in one statement. Returns the new record id,
    /// or `None` for a duplicate.
    async fn insert_request_if_new(
        &self,
        event: &Event,
        grace_window: Duration,
    ) -> Result<Option<i64>, DatabaseError>;

    /// Whether a record for `transaction_id` with a greater id exists.
    async fn has_newer_request(
        &self,
        transaction_id: &str,
        record_id: i64,
    ) -> Result<bool, DatabaseError>;

    /// Mark `record_id` primary if no other record for `transaction_id` is
    /// primary, otherwise non-primary. Independently, stamp `started_at` if
    /// no other record of the same call type has been stamped. Atomic.
    /// Returns `None` if the record does not exist.
    async fn claim_primary(
        &self,
        transaction_id: &str,
        record_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<Option<PrimaryClaim>, DatabaseError>;

    async fn get_request(&self, record_id: i64) -> Result<Option<RequestRecord>, DatabaseError>;

    /// All records for a transaction, oldest first.
    async fn list_requests(&self, transaction_id: &str)
    -> Result<Vec<RequestRecord>, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Create the user for `email`, or refresh its access token.
    async fn upsert_user(
        &self,
        email: &str,
        access_token: &SecretString,
    ) -> Result<UserAccount, DatabaseError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, DatabaseError>;

    async fn get_user_by_account_id(
        &self,
        account_id: &str,
    ) -> Result<Option<UserAccount>, DatabaseError>;

    async fn set_account_id(&self, user_id: &str, account_id: &str) -> Result<(), DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// Store a rule with its macros. Macros are upserted by name per user
    /// and attached in list order.
    async fn insert_rule(
        &self,
        user_id: &str,
        rule: &RuleDefinition,
    ) -> Result<Rule, DatabaseError>;

    /// Rules for a user in creation order, macros in attachment order.
    async fn get_rules_for_user(&self, user_id: &str) -> Result<Vec<Rule>, DatabaseError>;

    async fn rule_exists(&self, user_id: &str, name: &str) -> Result<bool, DatabaseError>;
}
