//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared by all callers; SQLite serializes writes on it, which is what
//! makes the single-statement ledger operations atomic.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::UserAccount;
use crate::error::DatabaseError;
use crate::filters::Filter;
use crate::macros::{Macro, Task};
use crate::rules::{Rule, RuleDefinition};
use crate::store::migrations;
use crate::store::traits::{Database, PrimaryClaim, RequestRecord};
use crate::transactions::Event;

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a libSQL error, keeping constraint and lock conflicts distinct
/// from plain query failures.
fn db_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("constraint failed") || msg.contains("database is locked") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

const REQUEST_COLUMNS: &str = "id, transaction_id, call_type, content_hash, payload, created_at, processing_started_at, is_primary";

fn row_to_request(row: &libsql::Row) -> Result<RequestRecord, libsql::Error> {
    let created_at: String = row.get(5)?;
    let started_at: Option<String> = row.get(6).ok();
    let is_primary: Option<i64> = row.get(7).ok();
    Ok(RequestRecord {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        call_type: row.get(2)?,
        content_hash: row.get(3)?,
        payload: row.get(4)?,
        created_at: parse_datetime(&created_at),
        processing_started_at: parse_optional_datetime(&started_at),
        is_primary: is_primary.map(|v| v != 0),
    })
}

const USER_COLUMNS: &str = "id, email, account_id, access_token";

fn row_to_user(row: &libsql::Row) -> Result<UserAccount, libsql::Error> {
    let token: String = row.get(3)?;
    Ok(UserAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        account_id: row.get::<String>(2).ok(),
        access_token: SecretString::from(token),
    })
}

impl LibSqlBackend {
    async fn query_one_user(
        &self,
        op: &str,
        sql: &str,
        value: &str,
    ) -> Result<Option<UserAccount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![value])
            .await
            .map_err(|e| db_err(op, e))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(op, e)),
        }
    }

    async fn upsert_macro(&self, user_id: &str, mac: &Macro) -> Result<String, DatabaseError> {
        let tasks = serde_json::to_string(&mac.tasks)
            .map_err(|e| DatabaseError::Serialization(format!("macro tasks: {e}")))?;
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO macros (id, user_id, name, tasks, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT (user_id, name) DO UPDATE
                   SET tasks = excluded.tasks, updated_at = excluded.updated_at
                 RETURNING id",
                params![Uuid::new_v4().to_string(), user_id, mac.name.as_str(), tasks, now],
            )
            .await
            .map_err(|e| db_err("upsert_macro", e))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<String>(0)
                .map_err(|e| DatabaseError::Query(format!("upsert_macro id: {e}"))),
            Ok(None) => Err(DatabaseError::Query("upsert_macro returned no id".into())),
            Err(e) => Err(db_err("upsert_macro", e)),
        }
    }

    async fn link_macros(
        &self,
        user_id: &str,
        rule_id: &str,
        macros: &[Macro],
    ) -> Result<(), DatabaseError> {
        for (position, mac) in macros.iter().enumerate() {
            let macro_id = self.upsert_macro(user_id, mac).await?;
            self.conn()
                .execute(
                    "INSERT OR REPLACE INTO rule_macros (rule_id, macro_id, position) VALUES (?1, ?2, ?3)",
                    params![rule_id, macro_id, position as i64],
                )
                .await
                .map_err(|e| db_err("insert_rule macro link", e))?;
        }
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM rule_macros WHERE rule_id = ?1", params![rule_id])
            .await
            .map_err(|e| db_err("delete_rule links", e))?;
        self.conn()
            .execute("DELETE FROM rules WHERE id = ?1", params![rule_id])
            .await
            .map_err(|e| db_err("delete_rule", e))?;
        Ok(())
    }

    async fn get_macros_for_rule(&self, rule_id: &str) -> Result<Vec<Macro>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT m.name, m.tasks FROM rule_macros rm
                 JOIN macros m ON m.id = rm.macro_id
                 WHERE rm.rule_id = ?1
                 ORDER BY rm.position ASC",
                params![rule_id],
            )
            .await
            .map_err(|e| db_err("get_macros_for_rule", e))?;

        let mut macros = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let parsed = row.get::<String>(0).and_then(|name| {
                let tasks: String = row.get(1)?;
                Ok((name, tasks))
            });
            match parsed {
                Ok((name, tasks)) => match serde_json::from_str::<Vec<Task>>(&tasks) {
                    Ok(tasks) => macros.push(Macro { name, tasks }),
                    Err(e) => tracing::warn!(macro_name = %name, "Skipping macro row: {e}"),
                },
                Err(e) => tracing::warn!("Skipping macro row: {e}"),
            }
        }
        Ok(macros)
    }
}

// ── Database trait implementation ───────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Request ledger ──────────────────────────────────────────────

    async fn insert_request_if_new(
        &self,
        event: &Event,
        grace_window: Duration,
    ) -> Result<Option<i64>, DatabaseError> {
        let payload = event.raw_payload();
        let payload_len = payload.len() as i64;
        let received_ms = event.received_at.timestamp_millis();
        let window_ms = grace_window.as_millis() as i64;

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO requests
                    (transaction_id, call_type, content_hash, payload, payload_len, created_at, created_ms)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
                 WHERE NOT EXISTS (
                    SELECT 1 FROM requests
                    WHERE transaction_id = ?1
                      AND (content_hash = ?3
                           OR (created_ms > ?7 - ?8 AND payload_len >= ?5))
                 )
                 RETURNING id",
                params![
                    event.id.as_str(),
                    event.call_type.as_str(),
                    event.content_hash.as_str(),
                    payload,
                    payload_len,
                    event.received_at.to_rfc3339(),
                    received_ms,
                    window_ms
                ],
            )
            .await
            .map_err(|e| db_err("insert_request_if_new", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("insert_request_if_new id: {e}")))?;
                debug!(transaction_id = %event.id, record_id = id, "Ledger record created");
                Ok(Some(id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(db_err("insert_request_if_new", e)),
        }
    }

    async fn has_newer_request(
        &self,
        transaction_id: &str,
        record_id: i64,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT EXISTS (SELECT 1 FROM requests WHERE transaction_id = ?1 AND id > ?2)",
                params![transaction_id, record_id],
            )
            .await
            .map_err(|e| db_err("has_newer_request", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let exists: i64 = row.get(0).unwrap_or(0);
                Ok(exists != 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(db_err("has_newer_request", e)),
        }
    }

    async fn claim_primary(
        &self,
        transaction_id: &str,
        record_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<Option<PrimaryClaim>, DatabaseError> {
        // Both CASEs see the table as it was before this statement. Primality
        // is per transaction; the processing stamp is per call type.
        let mut rows = self
            .conn()
            .query(
                "UPDATE requests
                 SET is_primary = CASE WHEN EXISTS (
                         SELECT 1 FROM requests r
                         WHERE r.transaction_id = ?1 AND r.is_primary = 1 AND r.id <> ?2
                     ) THEN 0 ELSE 1 END,
                     processing_started_at = CASE WHEN EXISTS (
                         SELECT 1 FROM requests r
                         WHERE r.transaction_id = ?1
                           AND r.call_type = requests.call_type
                           AND r.processing_started_at IS NOT NULL
                           AND r.id <> ?2
                     ) THEN processing_started_at ELSE COALESCE(processing_started_at, ?3) END
                 WHERE id = ?2 AND transaction_id = ?1
                 RETURNING is_primary, processing_started_at",
                params![transaction_id, record_id, started_at.to_rfc3339()],
            )
            .await
            .map_err(|e| db_err("claim_primary", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let is_primary: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("claim_primary row parse: {e}")))?;
                let started: Option<String> = row.get(1).ok();
                Ok(Some(PrimaryClaim {
                    is_primary: is_primary != 0,
                    processing_started_at: parse_optional_datetime(&started),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(db_err("claim_primary", e)),
        }
    }

    async fn get_request(&self, record_id: i64) -> Result<Option<RequestRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
                params![record_id],
            )
            .await
            .map_err(|e| db_err("get_request", e))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_request(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_request row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err("get_request", e)),
        }
    }

    async fn list_requests(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<RequestRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM requests WHERE transaction_id = ?1 ORDER BY id ASC"
                ),
                params![transaction_id],
            )
            .await
            .map_err(|e| db_err("list_requests", e))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_request(&row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping request row: {e}"),
            }
        }
        Ok(records)
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn upsert_user(
        &self,
        email: &str,
        access_token: &SecretString,
    ) -> Result<UserAccount, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO users (id, email, access_token, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT (email) DO UPDATE
                       SET access_token = excluded.access_token, updated_at = excluded.updated_at
                     RETURNING {USER_COLUMNS}"
                ),
                params![
                    Uuid::new_v4().to_string(),
                    email,
                    access_token.expose_secret(),
                    now
                ],
            )
            .await
            .map_err(|e| db_err("upsert_user", e))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map_err(|e| DatabaseError::Query(format!("upsert_user row parse: {e}"))),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: email.to_string(),
            }),
            Err(e) => Err(db_err("upsert_user", e)),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, DatabaseError> {
        self.query_one_user(
            "get_user_by_email",
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            email,
        )
        .await
    }

    async fn get_user_by_account_id(
        &self,
        account_id: &str,
    ) -> Result<Option<UserAccount>, DatabaseError> {
        self.query_one_user(
            "get_user_by_account_id",
            &format!("SELECT {USER_COLUMNS} FROM users WHERE account_id = ?1 LIMIT 1"),
            account_id,
        )
        .await
    }

    async fn set_account_id(&self, user_id: &str, account_id: &str) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE users SET account_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![account_id, Utc::now().to_rfc3339(), user_id],
            )
            .await
            .map_err(|e| db_err("set_account_id", e))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn insert_rule(
        &self,
        user_id: &str,
        rule: &RuleDefinition,
    ) -> Result<Rule, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let filters = serde_json::to_string(&rule.filters)
            .map_err(|e| DatabaseError::Serialization(format!("rule filters: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO rules (id, user_id, name, filters, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    user_id,
                    rule.name.as_str(),
                    filters,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| db_err("insert_rule", e))?;

        // The connection is shared with the ledger, so a failed macro write
        // removes the rule row instead of rolling back a transaction.
        if let Err(e) = self.link_macros(user_id, &id, &rule.macros).await {
            warn!(rule = %rule.name, user_id, "Rule macros not stored, removing rule: {e}");
            self.delete_rule(&id).await?;
            return Err(e);
        }

        debug!(rule = %rule.name, user_id, macros = rule.macros.len(), "Rule stored");
        Ok(Rule {
            id,
            user_id: user_id.to_string(),
            name: rule.name.clone(),
            filters: rule.filters.clone(),
            macros: rule.macros.clone(),
        })
    }

    async fn get_rules_for_user(&self, user_id: &str) -> Result<Vec<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, filters FROM rules WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![user_id],
            )
            .await
            .map_err(|e| db_err("get_rules_for_user", e))?;

        let mut heads = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let parsed = (|| -> Result<(String, String, String), libsql::Error> {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })();
            match parsed {
                Ok(head) => heads.push(head),
                Err(e) => tracing::warn!("Skipping rule row: {e}"),
            }
        }

        let mut rules = Vec::with_capacity(heads.len());
        for (id, name, filters) in heads {
            let filters: Vec<Filter> = match serde_json::from_str(&filters) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(rule = %name, "Skipping rule with unreadable filters: {e}");
                    continue;
                }
            };
            let macros = self.get_macros_for_rule(&id).await?;
            rules.push(Rule {
                id,
                user_id: user_id.to_string(),
                name,
                filters,
                macros,
            });
        }
        Ok(rules)
    }

    async fn rule_exists(&self, user_id: &str, name: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT EXISTS (SELECT 1 FROM rules WHERE user_id = ?1 AND name = ?2)",
                params![user_id, name],
            )
            .await
            .map_err(|e| db_err("rule_exists", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) != 0),
            Ok(None) => Ok(false),
            Err(e) => Err(db_err("rule_exists", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Direction;
    use crate::macros::model::TransferTask;
    use crate::transactions::WebhookPayload;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn event_at(data: serde_json::Value, received_at: DateTime<Utc>) -> Event {
        Event::from_webhook(
            WebhookPayload {
                call_type: "transaction.created".into(),
                data,
            },
            received_at,
        )
        .unwrap()
    }

    fn payload(notes: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "tx_1",
            "amount": -500,
            "account_id": "acc_1",
            "description": "TESCO",
            "notes": notes
        })
    }

    const WINDOW: Duration = Duration::from_secs(1);

    // ── Ledger ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn identical_payload_is_inserted_once() {
        let db = backend().await;
        let now = Utc::now();
        let first = db
            .insert_request_if_new(&event_at(payload(""), now), WINDOW)
            .await
            .unwrap();
        let later = now + chrono::Duration::seconds(30);
        let second = db
            .insert_request_if_new(&event_at(payload(""), later), WINDOW)
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(db.list_requests("tx_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn smaller_payload_within_window_is_duplicate() {
        let db = backend().await;
        let now = Utc::now();
        db.insert_request_if_new(&event_at(payload("longer notes"), now), WINDOW)
            .await
            .unwrap();
        let second = db
            .insert_request_if_new(
                &event_at(payload("short"), now + chrono::Duration::milliseconds(200)),
                WINDOW,
            )
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn equal_length_payload_within_window_is_duplicate() {
        let db = backend().await;
        let now = Utc::now();
        let first = event_at(payload("abcde"), now);
        let second = event_at(payload("vwxyz"), now + chrono::Duration::milliseconds(500));
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(first.raw_payload().len(), second.raw_payload().len());

        db.insert_request_if_new(&first, WINDOW).await.unwrap();
        assert!(db.insert_request_if_new(&second, WINDOW).await.unwrap().is_none());
        assert_eq!(db.list_requests("tx_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn larger_payload_is_new() {
        let db = backend().await;
        let now = Utc::now();
        db.insert_request_if_new(&event_at(payload(""), now), WINDOW)
            .await
            .unwrap();
        let within = db
            .insert_request_if_new(
                &event_at(payload("enriched"), now + chrono::Duration::milliseconds(100)),
                WINDOW,
            )
            .await
            .unwrap();
        assert!(within.is_some());
    }

    #[tokio::test]
    async fn smaller_payload_after_window_is_new() {
        let db = backend().await;
        let now = Utc::now();
        db.insert_request_if_new(&event_at(payload("longer notes"), now), WINDOW)
            .await
            .unwrap();
        let after = db
            .insert_request_if_new(
                &event_at(payload("short"), now + chrono::Duration::seconds(2)),
                WINDOW,
            )
            .await
            .unwrap();
        assert!(after.is_some());
    }

    #[tokio::test]
    async fn newer_request_detection() {
        let db = backend().await;
        let now = Utc::now();
        let first = db
            .insert_request_if_new(&event_at(payload(""), now), WINDOW)
            .await
            .unwrap()
            .unwrap();
        assert!(!db.has_newer_request("tx_1", first).await.unwrap());

        let second = db
            .insert_request_if_new(&event_at(payload("more info"), now), WINDOW)
            .await
            .unwrap()
            .unwrap();
        assert!(db.has_newer_request("tx_1", first).await.unwrap());
        assert!(!db.has_newer_request("tx_1", second).await.unwrap());
        assert!(!db.has_newer_request("tx_other", first).await.unwrap());
    }

    #[tokio::test]
    async fn only_first_claim_is_primary() {
        let db = backend().await;
        let now = Utc::now();
        let a = db
            .insert_request_if_new(&event_at(payload(""), now), WINDOW)
            .await
            .unwrap()
            .unwrap();
        let b = db
            .insert_request_if_new(&event_at(payload("updated"), now), WINDOW)
            .await
            .unwrap()
            .unwrap();

        let first = db.claim_primary("tx_1", b, now).await.unwrap().unwrap();
        let second = db.claim_primary("tx_1", a, now).await.unwrap().unwrap();
        assert!(first.is_primary);
        assert!(first.processing_started_at.is_some());
        assert!(!second.is_primary);
        assert!(second.processing_started_at.is_none());

        let records = db.list_requests("tx_1").await.unwrap();
        assert_eq!(records[0].is_primary, Some(false));
        assert_eq!(records[1].is_primary, Some(true));
    }

    #[tokio::test]
    async fn first_claim_of_each_call_type_is_stamped() {
        let db = backend().await;
        let now = Utc::now();
        let created = db
            .insert_request_if_new(&event_at(payload(""), now), WINDOW)
            .await
            .unwrap()
            .unwrap();
        let mut updated = Event::from_webhook(
            WebhookPayload {
                call_type: "transaction.updated".into(),
                data: payload("settled"),
            },
            now,
        )
        .unwrap();
        let first_update = db
            .insert_request_if_new(&updated, WINDOW)
            .await
            .unwrap()
            .unwrap();
        updated.payload = payload("settled and tagged");
        updated.content_hash = crate::transactions::model::content_hash(&updated.payload);
        let second_update = db
            .insert_request_if_new(&updated, WINDOW)
            .await
            .unwrap()
            .unwrap();

        let created_claim = db.claim_primary("tx_1", created, now).await.unwrap().unwrap();
        let update_claim = db.claim_primary("tx_1", first_update, now).await.unwrap().unwrap();
        let repeat_claim = db.claim_primary("tx_1", second_update, now).await.unwrap().unwrap();

        assert!(created_claim.is_primary);
        assert!(created_claim.processing_started_at.is_some());
        assert!(!update_claim.is_primary);
        assert!(update_claim.processing_started_at.is_some());
        assert!(!repeat_claim.is_primary);
        assert!(repeat_claim.processing_started_at.is_none());
    }

    #[tokio::test]
    async fn claim_on_missing_record() {
        let db = backend().await;
        assert!(db.claim_primary("tx_1", 42, Utc::now()).await.unwrap().is_none());
        assert!(db.get_request(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_record_round_trips() {
        let db = backend().await;
        let event = event_at(payload("x"), Utc::now());
        let id = db
            .insert_request_if_new(&event, WINDOW)
            .await
            .unwrap()
            .unwrap();
        let record = db.get_request(id).await.unwrap().unwrap();
        assert_eq!(record.transaction_id, "tx_1");
        assert_eq!(record.content_hash, event.content_hash);
        assert_eq!(record.payload, event.raw_payload());
        assert_eq!(record.call_type, "transaction.created");
        assert!(record.is_primary.is_none());
    }

    // ── Users ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_user_refreshes_token() {
        let db = backend().await;
        let first = db
            .upsert_user("a@b.c", &SecretString::from("old"))
            .await
            .unwrap();
        let second = db
            .upsert_user("a@b.c", &SecretString::from("new"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.access_token.expose_secret(), "new");
        assert!(second.account_id.is_none());
    }

    #[tokio::test]
    async fn user_lookup_by_account() {
        let db = backend().await;
        let user = db
            .upsert_user("a@b.c", &SecretString::from("tok"))
            .await
            .unwrap();
        db.set_account_id(&user.id, "acc_1").await.unwrap();

        let found = db.get_user_by_account_id("acc_1").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.account_id.as_deref(), Some("acc_1"));
        assert!(db.get_user_by_account_id("acc_2").await.unwrap().is_none());
        assert!(db.get_user_by_email("a@b.c").await.unwrap().is_some());
        assert!(matches!(
            db.set_account_id("nobody", "acc_1").await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    // ── Rules ───────────────────────────────────────────────────────

    fn definition(name: &str, macros: &[&str]) -> RuleDefinition {
        RuleDefinition {
            name: name.into(),
            filters: vec![Filter::Direction {
                direction: Direction::Out,
            }],
            macros: macros
                .iter()
                .map(|m| Macro {
                    name: m.to_string(),
                    tasks: vec![Task::Deposit(TransferTask {
                        pot: Some("Savings".into()),
                        amount: Some(100.into()),
                    })],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn rules_round_trip_with_macro_order() {
        let db = backend().await;
        let user = db
            .upsert_user("a@b.c", &SecretString::from("tok"))
            .await
            .unwrap();
        db.insert_rule(&user.id, &definition("First", &["m2", "m1"]))
            .await
            .unwrap();
        db.insert_rule(&user.id, &definition("Second", &["m1"]))
            .await
            .unwrap();

        let rules = db.get_rules_for_user(&user.id).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "First");
        let names: Vec<&str> = rules[0].macros.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["m2", "m1"]);
        assert_eq!(rules[0].filters.len(), 1);
        assert_eq!(rules[1].macros[0].tasks.len(), 1);

        assert!(db.rule_exists(&user.id, "First").await.unwrap());
        assert!(!db.rule_exists(&user.id, "Third").await.unwrap());
        assert!(db.get_rules_for_user("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_rule_name_is_constraint_error() {
        let db = backend().await;
        let user = db
            .upsert_user("a@b.c", &SecretString::from("tok"))
            .await
            .unwrap();
        db.insert_rule(&user.id, &definition("Rule", &[])).await.unwrap();
        let err = db
            .insert_rule(&user.id, &definition("Rule", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn failed_macro_write_leaves_no_rule_behind() {
        let db = backend().await;
        let user = db
            .upsert_user("a@b.c", &SecretString::from("tok"))
            .await
            .unwrap();
        db.conn().execute("DROP TABLE macros", ()).await.unwrap();

        assert!(db.insert_rule(&user.id, &definition("Save", &["m1"])).await.is_err());
        assert!(!db.rule_exists(&user.id, "Save").await.unwrap());
    }

    #[tokio::test]
    async fn file_backed_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_request_if_new(&event_at(payload(""), Utc::now()), WINDOW)
                .await
                .unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.list_requests("tx_1").await.unwrap().len(), 1);
    }
}
