//! Inbound transaction events and the webhook envelope they arrive in.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::EventError;

// ── Webhook envelope ────────────────────────────────────────────────

/// Raw body posted by the account provider: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub call_type: String,
    pub data: serde_json::Value,
}

// ── Call type ───────────────────────────────────────────────────────

/// Kind of notification, e.g. `transaction.created`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallType {
    Created,
    Updated,
    Other(String),
}

impl CallType {
    pub fn parse(s: &str) -> Self {
        match s {
            "transaction.created" => Self::Created,
            "transaction.updated" => Self::Updated,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "transaction.created",
            Self::Updated => "transaction.updated",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CallType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CallType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

// ── Event ───────────────────────────────────────────────────────────

/// One normalized transaction notification.
///
/// `payload` keeps the full `data` object so text filters can reach any
/// nested field (`merchant.name`, `metadata.notes`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// External transaction id. Not unique across call types.
    pub id: String,
    pub call_type: CallType,
    /// Signed amount in minor currency units. Negative is money out.
    pub amount: i64,
    pub description: String,
    pub account_id: String,
    pub payload: serde_json::Value,
    /// Hex SHA-256 of the normalized payload.
    pub content_hash: String,
    pub received_at: DateTime<Utc>,
    /// Set by the ledger when this delivery is chosen to be processed.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// `Some(true)` once the ledger marks this delivery primary.
    pub first_processed: Option<bool>,
}

impl Event {
    /// Normalize a webhook envelope into an event.
    pub fn from_webhook(
        webhook: WebhookPayload,
        received_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let data = webhook.data;
        if !data.is_object() {
            return Err(EventError::InvalidField {
                field: "data",
                reason: "expected an object".into(),
            });
        }

        let id = data
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(EventError::MissingField("id"))?
            .to_string();

        let amount = match data.get("amount") {
            Some(v) => v.as_i64().ok_or_else(|| EventError::InvalidField {
                field: "amount",
                reason: format!("expected an integer, got {v}"),
            })?,
            None => return Err(EventError::MissingField("amount")),
        };

        let account_id = data
            .get("account_id")
            .and_then(|v| v.as_str())
            .ok_or(EventError::MissingField("account_id"))?
            .to_string();

        let description = data
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let content_hash = content_hash(&data);

        Ok(Self {
            id,
            call_type: CallType::parse(&webhook.call_type),
            amount,
            description,
            account_id,
            payload: data,
            content_hash,
            received_at,
            processing_started_at: None,
            first_processed: None,
        })
    }

    /// Serialized payload, as stored in the ledger.
    pub fn raw_payload(&self) -> String {
        self.payload.to_string()
    }

    /// Resolve a dotted path (`merchant.address.city`) into the payload.
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        path.split('.')
            .try_fold(&self.payload, |node, key| match node {
                serde_json::Value::Object(map) => map.get(key),
                serde_json::Value::Array(items) => {
                    key.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                _ => None,
            })
    }
}

/// Deterministic hash of a payload.
///
/// `serde_json` maps are key-ordered, so two payloads that differ only in
/// key order hash the same.
pub fn content_hash(payload: &serde_json::Value) -> String {
    let normalized = payload.to_string();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}
