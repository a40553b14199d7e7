//! Error types for Pot Automator.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

/// Inbound event normalization errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Webhook payload missing field: {0}")]
    MissingField(&'static str),

    #[error("Webhook payload field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse rules file {path}: {reason}")]
    RulesFile { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Request ledger errors.
///
/// None of these mean "duplicate". A caller that sees one has not got a
/// dedup decision and must report it.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(#[from] DatabaseError),

    #[error("Ledger contention on transaction {transaction_id}: {reason}")]
    Contention {
        transaction_id: String,
        reason: String,
    },

    #[error("Ledger record {record_id} not found")]
    RecordNotFound { record_id: i64 },
}

/// Filter configuration errors, raised while evaluating a rule.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("Filter value must be greater than or equal to 0 (got {value})")]
    NegativeAmount { value: String },

    #[error("Invalid call type: {call}")]
    InvalidCallType { call: String },

    #[error("Invalid text pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Macro task errors. A task error aborts the rest of its macro only.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{task} task missing {}.", .fields.join(" and "))]
    MissingFields {
        task: &'static str,
        fields: Vec<&'static str>,
    },

    #[error("{task} amount could not be resolved.")]
    UnresolvedAmount { task: &'static str },

    #[error("{task} amount must not be zero.")]
    ZeroAmount { task: &'static str },

    #[error("Math task operand {operand} could not be resolved.")]
    UnresolvedOperand { operand: String },

    #[error("Math task operation {operation} is invalid.")]
    InvalidOperation { operation: String },

    #[error("Math task divided by zero.")]
    DivisionByZero,

    #[error("Math task overflowed.")]
    Overflow,

    #[error("Gateway call failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Bank gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Request to {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Pot {pot} could not be found.")]
    PotNotFound { pot: String },

    #[error("User {user_id} has no selected account")]
    NoAccount { user_id: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl GatewayError {
    /// Whether the transport layer may retry the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
