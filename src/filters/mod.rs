//! Declarative rule filters and their evaluation.
//!
//! Evaluation is pure: a filter and an event in, a verdict out. Invalid
//! filter configuration is reported as a [`FilterError`] so the rule engine
//! can isolate it to the offending rule.

pub mod glob;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::transactions::Event;

pub use glob::Glob;

/// Money direction relative to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// Comparator for amount filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountTest {
    Gte,
    Gt,
    Lte,
    Lt,
    Equal,
}

/// A single predicate within a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Passes when the sign of the amount matches the direction.
    Direction { direction: Direction },
    /// Compares the absolute amount (minor units) against `value`.
    Amount { test: AmountTest, value: Decimal },
    /// Wildcard match against a dotted field path of the payload.
    Text {
        field: String,
        pattern: String,
        #[serde(default, rename = "caseInsensitive", alias = "case_insensitive")]
        case_insensitive: bool,
    },
    /// `any`, `created` or `updated`. Kept as a string so a bad value is
    /// reported at evaluation time rather than dropping the whole rule.
    Call { call: String },
}

impl Filter {
    /// The filter the engine prepends when a rule has no call filter.
    pub fn default_call() -> Self {
        Self::Call {
            call: "created".into(),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Direction { .. } => "direction",
            Self::Amount { .. } => "amount",
            Self::Text { .. } => "text",
            Self::Call { .. } => "call",
        }
    }

    /// Evaluate this filter against an event.
    pub fn evaluate(&self, event: &Event) -> Result<bool, FilterError> {
        match self {
            Self::Direction { direction } => Ok(evaluate_direction(*direction, event.amount)),
            Self::Amount { test, value } => evaluate_amount(*test, *value, event.amount),
            Self::Text {
                field,
                pattern,
                case_insensitive,
            } => evaluate_text(event, field, pattern, *case_insensitive),
            Self::Call { call } => evaluate_call(call, event),
        }
    }
}

fn evaluate_direction(direction: Direction, amount: i64) -> bool {
    if amount == 0 {
        return false;
    }
    (direction == Direction::In) == (amount > 0)
}

fn evaluate_amount(test: AmountTest, value: Decimal, amount: i64) -> Result<bool, FilterError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(FilterError::NegativeAmount {
            value: value.to_string(),
        });
    }
    let magnitude = Decimal::from(amount).abs();
    Ok(match test {
        AmountTest::Gte => magnitude >= value,
        AmountTest::Gt => magnitude > value,
        AmountTest::Lte => magnitude <= value,
        AmountTest::Lt => magnitude < value,
        AmountTest::Equal => magnitude == value,
    })
}

fn evaluate_text(
    event: &Event,
    field: &str,
    pattern: &str,
    case_insensitive: bool,
) -> Result<bool, FilterError> {
    let value = match event.field(field).and_then(text_of) {
        Some(v) => v,
        None => return Ok(false),
    };
    let glob = Glob::new(pattern, case_insensitive)?;
    Ok(glob.is_match(&value))
}

/// Scalar payload values as text. Missing, null, empty, zero, `false` and
/// structured values never match.
fn text_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        serde_json::Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn evaluate_call(call: &str, event: &Event) -> Result<bool, FilterError> {
    match call {
        "any" => Ok(true),
        "created" | "updated" => Ok(event.call_type.as_str() == format!("transaction.{call}")),
        other => Err(FilterError::InvalidCallType {
            call: other.to_string(),
        }),
    }
}
