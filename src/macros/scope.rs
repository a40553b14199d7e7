//! Per-invocation variable scope threaded through a macro's tasks.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;

use crate::accounts::UserAccount;
use crate::transactions::Event;

pub const TRANSACTION_AMOUNT: &str = "transactionAmount";
pub const TRANSACTION_ID: &str = "transactionId";
pub const TRIGGER_ID: &str = "triggerId";
pub const MACRO_NAME: &str = "macroName";

/// A value held in the scope.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeValue {
    Number(Decimal),
    Text(String),
}

impl ScopeValue {
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for ScopeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<Decimal> for ScopeValue {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for ScopeValue {
    fn from(value: i64) -> Self {
        Self::Number(Decimal::from(value))
    }
}

impl From<&str> for ScopeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Ephemeral key-value state owned by one macro invocation.
///
/// Seeded with the acting user, `transactionAmount`, `transactionId` (or
/// `triggerId`) and `macroName`. Each task takes the scope by value and
/// hands back the scope for the next task.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    user: Option<UserAccount>,
    vars: HashMap<String, ScopeValue>,
}

impl VariableScope {
    /// Scope for a macro triggered by a transaction event.
    pub fn for_event(user: Option<UserAccount>, event: &Event, macro_name: &str) -> Self {
        let mut scope = Self {
            user,
            vars: HashMap::new(),
        };
        scope.set(TRANSACTION_AMOUNT, event.amount);
        scope.set(TRANSACTION_ID, event.id.as_str());
        scope.set_non_empty(MACRO_NAME, macro_name);
        scope
    }

    /// Scope for a macro triggered outside a transaction (manual runs).
    pub fn for_trigger(user: Option<UserAccount>, trigger_id: &str, macro_name: &str) -> Self {
        let mut scope = Self {
            user,
            vars: HashMap::new(),
        };
        scope.set_non_empty(TRIGGER_ID, trigger_id);
        scope.set_non_empty(MACRO_NAME, macro_name);
        scope
    }

    fn set_non_empty(&mut self, name: &str, value: &str) {
        if !value.is_empty() {
            self.set(name, value);
        }
    }

    pub fn user(&self) -> Option<&UserAccount> {
        self.user.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&ScopeValue> {
        self.vars.get(name)
    }

    pub fn number(&self, name: &str) -> Option<Decimal> {
        self.get(name).and_then(ScopeValue::as_number)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ScopeValue::as_text)
    }

    pub fn set(&mut self, name: &str, value: impl Into<ScopeValue>) {
        self.vars.insert(name.to_string(), value.into());
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.text(TRANSACTION_ID)
    }

    pub fn trigger_id(&self) -> Option<&str> {
        self.text(TRIGGER_ID)
    }

    pub fn macro_name(&self) -> Option<&str> {
        self.text(MACRO_NAME)
    }

    /// Id of whatever started this run, transaction first.
    pub fn origin_id(&self) -> Option<&str> {
        self.transaction_id().or_else(|| self.trigger_id())
    }
}
