//! Macro and task definitions.
//!
//! Task parameters are optional at the type level: a macro authored with a
//! missing field still loads, and the worker reports every missing field of
//! the task in one error when it runs.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A named, ordered list of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// One typed unit of work inside a macro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Balance(BalanceTask),
    Math(MathTask),
    Deposit(TransferTask),
    Withdraw(TransferTask),
    Notify(NotifyTask),
}

impl Task {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Balance(_) => "balance",
            Self::Math(_) => "math",
            Self::Deposit(_) => "deposit",
            Self::Withdraw(_) => "withdraw",
            Self::Notify(_) => "notify",
        }
    }
}

/// Look up a pot balance and store it in `variable`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceTask {
    pub pot: Option<String>,
    pub variable: Option<String>,
}

/// Arithmetic over literals and scope variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MathTask {
    pub operation: Option<String>,
    pub operands: Option<Vec<Operand>>,
    pub variable: Option<String>,
}

/// Move money into or out of a pot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    pub pot: Option<String>,
    pub amount: Option<Operand>,
}

/// Push a feed notification. `title` and `body` may contain `#var`,
/// `£var` and `$var` tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyTask {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "imageUrl", alias = "image_url")]
    pub image_url: Option<String>,
}

/// A literal number or the name of a scope variable.
///
/// Strings that parse as numbers are literals, anything else is a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Literal(Decimal),
    Variable(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(d) => write!(f, "{d}"),
            Self::Variable(name) => f.write_str(name),
        }
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Self::Literal(Decimal::from(value))
    }
}

impl From<Decimal> for Operand {
    fn from(value: Decimal) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Self::Variable(value.to_string())
    }
}

/// Supported math operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl std::str::FromStr for MathOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "subtract" => Ok(Self::Subtract),
            "multiply" => Ok(Self::Multiply),
            "divide" => Ok(Self::Divide),
            other => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deserializes_macro_with_mixed_tasks() {
        let mac: Macro = serde_json::from_value(serde_json::json!({
            "name": "Macro1",
            "tasks": [
                { "type": "balance", "pot": "current", "variable": "currentBalance" },
                {
                    "type": "math",
                    "operation": "subtract",
                    "operands": ["currentBalance", "transactionAmount", 12.5],
                    "variable": "toDeposit"
                },
                { "type": "deposit", "pot": "Savings", "amount": "toDeposit" },
                { "type": "notify", "title": "Saved £toDeposit", "imageUrl": "https://img" }
            ]
        }))
        .unwrap();

        assert_eq!(mac.tasks.len(), 4);
        match &mac.tasks[1] {
            Task::Math(math) => {
                let operands = math.operands.as_ref().unwrap();
                assert_eq!(operands[0], Operand::Variable("currentBalance".into()));
                assert_eq!(operands[2], Operand::Literal(dec!(12.5)));
            }
            other => panic!("Expected math task, got {:?}", other),
        }
        match &mac.tasks[3] {
            Task::Notify(notify) => {
                assert_eq!(notify.image_url.as_deref(), Some("https://img"));
                assert!(notify.body.is_none());
            }
            other => panic!("Expected notify task, got {:?}", other),
        }
    }

    #[test]
    fn numeric_strings_are_literals() {
        let op: Operand = serde_json::from_value(serde_json::json!("150")).unwrap();
        assert_eq!(op, Operand::Literal(dec!(150)));
        let op: Operand = serde_json::from_value(serde_json::json!("balVar")).unwrap();
        assert_eq!(op, Operand::Variable("balVar".into()));
    }

    #[test]
    fn missing_task_fields_still_load() {
        let task: Task = serde_json::from_value(serde_json::json!({ "type": "deposit" })).unwrap();
        assert_eq!(task, Task::Deposit(TransferTask::default()));
        assert_eq!(task.label(), "deposit");
    }

    #[test]
    fn parses_operations() {
        assert_eq!("divide".parse::<MathOperation>(), Ok(MathOperation::Divide));
        assert_eq!("modulo".parse::<MathOperation>(), Err("modulo".to_string()));
    }
}
