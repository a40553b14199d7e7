//! Task workers — one handler per task kind.
//!
//! Every worker takes the scope by value and returns it (possibly
//! mutated) for the next task. Workers never retry; a gateway failure
//! is returned to the runner, which stops the macro.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::error::TaskError;
use crate::gateway::{BankGateway, Notification};
use crate::macros::model::{BalanceTask, MathOperation, MathTask, NotifyTask, Operand, Task, TransferTask};
use crate::macros::scope::VariableScope;

/// Direction of a pot transfer as authored in the macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Deposit,
    Withdraw,
}

impl TransferKind {
    fn task_name(self) -> &'static str {
        match self {
            Self::Deposit => "Deposit",
            Self::Withdraw => "Withdraw",
        }
    }
}

/// Dispatches tasks to their workers.
#[derive(Clone)]
pub struct TaskWorkers {
    gateway: Arc<dyn BankGateway>,
}

impl TaskWorkers {
    pub fn new(gateway: Arc<dyn BankGateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(&self, task: &Task, scope: VariableScope) -> Result<VariableScope, TaskError> {
        match task {
            Task::Balance(t) => self.balance(t, scope).await,
            Task::Math(t) => math(t, scope),
            Task::Deposit(t) => self.transfer(TransferKind::Deposit, t, scope).await,
            Task::Withdraw(t) => self.transfer(TransferKind::Withdraw, t, scope).await,
            Task::Notify(t) => self.notify(t, scope).await,
        }
    }

    async fn balance(
        &self,
        task: &BalanceTask,
        mut scope: VariableScope,
    ) -> Result<VariableScope, TaskError> {
        let pot = present(&task.pot);
        let variable = present(&task.variable);
        let (Some(pot), Some(variable), Some(user)) = (pot, variable, scope.user()) else {
            return Err(missing(
                "Balance",
                &[
                    ("pot", pot.is_some()),
                    ("variable", variable.is_some()),
                    ("user", scope.user().is_some()),
                ],
            ));
        };

        let balance = self.gateway.get_pot_balance(user, pot).await?;
        debug!(pot, variable, balance, "Balance task resolved");
        scope.set(variable, balance);
        Ok(scope)
    }

    async fn transfer(
        &self,
        kind: TransferKind,
        task: &TransferTask,
        scope: VariableScope,
    ) -> Result<VariableScope, TaskError> {
        let name = kind.task_name();
        let pot = present(&task.pot);
        let (Some(pot), Some(amount), Some(user), Some(macro_name), Some(origin)) = (
            pot,
            task.amount.as_ref(),
            scope.user(),
            scope.macro_name(),
            scope.origin_id(),
        ) else {
            return Err(missing(
                name,
                &[
                    ("pot", pot.is_some()),
                    ("amount", task.amount.is_some()),
                    ("user", scope.user().is_some()),
                    ("macro name", scope.macro_name().is_some()),
                    ("transaction or trigger id", scope.origin_id().is_some()),
                ],
            ));
        };

        let value = resolve(amount, &scope).ok_or(TaskError::UnresolvedAmount { task: name })?;
        if value.is_zero() {
            return Err(TaskError::ZeroAmount { task: name });
        }

        let minor_units = round_up_minor_units(value)?;
        let dedupe_key = dedupe_key(origin, macro_name);

        // A negative deposit moves money back out of the pot.
        if kind == TransferKind::Deposit && value > Decimal::ZERO {
            self.gateway.deposit(user, pot, minor_units, &dedupe_key).await?;
        } else {
            self.gateway.withdraw(user, pot, minor_units, &dedupe_key).await?;
        }
        debug!(pot, amount = minor_units, dedupe_key = %dedupe_key, task = name, "Transfer issued");
        Ok(scope)
    }

    async fn notify(&self, task: &NotifyTask, scope: VariableScope) -> Result<VariableScope, TaskError> {
        let title = present(&task.title);
        let (Some(title), Some(user)) = (title, scope.user()) else {
            return Err(missing(
                "Notify",
                &[("title", title.is_some()), ("user", scope.user().is_some())],
            ));
        };

        let notification = Notification {
            title: resolve_template(&scope, title),
            body: resolve_template(&scope, task.body.as_deref().unwrap_or_default()),
            url: task.url.clone(),
            image_url: task.image_url.clone(),
        };
        self.gateway.notify(user, &notification).await?;
        Ok(scope)
    }
}

/// Run a math task. Synchronous; never touches the gateway.
pub fn math(task: &MathTask, mut scope: VariableScope) -> Result<VariableScope, TaskError> {
    let operands = task.operands.as_ref().filter(|ops| !ops.is_empty());
    let operation = present(&task.operation);
    let (Some(operands), Some(operation)) = (operands, operation) else {
        return Err(missing(
            "Math",
            &[("operands", operands.is_some()), ("operation", operation.is_some())],
        ));
    };

    let operation: MathOperation = operation
        .parse()
        .map_err(|operation| TaskError::InvalidOperation { operation })?;

    let values = operands
        .iter()
        .map(|op| {
            resolve(op, &scope).ok_or_else(|| TaskError::UnresolvedOperand {
                operand: op.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let result = do_math(operation, &values)?;
    if let Some(variable) = present(&task.variable) {
        scope.set(variable, result);
    }
    Ok(scope)
}

/// Fold `add`/`multiply` over all operands; `subtract`/`divide` use the
/// first two, with a lone operand returned unchanged.
pub fn do_math(operation: MathOperation, operands: &[Decimal]) -> Result<Decimal, TaskError> {
    match operation {
        MathOperation::Add => operands
            .iter()
            .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
            .ok_or(TaskError::Overflow),
        MathOperation::Multiply => operands
            .iter()
            .try_fold(Decimal::ONE, |acc, v| acc.checked_mul(*v))
            .ok_or(TaskError::Overflow),
        MathOperation::Subtract => {
            let (first, second) = binary_operands(operands, Decimal::ZERO);
            first.checked_sub(second).ok_or(TaskError::Overflow)
        }
        MathOperation::Divide => {
            let (first, second) = binary_operands(operands, Decimal::ONE);
            if second.is_zero() {
                return Err(TaskError::DivisionByZero);
            }
            first.checked_div(second).ok_or(TaskError::Overflow)
        }
    }
}

fn binary_operands(operands: &[Decimal], identity: Decimal) -> (Decimal, Decimal) {
    let first = operands.first().copied().unwrap_or(identity);
    let second = operands.get(1).copied().unwrap_or(identity);
    (first, second)
}

/// Idempotency token for a macro instance's money movement.
pub fn dedupe_key(origin_id: &str, macro_name: &str) -> String {
    format!("{origin_id}{macro_name}")
}

/// Magnitude rounded up to a whole minor unit.
pub fn round_up_minor_units(value: Decimal) -> Result<i64, TaskError> {
    value
        .abs()
        .round_dp_with_strategy(0, RoundingStrategy::AwayFromZero)
        .to_i64()
        .ok_or(TaskError::Overflow)
}

/// Substitute `#var`, `£var` and `$var` words. Words that do not resolve
/// are left as written.
pub fn resolve_template(scope: &VariableScope, text: &str) -> String {
    text.split(' ')
        .map(|word| resolve_word(scope, word).unwrap_or_else(|| word.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_word(scope: &VariableScope, word: &str) -> Option<String> {
    let mut chars = word.chars();
    let prefix = chars.next()?;
    let name = chars.as_str();
    match prefix {
        '#' => scope.get(name).map(|v| v.to_string()),
        '£' | '$' => scope.number(name).map(|minor| {
            let major = (minor / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            format!("{prefix}{major:.2}")
        }),
        _ => None,
    }
}

fn resolve(operand: &Operand, scope: &VariableScope) -> Option<Decimal> {
    match operand {
        Operand::Literal(value) => Some(*value),
        Operand::Variable(name) => scope.number(name),
    }
}

/// Treat empty strings like absent fields.
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Name every absent field of the task in one error.
fn missing(task: &'static str, checks: &[(&'static str, bool)]) -> TaskError {
    let fields = checks
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();
    TaskError::MissingFields { task, fields }
}
