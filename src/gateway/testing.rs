//! Recording gateway for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::accounts::{BankAccount, UserAccount};
use crate::error::GatewayError;
use crate::gateway::{BankGateway, Notification};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Balance { pot: String },
    Deposit { pot: String, amount: i64, dedupe_key: String },
    Withdraw { pot: String, amount: i64, dedupe_key: String },
    Notify(Notification),
    Accounts,
    RegisterWebhook { url: String },
}

#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    balances: Mutex<HashMap<String, i64>>,
    accounts: Mutex<Vec<BankAccount>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingGateway {
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_balance(&self, pot: &str, balance: i64) {
        self.balances.lock().unwrap().insert(pot.to_string(), balance);
    }

    pub fn set_accounts(&self, accounts: Vec<BankAccount>) {
        *self.accounts.lock().unwrap() = accounts;
    }

    /// Make the next call fail with a non-retryable status error.
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().unwrap() = Some(reason.to_string());
    }

    fn record(&self, call: GatewayCall) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(call);
        match self.fail_next.lock().unwrap().take() {
            Some(body) => Err(GatewayError::Status {
                endpoint: "/test".into(),
                status: 400,
                body,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BankGateway for RecordingGateway {
    async fn get_pot_balance(&self, _user: &UserAccount, pot: &str) -> Result<i64, GatewayError> {
        self.record(GatewayCall::Balance { pot: pot.to_string() })?;
        self.balances
            .lock()
            .unwrap()
            .get(pot)
            .copied()
            .ok_or_else(|| GatewayError::PotNotFound { pot: pot.to_string() })
    }

    async fn deposit(
        &self,
        _user: &UserAccount,
        pot: &str,
        amount: i64,
        dedupe_key: &str,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Deposit {
            pot: pot.to_string(),
            amount,
            dedupe_key: dedupe_key.to_string(),
        })
    }

    async fn withdraw(
        &self,
        _user: &UserAccount,
        pot: &str,
        amount: i64,
        dedupe_key: &str,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Withdraw {
            pot: pot.to_string(),
            amount,
            dedupe_key: dedupe_key.to_string(),
        })
    }

    async fn notify(
        &self,
        _user: &UserAccount,
        notification: &Notification,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Notify(notification.clone()))
    }

    async fn get_accounts(&self, _user: &UserAccount) -> Result<Vec<BankAccount>, GatewayError> {
        self.record(GatewayCall::Accounts)?;
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn register_webhook(&self, _user: &UserAccount, url: &str) -> Result<(), GatewayError> {
        self.record(GatewayCall::RegisterWebhook { url: url.to_string() })
    }
}
