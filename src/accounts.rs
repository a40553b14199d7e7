//! Users and the bank accounts they act on.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// The acting identity for gateway calls.
///
/// `account_id` is the selected current account at the bank; webhook events
/// are routed to the user whose account id matches the event.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub account_id: Option<String>,
    pub access_token: SecretString,
}

impl UserAccount {
    pub fn new(id: impl Into<String>, email: impl Into<String>, access_token: &str) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            account_id: None,
            access_token: SecretString::from(access_token),
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }
}

/// An account as listed by the bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub account_type: String,
    #[serde(default)]
    pub closed: bool,
}

/// Pick the account to act on: the first one that is still open.
pub fn select_account(accounts: &[BankAccount]) -> Option<&BankAccount> {
    accounts.iter().find(|a| !a.closed)
}
