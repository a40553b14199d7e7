//! Bank gateway — the narrow interface macros use to reach the bank.
//!
//! Calls that move money carry a dedupe key; the bank treats a repeated
//! key as a no-op, so re-running a macro instance is safe. Transport
//! timeouts and retries belong to the implementation, not to callers.

pub mod monzo;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::accounts::{BankAccount, UserAccount};
use crate::error::GatewayError;

pub use monzo::{MonzoConfig, MonzoGateway};

/// Pot name that addresses the main account balance instead of a pot.
pub fn is_current_account(pot: &str) -> bool {
    pot == "current" || pot == "Current"
}

/// A feed notification pushed to the user's banking app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait BankGateway: Send + Sync {
    /// Balance of a pot (or the account for `current`), in minor units.
    async fn get_pot_balance(&self, user: &UserAccount, pot: &str) -> Result<i64, GatewayError>;

    /// Move `amount` minor units from the account into a pot.
    async fn deposit(
        &self,
        user: &UserAccount,
        pot: &str,
        amount: i64,
        dedupe_key: &str,
    ) -> Result<(), GatewayError>;

    /// Move `amount` minor units from a pot back to the account.
    async fn withdraw(
        &self,
        user: &UserAccount,
        pot: &str,
        amount: i64,
        dedupe_key: &str,
    ) -> Result<(), GatewayError>;

    async fn notify(
        &self,
        user: &UserAccount,
        notification: &Notification,
    ) -> Result<(), GatewayError>;

    async fn get_accounts(&self, user: &UserAccount) -> Result<Vec<BankAccount>, GatewayError>;

    /// Register `url` to receive the user's transaction webhooks.
    /// Registering an existing (account, url) pair is a no-op.
    async fn register_webhook(&self, user: &UserAccount, url: &str) -> Result<(), GatewayError>;
}
