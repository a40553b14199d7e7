//! Startup bootstrap: make sure the configured user exists, has an account
//! selected and a registered webhook, and has its seed rules.

use tracing::{info, warn};

use crate::accounts::{UserAccount, select_account};
use crate::config::AppConfig;
use crate::error::{ConfigError, Error, GatewayError};
use crate::gateway::BankGateway;
use crate::rules::seed;
use crate::store::Database;

/// Used when no user email is configured.
pub const DEFAULT_USER_EMAIL: &str = "owner@localhost";

/// Bootstrap the single configured user. Returns the stored user.
pub async fn bootstrap_user(
    config: &AppConfig,
    db: &dyn Database,
    gateway: &dyn BankGateway,
) -> Result<UserAccount, Error> {
    let token = config.require_access_token()?;
    let email = config
        .bank
        .user_email
        .as_deref()
        .unwrap_or(DEFAULT_USER_EMAIL);

    let mut user = db.upsert_user(email, token).await?;

    if user.account_id.is_none() {
        let accounts = gateway.get_accounts(&user).await?;
        let account = select_account(&accounts).ok_or_else(|| GatewayError::NoAccount {
            user_id: user.id.clone(),
        })?;
        db.set_account_id(&user.id, &account.id).await?;
        info!(account_id = %account.id, description = %account.description, "Selected account");
        user.account_id = Some(account.id.clone());
    }

    match config.webhook_url() {
        Some(url) => {
            gateway.register_webhook(&user, &url).await?;
            info!(url = %url, "Webhook registered");
        }
        None => warn!("POT_AUTOMATOR_APP_URL not set, skipping webhook registration"),
    }

    if let Some(path) = &config.rules_path {
        let rules = seed::load_rules_file(path).await?;
        seed::seed_rules(db, &user.id, &rules).await?;
    }

    Ok(user)
}

/// Configuration problems that stop the binary before it binds.
pub fn check(config: &AppConfig) -> Result<(), ConfigError> {
    config.require_access_token()?;
    Ok(())
}
