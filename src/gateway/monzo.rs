//! Monzo REST API gateway.
//!
//! Reads are plain GETs, writes are form-encoded. Transport failures and
//! 5xx/429 responses are retried with exponential backoff; everything else
//! is returned to the caller on the first attempt.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::accounts::{BankAccount, UserAccount};
use crate::error::GatewayError;
use crate::gateway::{BankGateway, Notification, is_current_account};

pub const DEFAULT_API_URL: &str = "https://api.monzo.com";
pub const DEFAULT_IMAGE_URL: &str =
    "https://www.animatedimages.org/data/media/198/animated-frog-image-0015.gif";

/// Transport settings for [`MonzoGateway`].
#[derive(Debug, Clone)]
pub struct MonzoConfig {
    pub api_url: String,
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_base_delay: Duration,
    /// Image shown on feed items that do not name one.
    pub default_image_url: String,
}

impl Default for MonzoConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
            default_image_url: DEFAULT_IMAGE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct Pot {
    id: String,
    name: String,
    balance: i64,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct PotsResponse {
    pots: Vec<Pot>,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<BankAccount>,
}

#[derive(Debug, Deserialize)]
struct Webhook {
    account_id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct WebhooksResponse {
    #[serde(default)]
    webhooks: Vec<Webhook>,
}

/// [`BankGateway`] backed by the Monzo API.
pub struct MonzoGateway {
    config: MonzoConfig,
    client: reqwest::Client,
}

impl MonzoGateway {
    pub fn new(config: MonzoConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::RequestFailed {
                endpoint: config.api_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    fn account_id<'a>(&self, user: &'a UserAccount) -> Result<&'a str, GatewayError> {
        user.account_id
            .as_deref()
            .ok_or_else(|| GatewayError::NoAccount {
                user_id: user.id.clone(),
            })
    }

    /// Send the request built by `build`, retrying transient failures.
    async fn send<F>(&self, endpoint: &str, build: F) -> Result<reqwest::Response, GatewayError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let err = match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    GatewayError::Status {
                        endpoint: endpoint.to_string(),
                        status,
                        body,
                    }
                }
                Err(e) if e.is_timeout() => GatewayError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout: self.config.timeout,
                },
                Err(e) => GatewayError::RequestFailed {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                },
            };

            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }
            let delay = self.config.retry_base_delay * 2u32.pow(attempt);
            warn!(endpoint, attempt = attempt + 1, ?delay, "Retrying bank request: {err}");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        user: &UserAccount,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let url = self.url(endpoint);
        let resp = self
            .send(endpoint, || {
                self.client
                    .get(&url)
                    .bearer_auth(user.access_token.expose_secret())
                    .query(query)
            })
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    async fn post_form(
        &self,
        user: &UserAccount,
        method: reqwest::Method,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<(), GatewayError> {
        let url = self.url(endpoint);
        self.send(endpoint, || {
            self.client
                .request(method.clone(), &url)
                .bearer_auth(user.access_token.expose_secret())
                .form(form)
        })
        .await?;
        Ok(())
    }

    async fn get_pots(&self, user: &UserAccount) -> Result<Vec<Pot>, GatewayError> {
        let account_id = self.account_id(user)?;
        let resp: PotsResponse = self
            .get_json(user, "/pots", &[("current_account_id", account_id)])
            .await?;
        Ok(resp.pots.into_iter().filter(|p| !p.deleted).collect())
    }

    async fn find_pot(&self, user: &UserAccount, pot: &str) -> Result<Pot, GatewayError> {
        self.get_pots(user)
            .await?
            .into_iter()
            .find(|p| p.name == pot)
            .ok_or_else(|| GatewayError::PotNotFound {
                pot: pot.to_string(),
            })
    }

    async fn move_money(
        &self,
        user: &UserAccount,
        pot: &str,
        amount: i64,
        dedupe_key: &str,
        direction: &str,
    ) -> Result<(), GatewayError> {
        let account_id = self.account_id(user)?;
        let pot_id = self.find_pot(user, pot).await?.id;
        let amount = amount.to_string();
        let endpoint = format!("/pots/{pot_id}/{direction}");
        self.post_form(
            user,
            reqwest::Method::PUT,
            &endpoint,
            &[
                ("source_account_id", account_id),
                ("destination_account_id", account_id),
                ("amount", &amount),
                ("dedupe_id", dedupe_key),
            ],
        )
        .await?;
        debug!(pot, amount = %amount, dedupe_key, direction, "Pot transfer accepted");
        Ok(())
    }

    async fn list_webhooks(&self, user: &UserAccount) -> Result<Vec<Webhook>, GatewayError> {
        let account_id = self.account_id(user)?;
        let resp: WebhooksResponse = self
            .get_json(user, "/webhooks", &[("account_id", account_id)])
            .await?;
        Ok(resp.webhooks)
    }
}

#[async_trait]
impl BankGateway for MonzoGateway {
    async fn get_pot_balance(&self, user: &UserAccount, pot: &str) -> Result<i64, GatewayError> {
        if is_current_account(pot) {
            let account_id = self.account_id(user)?;
            let resp: BalanceResponse = self
                .get_json(user, "/balance", &[("account_id", account_id)])
                .await?;
            return Ok(resp.balance);
        }
        Ok(self.find_pot(user, pot).await?.balance)
    }

    async fn deposit(
        &self,
        user: &UserAccount,
        pot: &str,
        amount: i64,
        dedupe_key: &str,
    ) -> Result<(), GatewayError> {
        self.move_money(user, pot, amount, dedupe_key, "deposit").await
    }

    async fn withdraw(
        &self,
        user: &UserAccount,
        pot: &str,
        amount: i64,
        dedupe_key: &str,
    ) -> Result<(), GatewayError> {
        self.move_money(user, pot, amount, dedupe_key, "withdraw").await
    }

    async fn notify(
        &self,
        user: &UserAccount,
        notification: &Notification,
    ) -> Result<(), GatewayError> {
        let account_id = self.account_id(user)?;
        let image_url = notification
            .image_url
            .as_deref()
            .unwrap_or(&self.config.default_image_url);
        let mut form = vec![
            ("account_id", account_id),
            ("type", "basic"),
            ("params[title]", notification.title.as_str()),
            ("params[body]", notification.body.as_str()),
            ("params[image_url]", image_url),
        ];
        if let Some(url) = notification.url.as_deref() {
            form.push(("url", url));
        }
        self.post_form(user, reqwest::Method::POST, "/feed", &form)
            .await
    }

    async fn get_accounts(&self, user: &UserAccount) -> Result<Vec<BankAccount>, GatewayError> {
        let resp: AccountsResponse = self
            .get_json(user, "/accounts", &[("account_type", "uk_retail")])
            .await?;
        Ok(resp.accounts)
    }

    async fn register_webhook(&self, user: &UserAccount, url: &str) -> Result<(), GatewayError> {
        let account_id = self.account_id(user)?;
        let existing = self.list_webhooks(user).await?;
        if existing
            .iter()
            .any(|w| w.account_id == account_id && w.url == url)
        {
            debug!(url, "Webhook already registered");
            return Ok(());
        }
        self.post_form(
            user,
            reqwest::Method::POST,
            "/webhooks",
            &[("account_id", account_id), ("url", url)],
        )
        .await
    }
}
