//! Configuration types, read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::gateway::MonzoConfig;
use crate::gateway::monzo::{DEFAULT_API_URL, DEFAULT_IMAGE_URL};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port the HTTP server binds on.
    pub port: u16,
    pub db_path: PathBuf,
    /// Public base URL; the webhook is registered at `<app_url>/hook`.
    pub app_url: Option<String>,
    /// Optional JSON file of rules seeded at startup.
    pub rules_path: Option<PathBuf>,
    /// Near-duplicate window for the request ledger.
    pub grace_window: Duration,
    /// Wait after recording a delivery before re-checking it is current.
    pub settle_delay: Duration,
    /// Directory for daily-rolling log files. Stdout only when unset.
    pub log_dir: Option<PathBuf>,
    pub bank: BankConfig,
}

/// Bank API credentials and transport settings.
#[derive(Debug, Clone)]
pub struct BankConfig {
    pub api_url: String,
    pub access_token: Option<SecretString>,
    pub user_email: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl BankConfig {
    pub fn monzo(&self) -> MonzoConfig {
        MonzoConfig {
            api_url: self.api_url.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
            default_image_url: DEFAULT_IMAGE_URL.to_string(),
            ..MonzoConfig::default()
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_or(&get, "POT_AUTOMATOR_PORT", 8080)?,
            db_path: get("POT_AUTOMATOR_DB_PATH")
                .unwrap_or_else(|| "./data/pot-automator.db".to_string())
                .into(),
            app_url: get("POT_AUTOMATOR_APP_URL").map(|u| u.trim_end_matches('/').to_string()),
            rules_path: get("POT_AUTOMATOR_RULES_PATH").map(PathBuf::from),
            grace_window: Duration::from_millis(parse_or(
                &get,
                "POT_AUTOMATOR_GRACE_WINDOW_MS",
                1000,
            )?),
            settle_delay: Duration::from_millis(parse_or(
                &get,
                "POT_AUTOMATOR_SETTLE_DELAY_MS",
                1000,
            )?),
            log_dir: get("POT_AUTOMATOR_LOG_DIR").map(PathBuf::from),
            bank: BankConfig {
                api_url: get("MONZO_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                access_token: get("MONZO_ACCESS_TOKEN").map(SecretString::from),
                user_email: get("MONZO_USER_EMAIL"),
                timeout: Duration::from_secs(parse_or(&get, "MONZO_TIMEOUT_SECS", 10)?),
                max_retries: parse_or(&get, "MONZO_MAX_RETRIES", 2)?,
            },
        })
    }

    /// The access token, required to act on the bank.
    pub fn require_access_token(&self) -> Result<&SecretString, ConfigError> {
        self.bank
            .access_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("MONZO_ACCESS_TOKEN".into()))
    }

    /// Where the bank should deliver webhooks, if a public URL is set.
    pub fn webhook_url(&self) -> Option<String> {
        self.app_url.as_ref().map(|u| format!("{u}/hook"))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.db_path, PathBuf::from("./data/pot-automator.db"));
        assert_eq!(cfg.grace_window, Duration::from_secs(1));
        assert_eq!(cfg.settle_delay, Duration::from_secs(1));
        assert_eq!(cfg.bank.api_url, "https://api.monzo.com");
        assert_eq!(cfg.bank.max_retries, 2);
        assert!(cfg.webhook_url().is_none());
        assert!(cfg.require_access_token().is_err());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("POT_AUTOMATOR_PORT", "9090"),
            ("POT_AUTOMATOR_APP_URL", "https://pots.example.com/"),
            ("POT_AUTOMATOR_SETTLE_DELAY_MS", "250"),
            ("MONZO_ACCESS_TOKEN", "secret"),
            ("MONZO_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.settle_delay, Duration::from_millis(250));
        assert_eq!(
            cfg.webhook_url().as_deref(),
            Some("https://pots.example.com/hook")
        );
        assert_eq!(cfg.require_access_token().unwrap().expose_secret(), "secret");
        assert_eq!(cfg.bank.monzo().timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_number_names_the_key() {
        let err = config(&[("POT_AUTOMATOR_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "POT_AUTOMATOR_PORT"));
    }

    #[test]
    fn blank_values_use_defaults() {
        let cfg = config(&[("POT_AUTOMATOR_PORT", "  "), ("MONZO_ACCESS_TOKEN", "")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.bank.access_token.is_none());
    }
}
