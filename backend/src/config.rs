use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::services::subscriptions::SubscriptionSettings;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_TRIAL_DAYS: u32 = 7;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_EVENT_RETENTION_DAYS: i32 = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub paid_price_id: String,
    pub trial_days: u32,
}

impl std::fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeSettings")
            .field("paid_price_id", &self.paid_price_id)
            .field("trial_days", &self.trial_days)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub bind_addr: SocketAddr,
    pub auth: AuthSettings,
    pub stripe: StripeSettings,
    pub checkout_success_url: Option<String>,
    pub checkout_cancel_url: Option<String>,
    pub provider_timeout: Duration,
    pub stripe_event_retention_days: i32,
    pub log_format_json: bool,
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let bind_addr = parse_or(&get, "BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?;

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            frontend_origin: require("FRONTEND_ORIGIN")?,
            bind_addr,
            auth: AuthSettings {
                jwt_secret: require("JWT_SECRET")?,
                issuer: require("JWT_ISSUER")?,
                audience: require("JWT_AUDIENCE")?,
            },
            stripe: StripeSettings {
                secret_key: require("STRIPE_SECRET_KEY")?,
                webhook_secret: require("STRIPE_WEBHOOK_SECRET")?,
                paid_price_id: require("STRIPE_PAID_PRICE_ID")?,
                trial_days: parse_or(&get, "STRIPE_TRIAL_DAYS", Some(DEFAULT_TRIAL_DAYS))?,
            },
            checkout_success_url: get("CHECKOUT_SUCCESS_URL"),
            checkout_cancel_url: get("CHECKOUT_CANCEL_URL"),
            provider_timeout: Duration::from_secs(parse_or(
                &get,
                "PROVIDER_TIMEOUT_SECS",
                Some(DEFAULT_PROVIDER_TIMEOUT_SECS),
            )?),
            stripe_event_retention_days: parse_or(
                &get,
                "STRIPE_EVENT_RETENTION_DAYS",
                Some(DEFAULT_EVENT_RETENTION_DAYS),
            )?,
            log_format_json: get("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            sentry_dsn: get("SENTRY_DSN"),
        })
    }

    pub fn subscription_settings(&self) -> SubscriptionSettings {
        SubscriptionSettings {
            price_id: self.stripe.paid_price_id.clone(),
            trial_days: self.stripe.trial_days,
            checkout_success_url: self.checkout_success_url.clone(),
            checkout_cancel_url: self.checkout_cancel_url.clone(),
            provider_timeout: self.provider_timeout,
        }
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/lexibill".to_string()),
            ("FRONTEND_ORIGIN", "http://localhost:5173".to_string()),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef".to_string()),
            ("JWT_ISSUER", "lexibill".to_string()),
            ("JWT_AUDIENCE", "lexibill-app".to_string()),
            ("STRIPE_SECRET_KEY", "sk_test_123".to_string()),
            ("STRIPE_WEBHOOK_SECRET", "whsec_123".to_string()),
            ("STRIPE_PAID_PRICE_ID", "price_123".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn applies_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.stripe.trial_days, 7);
        assert_eq!(config.provider_timeout, Duration::from_secs(15));
        assert_eq!(config.stripe_event_retention_days, 7);
        assert_eq!(config.checkout_success_url, None);
        assert!(!config.log_format_json);
    }

    #[test]
    fn reads_overrides() {
        let mut env = base_env();
        env.insert("STRIPE_TRIAL_DAYS", "14".into());
        env.insert("PROVIDER_TIMEOUT_SECS", "3".into());
        env.insert("CHECKOUT_SUCCESS_URL", "https://app.test/ok".into());
        env.insert("LOG_FORMAT", "JSON".into());
        env.insert("BIND_ADDR", "0.0.0.0:8080".into());

        let config = load(&env).unwrap();
        let settings = config.subscription_settings();
        assert_eq!(settings.trial_days, 14);
        assert_eq!(settings.provider_timeout, Duration::from_secs(3));
        assert_eq!(
            settings.checkout_success_url.as_deref(),
            Some("https://app.test/ok")
        );
        assert!(config.log_format_json);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn missing_required_value_is_named() {
        let mut env = base_env();
        env.remove("STRIPE_WEBHOOK_SECRET");
        assert_eq!(
            load(&env).unwrap_err(),
            ConfigError::Missing("STRIPE_WEBHOOK_SECRET")
        );

        let mut env = base_env();
        env.insert("DATABASE_URL", "   ".into());
        assert_eq!(load(&env).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let mut env = base_env();
        env.insert("STRIPE_TRIAL_DAYS", "a week".into());
        assert_eq!(
            load(&env).unwrap_err(),
            ConfigError::Invalid {
                name: "STRIPE_TRIAL_DAYS",
                value: "a week".into()
            }
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = load(&base_env()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk_test_123"));
        assert!(!rendered.contains("whsec_123"));
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
