//! Server configuration loaded from the environment

use std::env;
use workflow_billing::{BillingSettings, ReconcilePolicy, DEFAULT_INVOICE_LIMIT};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    /// HS256 secret used by the identity provider to sign access tokens
    pub supabase_jwt_secret: String,
    pub stripe_secret_key: String,
    pub billing_currency: String,
    pub invoice_history_limit: u64,
    pub cancel_empty_subscriptions: bool,
    pub allowed_origins: Vec<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("billing_currency", &self.billing_currency)
            .field("invoice_history_limit", &self.invoice_history_limit)
            .field("cancel_empty_subscriptions", &self.cancel_empty_subscriptions)
            .field("allowed_origins", &self.allowed_origins)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let invoice_history_limit = match lookup("INVOICE_HISTORY_LIMIT") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or(ConfigError::Invalid {
                    name: "INVOICE_HISTORY_LIMIT",
                    value,
                })?,
            None => DEFAULT_INVOICE_LIMIT,
        };

        let cancel_empty_subscriptions = match lookup("CANCEL_EMPTY_SUBSCRIPTIONS") {
            Some(value) => match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "CANCEL_EMPTY_SUBSCRIPTIONS",
                        value,
                    })
                }
            },
            None => false,
        };

        let billing_currency = lookup("BILLING_CURRENCY")
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "eur".to_string());
        if billing_currency.len() != 3 || !billing_currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                name: "BILLING_CURRENCY",
                value: billing_currency,
            });
        }

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            database_url: required("DATABASE_URL")?,
            supabase_jwt_secret: required("SUPABASE_JWT_SECRET")?,
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            billing_currency,
            invoice_history_limit,
            cancel_empty_subscriptions,
            allowed_origins,
        })
    }

    pub fn billing_settings(&self) -> BillingSettings {
        BillingSettings {
            currency: self.billing_currency.clone(),
            invoice_limit: self.invoice_history_limit,
            reconcile: ReconcilePolicy {
                cancel_when_empty: self.cancel_empty_subscriptions,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://localhost/billing"),
        ("SUPABASE_JWT_SECRET", "secret"),
        ("STRIPE_SECRET_KEY", "sk_test_123"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.billing_currency, "eur");
        assert_eq!(config.invoice_history_limit, 12);
        assert!(!config.cancel_empty_subscriptions);
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.billing_settings(), BillingSettings::default());
    }

    #[test]
    fn test_missing_required() {
        let err = Config::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("STRIPE_SECRET_KEY")));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("BILLING_CURRENCY", "USD"));
        vars.push(("INVOICE_HISTORY_LIMIT", "24"));
        vars.push(("CANCEL_EMPTY_SUBSCRIPTIONS", "true"));

        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.billing_currency, "usd");
        assert_eq!(config.invoice_history_limit, 24);
        assert!(config.billing_settings().reconcile.cancel_when_empty);
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("INVOICE_HISTORY_LIMIT", "zero"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "INVOICE_HISTORY_LIMIT", .. })
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("BILLING_CURRENCY", "euro"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "BILLING_CURRENCY", .. })
        ));
    }
}
