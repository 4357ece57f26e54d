//! Application state

use sqlx::PgPool;
use std::sync::Arc;
use workflow_billing::{BillingService, StripeConfig};

use crate::{
    auth::JwtVerifier,
    config::Config,
    directory::{PgUserDirectory, UserDirectory},
    error::ApiResult,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub directory: Arc<dyn UserDirectory>,
    pub jwt: JwtVerifier,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> ApiResult<Self> {
        let stripe = StripeConfig::new(config.stripe_secret_key.clone())?;
        let billing = BillingService::with_stripe(stripe, pool.clone(), config.billing_settings());
        tracing::info!(
            currency = %config.billing_currency,
            cancel_empty_subscriptions = config.cancel_empty_subscriptions,
            "Stripe billing service initialized"
        );

        Ok(Self::from_parts(
            Arc::new(billing),
            Arc::new(PgUserDirectory::new(pool)),
            JwtVerifier::new(&config.supabase_jwt_secret),
        ))
    }

    /// Assemble state from already-built services
    pub fn from_parts(
        billing: Arc<BillingService>,
        directory: Arc<dyn UserDirectory>,
        jwt: JwtVerifier,
    ) -> Self {
        Self {
            billing,
            directory,
            jwt,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
