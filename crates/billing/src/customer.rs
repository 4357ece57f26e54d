//! Customer resolution
//!
//! Maps an application user to exactly one Stripe customer. The stored
//! customer id wins; email lookup is only a backfill for users created before
//! ids were recorded.

use std::sync::Arc;

use crate::error::BillingResult;
use crate::gateway::BillingGateway;
use crate::store::{BillingStore, BillingUser};

pub struct CustomerService {
    gateway: Arc<dyn BillingGateway>,
    store: Arc<dyn BillingStore>,
}

impl CustomerService {
    pub fn new(gateway: Arc<dyn BillingGateway>, store: Arc<dyn BillingStore>) -> Self {
        Self { gateway, store }
    }

    /// Find the user's customer, creating one on first use
    pub async fn resolve_customer(&self, user: &BillingUser) -> BillingResult<String> {
        if let Some(customer_id) = self.find_customer(user).await? {
            return Ok(customer_id);
        }

        let customer = self.gateway.create_customer(&user.email).await?;
        self.store.save_customer_id(user, &customer.id).await?;

        tracing::info!(
            user_id = %user.user_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer.id)
    }

    /// Look the customer up without creating one
    pub async fn find_customer(&self, user: &BillingUser) -> BillingResult<Option<String>> {
        let stored = self
            .store
            .subscriber(user.user_id)
            .await?
            .and_then(|record| record.stripe_customer_id);

        if let Some(customer_id) = stored {
            if self.gateway.retrieve_customer(&customer_id).await?.is_some() {
                return Ok(Some(customer_id));
            }
            tracing::warn!(
                user_id = %user.user_id,
                customer_id = %customer_id,
                "Stored customer no longer exists, falling back to email lookup"
            );
        }

        // First match wins; duplicate customers for one email are tolerated
        let Some(customer) = self.gateway.find_customer_by_email(&user.email).await? else {
            return Ok(None);
        };

        self.store.save_customer_id(user, &customer.id).await?;
        tracing::debug!(
            user_id = %user.user_id,
            customer_id = %customer.id,
            "Backfilled customer id from email lookup"
        );

        Ok(Some(customer.id))
    }
}
