//! Card payment methods and the customer's default
//!
//! Whenever a customer has at least one card, exactly one of them is the
//! invoice default. Listing repairs a missing or stale default; removal moves
//! the default elsewhere before detaching.

use serde::Serialize;
use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, PaymentMethod};

/// Card as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMethodSummary {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i64>,
    pub exp_year: Option<i64>,
    pub is_default: bool,
}

impl PaymentMethodSummary {
    fn from_method(method: PaymentMethod, default_id: Option<&str>) -> Self {
        let is_default = default_id == Some(method.id.as_str());
        Self {
            id: method.id,
            brand: method.brand,
            last4: method.last4,
            exp_month: method.exp_month,
            exp_year: method.exp_year,
            is_default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMethodList {
    pub payment_methods: Vec<PaymentMethodSummary>,
    pub default_payment_method_id: Option<String>,
}

pub struct PaymentMethodService {
    gateway: Arc<dyn BillingGateway>,
}

impl PaymentMethodService {
    pub fn new(gateway: Arc<dyn BillingGateway>) -> Self {
        Self { gateway }
    }

    /// List the customer's cards, fixing up the default on the way
    pub async fn list_and_enforce_default(
        &self,
        customer_id: &str,
    ) -> BillingResult<PaymentMethodList> {
        let methods = self.gateway.list_card_payment_methods(customer_id).await?;
        let customer = self
            .gateway
            .retrieve_customer(customer_id)
            .await?
            .ok_or(BillingError::NoCustomer)?;

        let configured = customer.default_payment_method;
        let enforced = self
            .confirmed_default(customer_id, configured.as_deref(), &methods)
            .await?
            .or_else(|| methods.first().map(|m| m.id.clone()));

        if enforced != configured {
            self.gateway
                .set_default_payment_method(customer_id, enforced.as_deref())
                .await?;
            tracing::info!(
                customer_id = %customer_id,
                previous = ?configured,
                default_payment_method = ?enforced,
                "Repaired default payment method"
            );
        }

        let payment_methods = methods
            .into_iter()
            .map(|m| PaymentMethodSummary::from_method(m, enforced.as_deref()))
            .collect();

        Ok(PaymentMethodList {
            payment_methods,
            default_payment_method_id: enforced,
        })
    }

    /// Make one of the customer's own cards the default
    pub async fn set_default(&self, customer_id: &str, payment_method_id: &str) -> BillingResult<()> {
        self.ensure_owned(customer_id, payment_method_id).await?;
        self.gateway
            .set_default_payment_method(customer_id, Some(payment_method_id))
            .await?;

        tracing::info!(
            customer_id = %customer_id,
            payment_method_id = %payment_method_id,
            "Set default payment method"
        );
        Ok(())
    }

    /// Detach a card and return the default in effect afterwards
    pub async fn remove_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> BillingResult<Option<String>> {
        self.ensure_owned(customer_id, payment_method_id).await?;

        let customer = self
            .gateway
            .retrieve_customer(customer_id)
            .await?
            .ok_or(BillingError::NoCustomer)?;

        let configured = customer.default_payment_method;
        let remaining: Vec<PaymentMethod> = self
            .gateway
            .list_card_payment_methods(customer_id)
            .await?
            .into_iter()
            .filter(|m| m.id != payment_method_id)
            .collect();

        let kept = if configured.as_deref() == Some(payment_method_id) {
            None
        } else {
            self.confirmed_default(customer_id, configured.as_deref(), &remaining)
                .await?
        };
        let new_default = kept.or_else(|| remaining.first().map(|m| m.id.clone()));

        // Reassign before detaching so the default never points at a detached card
        if new_default != configured {
            self.gateway
                .set_default_payment_method(customer_id, new_default.as_deref())
                .await?;
        }

        self.gateway.detach_payment_method(payment_method_id).await?;

        tracing::info!(
            customer_id = %customer_id,
            payment_method_id = %payment_method_id,
            new_default = ?new_default,
            "Removed payment method"
        );

        Ok(new_default)
    }

    /// The configured default if it is still attached to the customer.
    ///
    /// A default missing from `listed` is looked up directly before it is
    /// treated as gone, since it may be a non-card method or outside the listing.
    async fn confirmed_default(
        &self,
        customer_id: &str,
        configured: Option<&str>,
        listed: &[PaymentMethod],
    ) -> BillingResult<Option<String>> {
        let Some(id) = configured else {
            return Ok(None);
        };
        if listed.iter().any(|m| m.id == id) {
            return Ok(Some(id.to_string()));
        }

        let attached = self
            .gateway
            .retrieve_payment_method(id)
            .await?
            .is_some_and(|m| m.customer.as_deref() == Some(customer_id));
        Ok(attached.then(|| id.to_string()))
    }

    /// Fails with `Forbidden` unless the card is attached to this customer
    async fn ensure_owned(&self, customer_id: &str, payment_method_id: &str) -> BillingResult<()> {
        if payment_method_id.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "payment_method_id is required".to_string(),
            ));
        }

        let method = self
            .gateway
            .retrieve_payment_method(payment_method_id)
            .await?
            .ok_or_else(|| BillingError::PaymentMethodNotFound(payment_method_id.to_string()))?;

        if method.customer.as_deref() != Some(customer_id) {
            tracing::warn!(
                customer_id = %customer_id,
                payment_method_id = %payment_method_id,
                owner = ?method.customer,
                "Rejected payment method not owned by customer"
            );
            return Err(BillingError::Forbidden(
                "Payment method does not belong to this customer".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryGateway;

    async fn setup() -> (Arc<InMemoryGateway>, PaymentMethodService, String) {
        let gateway = Arc::new(InMemoryGateway::new());
        let customer_id = gateway.seed_customer("cards@example.com").await;
        let service = PaymentMethodService::new(gateway.clone());
        (gateway, service, customer_id)
    }

    #[tokio::test]
    async fn test_first_card_becomes_default() {
        let (gateway, service, customer_id) = setup().await;
        let first = gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        gateway.seed_card(Some(&customer_id), "mastercard", "4444").await;

        let list = service.list_and_enforce_default(&customer_id).await.unwrap();

        assert_eq!(list.default_payment_method_id.as_deref(), Some(first.as_str()));
        assert_eq!(list.payment_methods.iter().filter(|m| m.is_default).count(), 1);
        let customer = gateway.customer(&customer_id).await.unwrap();
        assert_eq!(customer.default_payment_method, Some(first));
    }

    #[tokio::test]
    async fn test_existing_default_is_kept() {
        let (gateway, service, customer_id) = setup().await;
        gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        let second = gateway.seed_card(Some(&customer_id), "amex", "0005").await;
        gateway.seed_default(&customer_id, Some(&second)).await;

        let list = service.list_and_enforce_default(&customer_id).await.unwrap();

        assert_eq!(list.default_payment_method_id, Some(second));
        assert_eq!(gateway.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_default_is_replaced() {
        let (gateway, service, customer_id) = setup().await;
        let remaining = gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        gateway.seed_default(&customer_id, Some("pm_gone")).await;

        let list = service.list_and_enforce_default(&customer_id).await.unwrap();

        assert_eq!(list.default_payment_method_id, Some(remaining));
    }

    #[tokio::test]
    async fn test_stale_default_cleared_when_no_cards() {
        let (gateway, service, customer_id) = setup().await;
        gateway.seed_default(&customer_id, Some("pm_gone")).await;

        let list = service.list_and_enforce_default(&customer_id).await.unwrap();

        assert!(list.payment_methods.is_empty());
        assert_eq!(list.default_payment_method_id, None);
        assert_eq!(gateway.customer(&customer_id).await.unwrap().default_payment_method, None);
    }

    #[tokio::test]
    async fn test_remove_default_promotes_another_card() {
        let (gateway, service, customer_id) = setup().await;
        let first = gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        let second = gateway.seed_card(Some(&customer_id), "visa", "1881").await;
        gateway.seed_default(&customer_id, Some(&first)).await;

        let new_default = service.remove_method(&customer_id, &first).await.unwrap();

        assert_eq!(new_default, Some(second.clone()));
        let attached = gateway.attached_cards(&customer_id).await;
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].id, second);
    }

    #[tokio::test]
    async fn test_remove_last_card_clears_default() {
        let (gateway, service, customer_id) = setup().await;
        let only = gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        gateway.seed_default(&customer_id, Some(&only)).await;

        let new_default = service.remove_method(&customer_id, &only).await.unwrap();

        assert_eq!(new_default, None);
        assert_eq!(gateway.customer(&customer_id).await.unwrap().default_payment_method, None);
    }

    #[tokio::test]
    async fn test_remove_non_default_keeps_default() {
        let (gateway, service, customer_id) = setup().await;
        let default = gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        let other = gateway.seed_card(Some(&customer_id), "visa", "1881").await;
        gateway.seed_default(&customer_id, Some(&default)).await;

        let new_default = service.remove_method(&customer_id, &other).await.unwrap();

        assert_eq!(new_default, Some(default));
    }

    #[tokio::test]
    async fn test_default_beyond_first_page_is_kept() {
        let (gateway, service, customer_id) = setup().await;
        let oldest = gateway.seed_card(Some(&customer_id), "visa", "0001").await;
        for n in 0..10 {
            gateway
                .seed_card(Some(&customer_id), "visa", &format!("{:04}", n + 2))
                .await;
        }
        gateway.seed_default(&customer_id, Some(&oldest)).await;
        gateway.truncate_card_listing(10).await;

        let list = service.list_and_enforce_default(&customer_id).await.unwrap();

        assert_eq!(list.default_payment_method_id, Some(oldest.clone()));
        assert!(list.payment_methods.iter().all(|m| !m.is_default));
        assert_eq!(gateway.mutation_count().await, 0);
        let customer = gateway.customer(&customer_id).await.unwrap();
        assert_eq!(customer.default_payment_method, Some(oldest));
    }

    #[tokio::test]
    async fn test_remove_keeps_default_beyond_first_page() {
        let (gateway, service, customer_id) = setup().await;
        let oldest = gateway.seed_card(Some(&customer_id), "visa", "0001").await;
        let mut newest = String::new();
        for n in 0..10 {
            newest = gateway
                .seed_card(Some(&customer_id), "visa", &format!("{:04}", n + 2))
                .await;
        }
        gateway.seed_default(&customer_id, Some(&oldest)).await;
        gateway.truncate_card_listing(10).await;

        let new_default = service.remove_method(&customer_id, &newest).await.unwrap();

        assert_eq!(new_default, Some(oldest.clone()));
        let customer = gateway.customer(&customer_id).await.unwrap();
        assert_eq!(customer.default_payment_method, Some(oldest));
    }

    #[tokio::test]
    async fn test_remove_non_default_repairs_stale_default() {
        let (gateway, service, customer_id) = setup().await;
        let keep = gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        let other = gateway.seed_card(Some(&customer_id), "visa", "1881").await;
        gateway.seed_default(&customer_id, Some("pm_gone")).await;

        let new_default = service.remove_method(&customer_id, &other).await.unwrap();

        assert_eq!(new_default, Some(keep.clone()));
        let customer = gateway.customer(&customer_id).await.unwrap();
        assert_eq!(customer.default_payment_method, Some(keep));
    }

    #[tokio::test]
    async fn test_foreign_card_is_forbidden_and_untouched() {
        let (gateway, service, customer_id) = setup().await;
        let other_customer = gateway.seed_customer("other@example.com").await;
        let foreign = gateway.seed_card(Some(&other_customer), "visa", "4242").await;

        let remove = service.remove_method(&customer_id, &foreign).await;
        let set = service.set_default(&customer_id, &foreign).await;

        assert!(matches!(remove, Err(BillingError::Forbidden(_))));
        assert!(matches!(set, Err(BillingError::Forbidden(_))));
        assert_eq!(gateway.mutation_count().await, 0);
        assert_eq!(gateway.attached_cards(&other_customer).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unattached_card_is_forbidden() {
        let (gateway, service, customer_id) = setup().await;
        let loose = gateway.seed_card(None, "visa", "4242").await;

        let result = service.set_default(&customer_id, &loose).await;

        assert!(matches!(result, Err(BillingError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_unknown_card_not_found() {
        let (_gateway, service, customer_id) = setup().await;
        let result = service.remove_method(&customer_id, "pm_missing").await;
        assert!(matches!(result, Err(BillingError::PaymentMethodNotFound(_))));
    }

    #[tokio::test]
    async fn test_set_default_switches_cards() {
        let (gateway, service, customer_id) = setup().await;
        let first = gateway.seed_card(Some(&customer_id), "visa", "4242").await;
        let second = gateway.seed_card(Some(&customer_id), "visa", "1881").await;
        gateway.seed_default(&customer_id, Some(&first)).await;

        service.set_default(&customer_id, &second).await.unwrap();

        let list = service.list_and_enforce_default(&customer_id).await.unwrap();
        assert_eq!(list.default_payment_method_id, Some(second));
    }
}
