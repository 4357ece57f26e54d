//! Workflow price catalog
//!
//! Each workflow is sold as a monthly recurring price. Prices are found again
//! through a deterministic lookup key, so provisioning is idempotent without
//! any local mapping table.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, NewPrice, PriceInterval};

/// Build the lookup key for a workflow price
///
/// `workflow_{id}_{currency}_{interval}_{amount}`, e.g.
/// `workflow_wf_42_eur_monthly_1500`.
pub fn lookup_key(
    workflow_id: &str,
    currency: &str,
    interval: PriceInterval,
    amount_cents: i64,
) -> String {
    format!(
        "workflow_{}_{}_{}_{}",
        workflow_id,
        currency.to_lowercase(),
        interval.lookup_label(),
        amount_cents
    )
}

/// One entry of a batch provisioning request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowPriceRequest {
    pub id: String,
    pub name: String,
    pub amount_cents: i64,
}

/// Provisions prices for workflows on demand
pub struct CatalogService {
    gateway: Arc<dyn BillingGateway>,
    currency: String,
}

impl CatalogService {
    pub fn new(gateway: Arc<dyn BillingGateway>, currency: impl Into<String>) -> Self {
        Self {
            gateway,
            currency: currency.into().to_lowercase(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Return the id of the monthly price for this workflow and amount,
    /// creating the product and price the first time
    pub async fn ensure_price(
        &self,
        workflow_id: &str,
        name: &str,
        amount_cents: i64,
    ) -> BillingResult<String> {
        validate(workflow_id, name, amount_cents)?;
        self.ensure_validated(workflow_id, name, amount_cents).await
    }

    /// Provision a batch of workflows
    ///
    /// The whole batch is validated before the first external call. A gateway
    /// error stops the batch; prices created for earlier entries are kept.
    pub async fn ensure_prices(
        &self,
        workflows: &[WorkflowPriceRequest],
    ) -> BillingResult<BTreeMap<String, String>> {
        for workflow in workflows {
            validate(&workflow.id, &workflow.name, workflow.amount_cents)?;
        }

        let mut price_ids = BTreeMap::new();
        for workflow in workflows {
            let price_id = self
                .ensure_validated(&workflow.id, &workflow.name, workflow.amount_cents)
                .await?;
            price_ids.insert(workflow.id.clone(), price_id);
        }

        Ok(price_ids)
    }

    async fn ensure_validated(
        &self,
        workflow_id: &str,
        name: &str,
        amount_cents: i64,
    ) -> BillingResult<String> {
        let key = lookup_key(workflow_id, &self.currency, PriceInterval::Month, amount_cents);

        if let Some(existing) = self.gateway.find_price_by_lookup_key(&key).await? {
            tracing::debug!(workflow_id = %workflow_id, price_id = %existing.id, "Reusing workflow price");
            return Ok(existing.id);
        }

        let mut metadata = HashMap::new();
        metadata.insert("workflow_id".to_string(), workflow_id.to_string());
        let product_id = self.gateway.create_product(name, metadata).await?;

        let created = self
            .gateway
            .create_price(NewPrice {
                product_id: product_id.clone(),
                unit_amount: amount_cents,
                currency: self.currency.clone(),
                interval: PriceInterval::Month,
                lookup_key: key.clone(),
            })
            .await;

        match created {
            Ok(price) => {
                tracing::info!(
                    workflow_id = %workflow_id,
                    product_id = %product_id,
                    price_id = %price.id,
                    lookup_key = %key,
                    "Created workflow price"
                );
                Ok(price.id)
            }
            Err(e) => {
                // Leave no active product without a price behind
                if let Err(archive_err) = self.gateway.archive_product(&product_id).await {
                    tracing::error!(
                        product_id = %product_id,
                        error = %archive_err,
                        "Failed to archive product after price creation failed"
                    );
                }
                Err(e)
            }
        }
    }
}

fn validate(workflow_id: &str, name: &str, amount_cents: i64) -> BillingResult<()> {
    if workflow_id.trim().is_empty() {
        return Err(BillingError::InvalidInput("Workflow id is required".to_string()));
    }
    if name.trim().is_empty() {
        return Err(BillingError::InvalidInput(format!(
            "Workflow name is required for '{}'",
            workflow_id
        )));
    }
    if amount_cents <= 0 {
        return Err(BillingError::InvalidInput(format!(
            "Amount for '{}' must be positive, got {}",
            workflow_id, amount_cents
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryGateway;

    fn service() -> (Arc<InMemoryGateway>, CatalogService) {
        let gateway = Arc::new(InMemoryGateway::new());
        let catalog = CatalogService::new(gateway.clone(), "eur");
        (gateway, catalog)
    }

    fn request(id: &str, amount_cents: i64) -> WorkflowPriceRequest {
        WorkflowPriceRequest {
            id: id.to_string(),
            name: format!("Workflow {}", id),
            amount_cents,
        }
    }

    #[test]
    fn test_lookup_key_format() {
        assert_eq!(
            lookup_key("wf_42", "EUR", PriceInterval::Month, 1500),
            "workflow_wf_42_eur_monthly_1500"
        );
    }

    #[tokio::test]
    async fn test_ensure_price_is_idempotent() {
        let (gateway, catalog) = service();

        let first = catalog.ensure_price("wf1", "Invoices", 1500).await.unwrap();
        let second = catalog.ensure_price("wf1", "Invoices", 1500).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.products().await.len(), 1);
        assert_eq!(gateway.prices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_amount_creates_new_price_and_keeps_old() {
        let (gateway, catalog) = service();

        let old = catalog.ensure_price("wf1", "Invoices", 1500).await.unwrap();
        let new = catalog.ensure_price("wf1", "Invoices", 2000).await.unwrap();

        assert_ne!(old, new);
        let prices = gateway.prices().await;
        assert_eq!(prices.len(), 2);
        assert!(prices.iter().any(|p| p.id == old && p.unit_amount == Some(1500)));
    }

    #[tokio::test]
    async fn test_product_carries_workflow_metadata() {
        let (gateway, catalog) = service();
        catalog.ensure_price("wf9", "Reports", 990).await.unwrap();

        let products = gateway.products().await;
        assert_eq!(products[0].name, "Reports");
        assert_eq!(
            products[0].metadata.get("workflow_id").map(String::as_str),
            Some("wf9")
        );
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_without_calls() {
        let (gateway, catalog) = service();

        assert!(matches!(
            catalog.ensure_price("", "Name", 100).await,
            Err(BillingError::InvalidInput(_))
        ));
        assert!(matches!(
            catalog.ensure_price("wf1", "  ", 100).await,
            Err(BillingError::InvalidInput(_))
        ));
        assert!(matches!(
            catalog.ensure_price("wf1", "Name", 0).await,
            Err(BillingError::InvalidInput(_))
        ));
        assert_eq!(gateway.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_batch_validated_before_any_call() {
        let (gateway, catalog) = service();

        let result = catalog
            .ensure_prices(&[request("wf1", 100), request("wf2", -5)])
            .await;

        assert!(matches!(result, Err(BillingError::InvalidInput(_))));
        assert_eq!(gateway.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_batch_returns_map_by_workflow() {
        let (_gateway, catalog) = service();

        let ids = catalog
            .ensure_prices(&[request("wf1", 100), request("wf2", 200)])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_ne!(ids["wf1"], ids["wf2"]);
    }

    #[tokio::test]
    async fn test_failed_price_archives_product() {
        let (gateway, catalog) = service();
        gateway.fail_on("create_price").await;

        let result = catalog.ensure_price("wf1", "Invoices", 1500).await;

        assert!(matches!(result, Err(BillingError::StripeApi(_))));
        let products = gateway.products().await;
        assert_eq!(products.len(), 1);
        assert!(!products[0].active);
    }
}
