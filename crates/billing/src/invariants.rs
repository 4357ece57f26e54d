//! Billing Invariants Module
//!
//! Runnable consistency checks for one customer's billing state in Stripe.
//! They only read, so they can be run after any sequence of operations, by
//! tests and by operators alike.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::gateway::{BillingGateway, SubscriptionFilter};

/// More than this many active subscriptions is reported as a single violation
const ACTIVE_SUBSCRIPTION_SCAN_LIMIT: u64 = 10;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    pub customer_id: String,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationSeverity {
    /// Customer may be charged incorrectly
    Critical,
    /// Inconsistent state that needs attention
    High,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

pub struct InvariantChecker {
    gateway: Arc<dyn BillingGateway>,
}

impl InvariantChecker {
    pub fn new(gateway: Arc<dyn BillingGateway>) -> Self {
        Self { gateway }
    }

    /// Run all invariant checks for a customer
    pub async fn run_all_checks(&self, customer_id: &str) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for name in Self::available_checks() {
            violations.extend(self.run_check(name, customer_id).await?);
        }

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<HashSet<_>>()
            .len();

        if !violations.is_empty() {
            tracing::warn!(
                customer_id = %customer_id,
                violations = violations.len(),
                "Billing invariants violated"
            );
        }

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Run a single invariant check by name
    pub async fn run_check(
        &self,
        name: &str,
        customer_id: &str,
    ) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_default_payment_method" => self.check_single_default(customer_id).await,
            "default_payment_method_attached" => self.check_default_attached(customer_id).await,
            "single_active_subscription" => {
                self.check_single_active_subscription(customer_id).await
            }
            "unique_subscription_items" => self.check_unique_items(customer_id).await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_default_payment_method",
            "default_payment_method_attached",
            "single_active_subscription",
            "unique_subscription_items",
        ]
    }

    /// A customer with cards has a default
    async fn check_single_default(&self, customer_id: &str) -> BillingResult<Vec<InvariantViolation>> {
        let cards = self.gateway.list_card_payment_methods(customer_id).await?;
        let default = self
            .gateway
            .retrieve_customer(customer_id)
            .await?
            .and_then(|c| c.default_payment_method);

        if cards.is_empty() || default.is_some() {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "single_default_payment_method".to_string(),
            customer_id: customer_id.to_string(),
            description: format!("Customer has {} cards but no default", cards.len()),
            context: serde_json::json!({ "card_count": cards.len() }),
            severity: ViolationSeverity::High,
        }])
    }

    /// The default points at a card that is still attached
    async fn check_default_attached(&self, customer_id: &str) -> BillingResult<Vec<InvariantViolation>> {
        let Some(default) = self
            .gateway
            .retrieve_customer(customer_id)
            .await?
            .and_then(|c| c.default_payment_method)
        else {
            return Ok(vec![]);
        };

        let cards = self.gateway.list_card_payment_methods(customer_id).await?;
        if cards.iter().any(|card| card.id == default) {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "default_payment_method_attached".to_string(),
            customer_id: customer_id.to_string(),
            description: format!("Default payment method {} is not attached", default),
            context: serde_json::json!({
                "default_payment_method": default,
                "attached": cards.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            }),
            severity: ViolationSeverity::High,
        }])
    }

    /// More than one active subscription bills the customer twice
    async fn check_single_active_subscription(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let active = self
            .gateway
            .list_subscriptions(
                customer_id,
                SubscriptionFilter::Active,
                ACTIVE_SUBSCRIPTION_SCAN_LIMIT,
            )
            .await?;

        if active.len() <= 1 {
            return Ok(vec![]);
        }

        Ok(vec![InvariantViolation {
            invariant: "single_active_subscription".to_string(),
            customer_id: customer_id.to_string(),
            description: format!(
                "Customer has {} active subscriptions (expected at most 1)",
                active.len()
            ),
            context: serde_json::json!({
                "subscription_ids": active.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            }),
            severity: ViolationSeverity::Critical,
        }])
    }

    /// Each price appears at most once per subscription
    async fn check_unique_items(&self, customer_id: &str) -> BillingResult<Vec<InvariantViolation>> {
        let active = self
            .gateway
            .list_subscriptions(
                customer_id,
                SubscriptionFilter::Active,
                ACTIVE_SUBSCRIPTION_SCAN_LIMIT,
            )
            .await?;

        let mut violations = Vec::new();
        for subscription in active {
            let mut seen = HashSet::new();
            let duplicates: Vec<&str> = subscription
                .items
                .iter()
                .map(|item| item.price_id.as_str())
                .filter(|price_id| !seen.insert(*price_id))
                .collect();

            if !duplicates.is_empty() {
                violations.push(InvariantViolation {
                    invariant: "unique_subscription_items".to_string(),
                    customer_id: customer_id.to_string(),
                    description: format!(
                        "Subscription {} carries duplicate prices",
                        subscription.id
                    ),
                    context: serde_json::json!({
                        "subscription_id": subscription.id,
                        "duplicate_prices": duplicates,
                    }),
                    severity: ViolationSeverity::Critical,
                });
            }
        }

        Ok(violations)
    }
}
