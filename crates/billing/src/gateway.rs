//! Billing provider abstraction
//!
//! Every service in this crate talks to the payment processor through
//! [`BillingGateway`]. The production implementation is
//! [`StripeClient`](crate::client::StripeClient); tests use the in-memory
//! gateway from the `testing` module.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::BillingResult;

/// Recurring interval of a catalog price. Only monthly billing is sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceInterval {
    Month,
}

impl PriceInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceInterval::Month => "month",
        }
    }

    /// Adjective form used inside lookup keys ("monthly")
    pub fn lookup_label(&self) -> &'static str {
        match self {
            PriceInterval::Month => "monthly",
        }
    }
}

/// How the processor should treat mid-cycle item changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBehavior {
    None,
    CreateProrations,
}

/// Which subscriptions to return when listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter {
    Active,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogPrice {
    pub id: String,
    pub product_id: Option<String>,
    pub lookup_key: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: String,
}

/// Parameters for a new recurring price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrice {
    pub product_id: String,
    pub unit_amount: i64,
    pub currency: String,
    pub interval: PriceInterval,
    pub lookup_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Invoice default payment method as configured on the customer
    pub default_payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMethod {
    pub id: String,
    /// Customer the method is attached to, if any
    pub customer: Option<String>,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i64>,
    pub exp_year: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub price_id: String,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    /// Processor status string ("active", "past_due", "canceled", ...)
    pub status: String,
    /// Unix timestamp of the end of the current period (next charge)
    pub current_period_end: Option<i64>,
    pub items: Vec<SubscriptionItem>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn item_for_price(&self, price_id: &str) -> Option<&SubscriptionItem> {
        self.items.iter().find(|item| item.price_id == price_id)
    }
}

/// A single line-item change applied with one subscription update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItemChange {
    Add { price_id: String, quantity: u64 },
    Remove { item_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invoice {
    pub id: String,
    pub number: Option<String>,
    pub amount_paid: Option<i64>,
    pub amount_due: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub hosted_invoice_url: Option<String>,
    /// Unix timestamp
    pub created: Option<i64>,
    /// Unix timestamp at which the invoice was paid
    pub paid_at: Option<i64>,
}

/// Operations the billing services need from the payment processor
#[async_trait]
pub trait BillingGateway: Send + Sync {
    // Catalog

    async fn find_price_by_lookup_key(&self, lookup_key: &str)
        -> BillingResult<Option<CatalogPrice>>;

    async fn create_product(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<String>;

    async fn archive_product(&self, product_id: &str) -> BillingResult<()>;

    async fn create_price(&self, price: NewPrice) -> BillingResult<CatalogPrice>;

    // Customers

    /// First customer whose email matches exactly
    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<BillingCustomer>>;

    /// `None` when the customer does not exist or was deleted
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<Option<BillingCustomer>>;

    async fn create_customer(&self, email: &str) -> BillingResult<BillingCustomer>;

    /// Sets (or clears, with `None`) the customer's invoice default payment method
    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: Option<&str>,
    ) -> BillingResult<()>;

    // Payment methods

    async fn list_card_payment_methods(&self, customer_id: &str)
        -> BillingResult<Vec<PaymentMethod>>;

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> BillingResult<Option<PaymentMethod>>;

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()>;

    // Subscriptions

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        filter: SubscriptionFilter,
        limit: u64,
    ) -> BillingResult<Vec<Subscription>>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Subscription>>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        quantity: u64,
    ) -> BillingResult<Subscription>;

    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        changes: Vec<SubscriptionItemChange>,
        proration: ProrationBehavior,
    ) -> BillingResult<Subscription>;

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<Subscription>;

    // Invoices

    /// Most recent first
    async fn list_invoices(&self, customer_id: &str, limit: u64) -> BillingResult<Vec<Invoice>>;
}
