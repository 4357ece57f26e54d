//! Billing summary for the account page

use serde::Serialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::gateway::{BillingCustomer, BillingGateway, Invoice, Subscription, SubscriptionFilter};
use crate::store::BillingStore;

/// Default number of invoices returned with a summary
pub const DEFAULT_INVOICE_LIMIT: u64 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSummary {
    pub id: String,
    pub status: String,
    /// Unit amount of the first item's price
    pub unit_amount: i64,
    pub currency: Option<String>,
    /// Number of items (one per active workflow)
    pub quantity: u64,
    /// `unit_amount * quantity`; exact only while every workflow has the same price
    pub monthly_total: i64,
    /// Sum of each item's own amount
    pub itemized_total: i64,
    /// Next charge date (RFC 3339)
    pub current_period_end: Option<String>,
}

impl SubscriptionSummary {
    pub fn from_subscription(subscription: &Subscription) -> Self {
        let first = subscription.items.first();
        let unit_amount = first.and_then(|item| item.unit_amount).unwrap_or(0);
        let quantity = subscription.items.len() as u64;
        let itemized_total = subscription
            .items
            .iter()
            .map(|item| item.unit_amount.unwrap_or(0) * item.quantity as i64)
            .sum();

        Self {
            id: subscription.id.clone(),
            status: subscription.status.clone(),
            unit_amount,
            currency: first.and_then(|item| item.currency.clone()),
            quantity,
            monthly_total: unit_amount * quantity as i64,
            itemized_total,
            current_period_end: subscription.current_period_end.and_then(to_rfc3339),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceSummary {
    pub id: String,
    pub number: Option<String>,
    pub amount_paid: Option<i64>,
    pub amount_due: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub created: Option<String>,
    pub paid_at: Option<String>,
}

impl From<Invoice> for InvoiceSummary {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            number: invoice.number,
            amount_paid: invoice.amount_paid,
            amount_due: invoice.amount_due,
            currency: invoice.currency,
            status: invoice.status,
            hosted_invoice_url: invoice.hosted_invoice_url,
            created: invoice.created.and_then(to_rfc3339),
            paid_at: invoice.paid_at.and_then(to_rfc3339),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerSummary {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl From<BillingCustomer> for CustomerSummary {
    fn from(customer: BillingCustomer) -> Self {
        Self {
            id: customer.id,
            email: customer.email,
            name: customer.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingSummary {
    pub subscription: Option<SubscriptionSummary>,
    pub invoices: Vec<InvoiceSummary>,
    pub customer: Option<CustomerSummary>,
}

impl BillingSummary {
    /// Summary for a user without any billing history
    pub fn empty() -> Self {
        Self {
            subscription: None,
            invoices: Vec::new(),
            customer: None,
        }
    }
}

/// Price a customer is currently paying per workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentPrice {
    pub unit_amount: i64,
    pub currency: Option<String>,
}

pub struct SummaryService {
    gateway: Arc<dyn BillingGateway>,
    store: Arc<dyn BillingStore>,
    invoice_limit: u64,
}

impl SummaryService {
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn BillingStore>,
        invoice_limit: u64,
    ) -> Self {
        Self {
            gateway,
            store,
            invoice_limit,
        }
    }

    /// Subscription, recent invoices and customer details for one customer
    pub async fn summarize(&self, customer_id: &str) -> BillingResult<BillingSummary> {
        let Some(customer) = self.gateway.retrieve_customer(customer_id).await? else {
            return Ok(BillingSummary::empty());
        };

        let Some(subscription) = self.select_subscription(customer_id).await? else {
            return Ok(BillingSummary {
                customer: Some(customer.into()),
                ..BillingSummary::empty()
            });
        };

        let invoices = self
            .gateway
            .list_invoices(customer_id, self.invoice_limit)
            .await?
            .into_iter()
            .map(InvoiceSummary::from)
            .collect();

        Ok(BillingSummary {
            subscription: Some(SubscriptionSummary::from_subscription(&subscription)),
            invoices,
            customer: Some(customer.into()),
        })
    }

    /// First item price of the first active subscription
    pub async fn current_price(&self, customer_id: &str) -> BillingResult<Option<CurrentPrice>> {
        let subscriptions = self
            .gateway
            .list_subscriptions(customer_id, SubscriptionFilter::Active, 1)
            .await?;

        Ok(subscriptions
            .first()
            .and_then(|s| s.items.first())
            .map(|item| CurrentPrice {
                unit_amount: item.unit_amount.unwrap_or(0),
                currency: item.currency.clone(),
            }))
    }

    /// Tracked subscription if it is this customer's, else the most recent in any status
    async fn select_subscription(&self, customer_id: &str) -> BillingResult<Option<Subscription>> {
        if let Some(subscription_id) = self.store.subscription_id_for_customer(customer_id).await? {
            match self.gateway.retrieve_subscription(&subscription_id).await? {
                Some(subscription) if subscription.customer == customer_id => {
                    return Ok(Some(subscription));
                }
                Some(subscription) => tracing::warn!(
                    customer_id = %customer_id,
                    subscription_id = %subscription_id,
                    owner = %subscription.customer,
                    "Tracked subscription belongs to another customer, ignoring it"
                ),
                None => {}
            }
        }

        Ok(self
            .gateway
            .list_subscriptions(customer_id, SubscriptionFilter::All, 1)
            .await?
            .into_iter()
            .next())
    }
}

fn to_rfc3339(timestamp: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}
