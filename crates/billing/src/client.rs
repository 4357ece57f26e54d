//! Stripe client wrapper
//!
//! Implements [`BillingGateway`] on top of async-stripe. Each method converts
//! the Stripe resource into the crate's own types so the services never touch
//! Stripe structs directly.

use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;

// Import the proration behavior enum from the subscription module (not subscription_item)
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    CancelSubscription, CreateCustomer, CreatePrice, CreatePriceRecurring,
    CreatePriceRecurringInterval, CreateProduct, CreateSubscription, CreateSubscriptionItems,
    Currency, Customer, CustomerId, CustomerInvoiceSettings, IdOrCreate, ListCustomers,
    ListInvoices, ListPaymentMethods, ListPrices, ListSubscriptions, PaymentMethodId,
    PaymentMethodTypeFilter, Price, Product, ProductId, SubscriptionId,
    SubscriptionStatus as StripeSubStatus, SubscriptionStatusFilter, UpdateCustomer,
    UpdateProduct, UpdateSubscription, UpdateSubscriptionItems,
};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingCustomer, BillingGateway, CatalogPrice, Invoice, NewPrice, PaymentMethod,
    PriceInterval, ProrationBehavior, Subscription, SubscriptionFilter, SubscriptionItem,
    SubscriptionItemChange,
};

/// Largest page Stripe serves for list endpoints
const CARD_PAGE_SIZE: u64 = 100;

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>) -> BillingResult<Self> {
        let secret_key = secret_key.into();
        if secret_key.trim().is_empty() {
            return Err(BillingError::Config(
                "Stripe secret key is empty".to_string(),
            ));
        }

        Ok(Self { secret_key })
    }
}

/// Wrapper around the async-stripe client
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    /// True when running against a test-mode key
    pub fn is_test_mode(&self) -> bool {
        self.config.secret_key.starts_with("sk_test_")
            || self.config.secret_key.starts_with("rk_test_")
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("test_mode", &self.is_test_mode())
            .finish_non_exhaustive()
    }
}

fn parse_id<T>(kind: &str, raw: &str) -> BillingResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid {} ID '{}': {}", kind, raw, e)))
}

fn is_not_found(err: &stripe::StripeError) -> bool {
    matches!(err, stripe::StripeError::Stripe(request_error) if request_error.http_status == 404)
}

fn parse_currency(code: &str) -> BillingResult<Currency> {
    serde_json::from_value(serde_json::Value::String(code.to_lowercase()))
        .map_err(|_| BillingError::InvalidInput(format!("Unsupported currency: {}", code)))
}

fn subscription_status_str(status: &StripeSubStatus) -> &'static str {
    match status {
        StripeSubStatus::Active => "active",
        StripeSubStatus::PastDue => "past_due",
        StripeSubStatus::Canceled => "canceled",
        StripeSubStatus::Unpaid => "unpaid",
        StripeSubStatus::Trialing => "trialing",
        StripeSubStatus::Incomplete => "incomplete",
        StripeSubStatus::IncompleteExpired => "incomplete_expired",
        StripeSubStatus::Paused => "paused",
    }
}

fn convert_price(price: &Price) -> CatalogPrice {
    CatalogPrice {
        id: price.id.to_string(),
        product_id: price.product.as_ref().map(|p| p.id().to_string()),
        lookup_key: price.lookup_key.clone(),
        unit_amount: price.unit_amount,
        currency: price
            .currency
            .map(|c| c.to_string())
            .unwrap_or_default(),
    }
}

fn convert_customer(customer: Customer) -> BillingCustomer {
    let default_payment_method = customer
        .invoice_settings
        .and_then(|s| s.default_payment_method)
        .map(|pm| pm.id().to_string());

    BillingCustomer {
        id: customer.id.to_string(),
        email: customer.email,
        name: customer.name,
        default_payment_method,
    }
}

fn convert_payment_method(pm: stripe::PaymentMethod) -> PaymentMethod {
    let card = pm.card.as_ref();
    PaymentMethod {
        id: pm.id.to_string(),
        customer: pm.customer.as_ref().map(|c| c.id().to_string()),
        brand: card.map(|c| c.brand.to_string()),
        last4: card.map(|c| c.last4.clone()),
        exp_month: card.map(|c| c.exp_month),
        exp_year: card.map(|c| c.exp_year),
    }
}

fn convert_subscription(sub: stripe::Subscription) -> Subscription {
    let items = sub
        .items
        .data
        .iter()
        .filter_map(|item| {
            // Items without a price cannot be matched against the catalog
            let price = item.price.as_ref()?;
            Some(SubscriptionItem {
                id: item.id.to_string(),
                price_id: price.id.to_string(),
                unit_amount: price.unit_amount,
                currency: price.currency.map(|c| c.to_string()),
                quantity: item.quantity.unwrap_or(1),
            })
        })
        .collect();

    Subscription {
        id: sub.id.to_string(),
        customer: sub.customer.id().to_string(),
        status: subscription_status_str(&sub.status).to_string(),
        current_period_end: Some(sub.current_period_end),
        items,
    }
}

fn convert_invoice(invoice: stripe::Invoice) -> Invoice {
    Invoice {
        id: invoice.id.to_string(),
        number: invoice.number,
        amount_paid: invoice.amount_paid,
        amount_due: invoice.amount_due,
        currency: invoice.currency.map(|c| c.to_string()),
        status: invoice.status.map(|s| s.as_str().to_string()),
        hosted_invoice_url: invoice.hosted_invoice_url,
        created: invoice.created,
        paid_at: invoice.status_transitions.and_then(|t| t.paid_at),
    }
}

#[async_trait]
impl BillingGateway for StripeClient {
    async fn find_price_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> BillingResult<Option<CatalogPrice>> {
        let mut params = ListPrices::new();
        params.lookup_keys = Some(vec![lookup_key.to_string()]);
        params.limit = Some(1);

        let prices = Price::list(&self.client, &params).await?;
        Ok(prices.data.first().map(convert_price))
    }

    async fn create_product(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<String> {
        let mut params = CreateProduct::new(name);
        params.metadata = Some(metadata);

        let product = Product::create(&self.client, params).await?;
        Ok(product.id.to_string())
    }

    async fn archive_product(&self, product_id: &str) -> BillingResult<()> {
        let product_id: ProductId = parse_id("product", product_id)?;
        let mut params = UpdateProduct::new();
        params.active = Some(false);

        Product::update(&self.client, &product_id, params).await?;
        Ok(())
    }

    async fn create_price(&self, price: NewPrice) -> BillingResult<CatalogPrice> {
        let recurring_interval = match price.interval {
            PriceInterval::Month => CreatePriceRecurringInterval::Month,
        };

        let mut params = CreatePrice::new(parse_currency(&price.currency)?);
        params.product = Some(IdOrCreate::Id(&price.product_id));
        params.unit_amount = Some(price.unit_amount);
        params.lookup_key = Some(&price.lookup_key);
        params.recurring = Some(CreatePriceRecurring {
            interval: recurring_interval,
            interval_count: None,
            aggregate_usage: None,
            trial_period_days: None,
            usage_type: None,
        });

        let created = Price::create(&self.client, params).await?;
        Ok(convert_price(&created))
    }

    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<BillingCustomer>> {
        let mut params = ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);

        let customers = Customer::list(&self.client, &params).await?;
        Ok(customers.data.into_iter().next().map(convert_customer))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<Option<BillingCustomer>> {
        let id: CustomerId = parse_id("customer", customer_id)?;

        match Customer::retrieve(&self.client, &id, &[]).await {
            Ok(customer) if customer.deleted => Ok(None),
            Ok(customer) => Ok(Some(convert_customer(customer))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_customer(&self, email: &str) -> BillingResult<BillingCustomer> {
        let mut params = CreateCustomer::new();
        params.email = Some(email);

        let customer = Customer::create(&self.client, params).await?;
        Ok(convert_customer(customer))
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: Option<&str>,
    ) -> BillingResult<()> {
        let id: CustomerId = parse_id("customer", customer_id)?;

        // Stripe clears the default when it receives an empty string
        let mut params = UpdateCustomer::new();
        params.invoice_settings = Some(CustomerInvoiceSettings {
            default_payment_method: Some(payment_method_id.unwrap_or_default().to_string()),
            ..Default::default()
        });

        Customer::update(&self.client, &id, params).await?;
        Ok(())
    }

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<PaymentMethod>> {
        let mut params = ListPaymentMethods::new();
        params.customer = Some(parse_id("customer", customer_id)?);
        params.type_ = Some(PaymentMethodTypeFilter::Card);
        params.limit = Some(CARD_PAGE_SIZE);

        // Stripe pages newest first; a default card can sit past the first page
        let mut cards = Vec::new();
        loop {
            let page = stripe::PaymentMethod::list(&self.client, &params).await?;
            params.starting_after = page.data.last().map(|pm| pm.id.clone());
            cards.extend(page.data.into_iter().map(convert_payment_method));
            if !page.has_more || params.starting_after.is_none() {
                break;
            }
        }
        Ok(cards)
    }

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> BillingResult<Option<PaymentMethod>> {
        let id: PaymentMethodId = parse_id("payment method", payment_method_id)?;

        match stripe::PaymentMethod::retrieve(&self.client, &id, &[]).await {
            Ok(pm) => Ok(Some(convert_payment_method(pm))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()> {
        let id: PaymentMethodId = parse_id("payment method", payment_method_id)?;
        stripe::PaymentMethod::detach(&self.client, &id).await?;
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        filter: SubscriptionFilter,
        limit: u64,
    ) -> BillingResult<Vec<Subscription>> {
        let params = ListSubscriptions {
            customer: Some(parse_id("customer", customer_id)?),
            status: Some(match filter {
                SubscriptionFilter::Active => SubscriptionStatusFilter::Active,
                SubscriptionFilter::All => SubscriptionStatusFilter::All,
            }),
            limit: Some(limit),
            ..Default::default()
        };

        let subscriptions = stripe::Subscription::list(&self.client, &params).await?;
        Ok(subscriptions
            .data
            .into_iter()
            .map(convert_subscription)
            .collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let id: SubscriptionId = parse_id("subscription", subscription_id)?;

        match stripe::Subscription::retrieve(&self.client, &id, &[]).await {
            Ok(sub) => Ok(Some(convert_subscription(sub))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        quantity: u64,
    ) -> BillingResult<Subscription> {
        let mut params = CreateSubscription::new(parse_id("customer", customer_id)?);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id.to_string()),
            quantity: Some(quantity),
            ..Default::default()
        }]);

        let subscription = stripe::Subscription::create(&self.client, params).await?;
        Ok(convert_subscription(subscription))
    }

    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        changes: Vec<SubscriptionItemChange>,
        proration: ProrationBehavior,
    ) -> BillingResult<Subscription> {
        let id: SubscriptionId = parse_id("subscription", subscription_id)?;

        let items = changes
            .into_iter()
            .map(|change| match change {
                SubscriptionItemChange::Add { price_id, quantity } => UpdateSubscriptionItems {
                    price: Some(price_id),
                    quantity: Some(quantity),
                    ..Default::default()
                },
                SubscriptionItemChange::Remove { item_id } => UpdateSubscriptionItems {
                    id: Some(item_id),
                    deleted: Some(true),
                    ..Default::default()
                },
            })
            .collect();

        let params = UpdateSubscription {
            items: Some(items),
            proration_behavior: Some(match proration {
                ProrationBehavior::None => SubscriptionProrationBehavior::None,
                ProrationBehavior::CreateProrations => {
                    SubscriptionProrationBehavior::CreateProrations
                }
            }),
            ..Default::default()
        };

        let subscription = stripe::Subscription::update(&self.client, &id, params).await?;
        Ok(convert_subscription(subscription))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let id: SubscriptionId = parse_id("subscription", subscription_id)?;
        let subscription =
            stripe::Subscription::cancel(&self.client, &id, CancelSubscription::default()).await?;
        Ok(convert_subscription(subscription))
    }

    async fn list_invoices(&self, customer_id: &str, limit: u64) -> BillingResult<Vec<Invoice>> {
        let mut params = ListInvoices::new();
        params.customer = Some(parse_id("customer", customer_id)?);
        params.limit = Some(limit);

        let invoices = stripe::Invoice::list(&self.client, &params).await?;
        Ok(invoices.data.into_iter().map(convert_invoice).collect())
    }
}
