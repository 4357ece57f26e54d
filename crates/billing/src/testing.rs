//! In-memory implementations of [`BillingGateway`] and [`BillingStore`]
//!
//! Behaves like the subset of Stripe the services rely on: list-by-lookup-key,
//! first-match customer search, subscription item add/remove, detach. Every
//! mutation is counted and every subscription update records the proration
//! behavior it was asked for, so tests can assert on both.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;
use workflow_billing_shared::AgentStatus;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingCustomer, BillingGateway, CatalogPrice, Invoice, NewPrice, PaymentMethod,
    ProrationBehavior, Subscription, SubscriptionFilter, SubscriptionItem,
    SubscriptionItemChange,
};
use crate::store::{BillingStore, BillingUser, SubscriberRecord};

/// Start of the fake billing period (2023-11-14T22:13:20Z)
pub const PERIOD_START: i64 = 1_700_000_000;
const PERIOD_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeProduct {
    pub id: String,
    pub name: String,
    pub metadata: HashMap<String, String>,
    pub active: bool,
}

#[derive(Default)]
struct GatewayState {
    next_id: u64,
    products: Vec<FakeProduct>,
    prices: Vec<CatalogPrice>,
    customers: Vec<BillingCustomer>,
    payment_methods: Vec<PaymentMethod>,
    subscriptions: Vec<Subscription>,
    invoices: Vec<(String, Invoice)>,
    proration_log: Vec<ProrationBehavior>,
    mutations: usize,
    failing: HashSet<&'static str>,
    card_page_size: Option<usize>,
}

impl GatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    fn check(&self, op: &'static str) -> BillingResult<()> {
        if self.failing.contains(op) {
            return Err(BillingError::StripeApi(format!("{} failed (injected)", op)));
        }
        Ok(())
    }

    fn item_for(&mut self, price_id: &str, quantity: u64) -> SubscriptionItem {
        let id = self.next_id("si");
        let price = self.prices.iter().find(|p| p.id == price_id);
        SubscriptionItem {
            id,
            price_id: price_id.to_string(),
            unit_amount: price.and_then(|p| p.unit_amount),
            currency: price.map(|p| p.currency.clone()),
            quantity,
        }
    }
}

/// In-memory stand-in for Stripe
#[derive(Default)]
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `op` fail until [`clear_failures`](Self::clear_failures)
    pub async fn fail_on(&self, op: &'static str) {
        self.state.lock().await.failing.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    /// Card listings return only the newest `size` cards, like one unpaged request
    pub async fn truncate_card_listing(&self, size: usize) {
        self.state.lock().await.card_page_size = Some(size);
    }

    /// Number of mutating calls that reached the gateway
    pub async fn mutation_count(&self) -> usize {
        self.state.lock().await.mutations
    }

    /// Proration behaviors passed to every subscription update, in order
    pub async fn proration_log(&self) -> Vec<ProrationBehavior> {
        self.state.lock().await.proration_log.clone()
    }

    pub async fn products(&self) -> Vec<FakeProduct> {
        self.state.lock().await.products.clone()
    }

    pub async fn prices(&self) -> Vec<CatalogPrice> {
        self.state.lock().await.prices.clone()
    }

    pub async fn customers(&self) -> Vec<BillingCustomer> {
        self.state.lock().await.customers.clone()
    }

    pub async fn customer(&self, customer_id: &str) -> Option<BillingCustomer> {
        let state = self.state.lock().await;
        state.customers.iter().find(|c| c.id == customer_id).cloned()
    }

    pub async fn subscription(&self, subscription_id: &str) -> Option<Subscription> {
        let state = self.state.lock().await;
        state
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned()
    }

    pub async fn subscriptions_for(&self, customer_id: &str) -> Vec<Subscription> {
        let state = self.state.lock().await;
        state
            .subscriptions
            .iter()
            .filter(|s| s.customer == customer_id)
            .cloned()
            .collect()
    }

    pub async fn attached_cards(&self, customer_id: &str) -> Vec<PaymentMethod> {
        let state = self.state.lock().await;
        state
            .payment_methods
            .iter()
            .filter(|pm| pm.customer.as_deref() == Some(customer_id))
            .cloned()
            .collect()
    }

    /// Seed a customer without counting it as a mutation
    pub async fn seed_customer(&self, email: &str) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_id("cus");
        state.customers.push(BillingCustomer {
            id: id.clone(),
            email: Some(email.to_string()),
            name: None,
            default_payment_method: None,
        });
        id
    }

    /// Seed a price that already exists in the catalog
    pub async fn seed_price(&self, price_id: &str, unit_amount: i64, currency: &str) {
        let mut state = self.state.lock().await;
        state.prices.push(CatalogPrice {
            id: price_id.to_string(),
            product_id: None,
            lookup_key: None,
            unit_amount: Some(unit_amount),
            currency: currency.to_string(),
        });
    }

    /// Attach a new card to a customer (the "add card" user action)
    pub async fn seed_card(&self, customer_id: Option<&str>, brand: &str, last4: &str) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_id("pm");
        state.payment_methods.push(PaymentMethod {
            id: id.clone(),
            customer: customer_id.map(str::to_string),
            brand: Some(brand.to_string()),
            last4: Some(last4.to_string()),
            exp_month: Some(12),
            exp_year: Some(2030),
        });
        id
    }

    /// Force the configured default without any checks
    pub async fn seed_default(&self, customer_id: &str, payment_method_id: Option<&str>) {
        let mut state = self.state.lock().await;
        if let Some(customer) = state.customers.iter_mut().find(|c| c.id == customer_id) {
            customer.default_payment_method = payment_method_id.map(str::to_string);
        }
    }

    /// Seed a subscription as if it had been created out of band
    pub async fn seed_subscription(
        &self,
        customer_id: &str,
        status: &str,
        price_ids: &[&str],
    ) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_id("sub");
        let items = price_ids
            .iter()
            .map(|price_id| state.item_for(price_id, 1))
            .collect();
        state.subscriptions.push(Subscription {
            id: id.clone(),
            customer: customer_id.to_string(),
            status: status.to_string(),
            current_period_end: Some(PERIOD_START + PERIOD_SECONDS),
            items,
        });
        id
    }

    pub async fn seed_invoice(&self, customer_id: &str, invoice: Invoice) {
        let mut state = self.state.lock().await;
        state.invoices.push((customer_id.to_string(), invoice));
    }
}

#[async_trait]
impl BillingGateway for InMemoryGateway {
    async fn find_price_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> BillingResult<Option<CatalogPrice>> {
        let state = self.state.lock().await;
        state.check("find_price_by_lookup_key")?;
        Ok(state
            .prices
            .iter()
            .find(|p| p.lookup_key.as_deref() == Some(lookup_key))
            .cloned())
    }

    async fn create_product(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<String> {
        let mut state = self.state.lock().await;
        state.check("create_product")?;
        state.mutations += 1;
        let id = state.next_id("prod");
        state.products.push(FakeProduct {
            id: id.clone(),
            name: name.to_string(),
            metadata,
            active: true,
        });
        Ok(id)
    }

    async fn archive_product(&self, product_id: &str) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        state.check("archive_product")?;
        state.mutations += 1;
        let product = state
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| BillingError::StripeApi(format!("No such product: {}", product_id)))?;
        product.active = false;
        Ok(())
    }

    async fn create_price(&self, price: NewPrice) -> BillingResult<CatalogPrice> {
        let mut state = self.state.lock().await;
        state.check("create_price")?;
        state.mutations += 1;
        let id = state.next_id("price");
        let created = CatalogPrice {
            id,
            product_id: Some(price.product_id),
            lookup_key: Some(price.lookup_key),
            unit_amount: Some(price.unit_amount),
            currency: price.currency,
        };
        state.prices.push(created.clone());
        Ok(created)
    }

    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<BillingCustomer>> {
        let state = self.state.lock().await;
        state.check("find_customer_by_email")?;
        Ok(state
            .customers
            .iter()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<Option<BillingCustomer>> {
        let state = self.state.lock().await;
        state.check("retrieve_customer")?;
        Ok(state.customers.iter().find(|c| c.id == customer_id).cloned())
    }

    async fn create_customer(&self, email: &str) -> BillingResult<BillingCustomer> {
        let mut state = self.state.lock().await;
        state.check("create_customer")?;
        state.mutations += 1;
        let id = state.next_id("cus");
        let customer = BillingCustomer {
            id,
            email: Some(email.to_string()),
            name: None,
            default_payment_method: None,
        };
        state.customers.push(customer.clone());
        Ok(customer)
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: Option<&str>,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        state.check("set_default_payment_method")?;
        state.mutations += 1;
        let customer = state
            .customers
            .iter_mut()
            .find(|c| c.id == customer_id)
            .ok_or_else(|| BillingError::StripeApi(format!("No such customer: {}", customer_id)))?;
        customer.default_payment_method = payment_method_id.map(str::to_string);
        Ok(())
    }

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<PaymentMethod>> {
        let state = self.state.lock().await;
        state.check("list_card_payment_methods")?;
        let cards = state
            .payment_methods
            .iter()
            .filter(|pm| pm.customer.as_deref() == Some(customer_id))
            .cloned();
        Ok(match state.card_page_size {
            Some(size) => cards.rev().take(size).collect(),
            None => cards.collect(),
        })
    }

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> BillingResult<Option<PaymentMethod>> {
        let state = self.state.lock().await;
        state.check("retrieve_payment_method")?;
        Ok(state
            .payment_methods
            .iter()
            .find(|pm| pm.id == payment_method_id)
            .cloned())
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        state.check("detach_payment_method")?;
        state.mutations += 1;
        let pm = state
            .payment_methods
            .iter_mut()
            .find(|pm| pm.id == payment_method_id)
            .ok_or_else(|| {
                BillingError::StripeApi(format!("No such payment method: {}", payment_method_id))
            })?;
        pm.customer = None;
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        filter: SubscriptionFilter,
        limit: u64,
    ) -> BillingResult<Vec<Subscription>> {
        let state = self.state.lock().await;
        state.check("list_subscriptions")?;
        // Newest first, as Stripe returns them
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .filter(|s| s.customer == customer_id)
            .filter(|s| filter == SubscriptionFilter::All || s.is_active())
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let state = self.state.lock().await;
        state.check("retrieve_subscription")?;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        quantity: u64,
    ) -> BillingResult<Subscription> {
        let mut state = self.state.lock().await;
        state.check("create_subscription")?;
        state.mutations += 1;
        let id = state.next_id("sub");
        let item = state.item_for(price_id, quantity);
        let subscription = Subscription {
            id,
            customer: customer_id.to_string(),
            status: "active".to_string(),
            current_period_end: Some(PERIOD_START + PERIOD_SECONDS),
            items: vec![item],
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        changes: Vec<SubscriptionItemChange>,
        proration: ProrationBehavior,
    ) -> BillingResult<Subscription> {
        let mut state = self.state.lock().await;
        state.check("update_subscription_items")?;
        state.mutations += 1;
        state.proration_log.push(proration);

        let mut new_items = Vec::new();
        let mut removed = Vec::new();
        for change in changes {
            match change {
                SubscriptionItemChange::Add { price_id, quantity } => {
                    new_items.push(state.item_for(&price_id, quantity));
                }
                SubscriptionItemChange::Remove { item_id } => removed.push(item_id),
            }
        }

        let subscription = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| {
                BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
            })?;
        subscription.items.retain(|item| !removed.contains(&item.id));
        subscription.items.extend(new_items);
        Ok(subscription.clone())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let mut state = self.state.lock().await;
        state.check("cancel_subscription")?;
        state.mutations += 1;
        let subscription = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| {
                BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
            })?;
        subscription.status = "canceled".to_string();
        Ok(subscription.clone())
    }

    async fn list_invoices(&self, customer_id: &str, limit: u64) -> BillingResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        state.check("list_invoices")?;
        Ok(state
            .invoices
            .iter()
            .rev()
            .filter(|(owner, _)| owner == customer_id)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(_, invoice)| invoice.clone())
            .collect())
    }
}

/// In-memory [`BillingStore`]
#[derive(Default)]
pub struct InMemoryBillingStore {
    subscribers: Mutex<HashMap<Uuid, SubscriberRecord>>,
    agents: Mutex<HashMap<(Uuid, String), (String, AgentStatus)>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn agent(&self, user_id: Uuid, workflow_id: &str) -> Option<(String, AgentStatus)> {
        self.agents
            .lock()
            .await
            .get(&(user_id, workflow_id.to_string()))
            .cloned()
    }

    /// Active agent count per user
    pub async fn active_agent_counts(&self) -> HashMap<Uuid, i64> {
        let mut counts = HashMap::new();
        for ((user_id, _), (_, status)) in self.agents.lock().await.iter() {
            if *status == AgentStatus::Active {
                *counts.entry(*user_id).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn subscriber(&self, user_id: Uuid) -> BillingResult<Option<SubscriberRecord>> {
        Ok(self.subscribers.lock().await.get(&user_id).cloned())
    }

    async fn list_subscribers(&self) -> BillingResult<Vec<SubscriberRecord>> {
        Ok(self.subscribers.lock().await.values().cloned().collect())
    }

    async fn save_customer_id(&self, user: &BillingUser, customer_id: &str) -> BillingResult<()> {
        let mut subscribers = self.subscribers.lock().await;
        let record = subscribers
            .entry(user.user_id)
            .or_insert_with(|| SubscriberRecord {
                user_id: user.user_id,
                email: user.email.clone(),
                stripe_customer_id: None,
                stripe_subscription_id: None,
                subscribed: false,
            });
        record.email = user.email.clone();
        record.stripe_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn subscription_id_for_customer(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<String>> {
        Ok(self
            .subscribers
            .lock()
            .await
            .values()
            .find(|r| r.stripe_customer_id.as_deref() == Some(customer_id))
            .and_then(|r| r.stripe_subscription_id.clone()))
    }

    async fn save_subscription_id(
        &self,
        customer_id: &str,
        subscription_id: Option<&str>,
        subscribed: bool,
    ) -> BillingResult<()> {
        let mut subscribers = self.subscribers.lock().await;
        for record in subscribers
            .values_mut()
            .filter(|r| r.stripe_customer_id.as_deref() == Some(customer_id))
        {
            record.stripe_subscription_id = subscription_id.map(str::to_string);
            record.subscribed = subscribed;
        }
        Ok(())
    }

    async fn agent_status(
        &self,
        user_id: Uuid,
        workflow_id: &str,
    ) -> BillingResult<Option<AgentStatus>> {
        Ok(self
            .agent(user_id, workflow_id)
            .await
            .map(|(_, status)| status))
    }

    async fn set_agent_status(
        &self,
        user_id: Uuid,
        workflow_id: &str,
        name: &str,
        status: AgentStatus,
    ) -> BillingResult<()> {
        let mut agents = self.agents.lock().await;
        let entry = agents
            .entry((user_id, workflow_id.to_string()))
            .or_insert_with(|| (name.to_string(), status));
        entry.1 = status;
        Ok(())
    }

    async fn delete_agent(&self, user_id: Uuid, workflow_id: &str) -> BillingResult<()> {
        self.agents
            .lock()
            .await
            .remove(&(user_id, workflow_id.to_string()));
        Ok(())
    }
}
