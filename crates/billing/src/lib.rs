// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Workflow Billing Module
//!
//! Bills each activated workflow as its own line item on a single monthly
//! Stripe subscription per customer.
//!
//! ## Features
//!
//! - **Catalog**: Idempotent per-workflow monthly prices keyed by lookup key
//! - **Customers**: One Stripe customer per user, resolved by stored id or email
//! - **Subscriptions**: Add/remove workflow items without proration
//! - **Payment Methods**: Keep exactly one default card, ownership-checked changes
//! - **Summary**: Current subscription, totals and recent invoices
//! - **Workflow Toggle**: Optimistic agent status with rollback on failure
//! - **Invariants**: Read-only consistency checks per customer

pub mod catalog;
pub mod client;
pub mod customer;
pub mod error;
pub mod gateway;
pub mod invariants;
pub mod optimistic;
pub mod payment_methods;
pub mod store;
pub mod subscriptions;
pub mod summary;
pub mod workflows;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Catalog
pub use catalog::{lookup_key, CatalogService, WorkflowPriceRequest};

// Client
pub use client::{StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{
    BillingCustomer, BillingGateway, CatalogPrice, Invoice, NewPrice, PaymentMethod,
    PriceInterval, ProrationBehavior, Subscription, SubscriptionFilter, SubscriptionItem,
    SubscriptionItemChange,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Optimistic updates
pub use optimistic::{apply_optimistic, AgentTransition, PendingTransition};

// Payment methods
pub use payment_methods::{PaymentMethodList, PaymentMethodService, PaymentMethodSummary};

// Store
pub use store::{BillingStore, BillingUser, PgBillingStore, SubscriberRecord};

// Subscriptions
pub use subscriptions::{ReconcilePolicy, SubscriptionService, SubscriptionState};

// Summary
pub use summary::{
    BillingSummary, CurrentPrice, CustomerSummary, InvoiceSummary, SubscriptionSummary,
    SummaryService, DEFAULT_INVOICE_LIMIT,
};

// Workflows
pub use workflows::{WorkflowToggleRequest, WorkflowToggleResult, WorkflowToggleService};

use sqlx::PgPool;
use std::sync::Arc;

/// Tunables shared by the billing services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSettings {
    /// Lowercase ISO currency for new prices
    pub currency: String,
    /// Invoices returned with a billing summary
    pub invoice_limit: u64,
    pub reconcile: ReconcilePolicy,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            currency: "eur".to_string(),
            invoice_limit: DEFAULT_INVOICE_LIMIT,
            reconcile: ReconcilePolicy::default(),
        }
    }
}

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: Arc<CatalogService>,
    pub customer: Arc<CustomerService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub payment_methods: PaymentMethodService,
    pub summary: SummaryService,
    pub workflows: WorkflowToggleService,
    pub invariants: InvariantChecker,
    store: Arc<dyn BillingStore>,
}

impl BillingService {
    /// Production wiring: Stripe plus the Postgres store
    pub fn with_stripe(config: StripeConfig, pool: PgPool, settings: BillingSettings) -> Self {
        Self::new(
            Arc::new(StripeClient::new(config)),
            Arc::new(PgBillingStore::new(pool)),
            settings,
        )
    }

    /// Wire the services over an explicit gateway and store
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn BillingStore>,
        settings: BillingSettings,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new(gateway.clone(), settings.currency));
        let customer = Arc::new(CustomerService::new(gateway.clone(), store.clone()));
        let subscriptions = Arc::new(SubscriptionService::new(
            gateway.clone(),
            store.clone(),
            settings.reconcile,
        ));

        Self {
            workflows: WorkflowToggleService::new(
                catalog.clone(),
                customer.clone(),
                subscriptions.clone(),
                store.clone(),
            ),
            payment_methods: PaymentMethodService::new(gateway.clone()),
            summary: SummaryService::new(gateway.clone(), store.clone(), settings.invoice_limit),
            invariants: InvariantChecker::new(gateway),
            catalog,
            customer,
            subscriptions,
            store,
        }
    }

    /// Local bookkeeping store
    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }
}
