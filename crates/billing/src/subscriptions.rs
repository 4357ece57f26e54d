//! Subscription reconciliation
//!
//! A customer has at most one active subscription carrying one item per
//! activated workflow price. Activating or deactivating a workflow adds or
//! removes that item. Mid-cycle changes are never prorated.

use serde::Serialize;
use std::sync::Arc;
use workflow_billing_shared::WorkflowAction;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingGateway, ProrationBehavior, Subscription, SubscriptionFilter, SubscriptionItem,
    SubscriptionItemChange,
};
use crate::store::BillingStore;

/// Proration used for every item change
const ITEM_CHANGE_PRORATION: ProrationBehavior = ProrationBehavior::None;

/// Knobs for reconciliation edge cases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Cancel the subscription when its last item is removed instead of
    /// leaving it active with no items
    pub cancel_when_empty: bool,
}

/// Subscription as seen after a reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionState {
    /// `None` when the customer has no active subscription
    pub subscription_id: Option<String>,
    pub items: Vec<SubscriptionItem>,
}

impl SubscriptionState {
    fn none() -> Self {
        Self {
            subscription_id: None,
            items: Vec::new(),
        }
    }

    fn from_subscription(subscription: Subscription) -> Self {
        Self {
            subscription_id: Some(subscription.id),
            items: subscription.items,
        }
    }

    pub fn price_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.price_id.as_str()).collect()
    }
}

pub struct SubscriptionService {
    gateway: Arc<dyn BillingGateway>,
    store: Arc<dyn BillingStore>,
    policy: ReconcilePolicy,
}

impl SubscriptionService {
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn BillingStore>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Bring the customer's subscription in line with the requested action
    ///
    /// Activating an already present price and deactivating an absent one are
    /// no-ops, so repeating a call never changes the outcome.
    pub async fn reconcile(
        &self,
        customer_id: &str,
        price_id: &str,
        action: WorkflowAction,
    ) -> BillingResult<SubscriptionState> {
        if customer_id.is_empty() {
            return Err(BillingError::InvalidInput("Customer id is required".to_string()));
        }
        if price_id.is_empty() {
            return Err(BillingError::InvalidInput("price_id is required".to_string()));
        }

        let current = self.active_subscription(customer_id).await?;

        let state = match (action, current) {
            (WorkflowAction::Activate, None) => {
                let subscription = self
                    .gateway
                    .create_subscription(customer_id, price_id, 1)
                    .await?;
                tracing::info!(
                    customer_id = %customer_id,
                    subscription_id = %subscription.id,
                    price_id = %price_id,
                    "Created workflow subscription"
                );
                self.track(customer_id, Some(&subscription.id)).await?;
                SubscriptionState::from_subscription(subscription)
            }
            (WorkflowAction::Activate, Some(subscription)) => {
                if subscription.item_for_price(price_id).is_some() {
                    tracing::debug!(
                        subscription_id = %subscription.id,
                        price_id = %price_id,
                        "Price already on subscription"
                    );
                    SubscriptionState::from_subscription(subscription)
                } else {
                    let updated = self
                        .gateway
                        .update_subscription_items(
                            &subscription.id,
                            vec![SubscriptionItemChange::Add {
                                price_id: price_id.to_string(),
                                quantity: 1,
                            }],
                            ITEM_CHANGE_PRORATION,
                        )
                        .await?;
                    tracing::info!(
                        subscription_id = %updated.id,
                        price_id = %price_id,
                        items = updated.items.len(),
                        "Added workflow item"
                    );
                    SubscriptionState::from_subscription(updated)
                }
            }
            (WorkflowAction::Deactivate, None) => SubscriptionState::none(),
            (WorkflowAction::Deactivate, Some(subscription)) => {
                let Some(item) = subscription.item_for_price(price_id) else {
                    tracing::debug!(
                        subscription_id = %subscription.id,
                        price_id = %price_id,
                        "Price not on subscription"
                    );
                    return Ok(SubscriptionState::from_subscription(subscription));
                };

                if self.policy.cancel_when_empty && subscription.items.len() == 1 {
                    self.gateway.cancel_subscription(&subscription.id).await?;
                    self.track(customer_id, None).await?;
                    tracing::info!(
                        subscription_id = %subscription.id,
                        "Cancelled subscription after removing its last item"
                    );
                    SubscriptionState::none()
                } else {
                    let updated = self
                        .gateway
                        .update_subscription_items(
                            &subscription.id,
                            vec![SubscriptionItemChange::Remove {
                                item_id: item.id.clone(),
                            }],
                            ITEM_CHANGE_PRORATION,
                        )
                        .await?;
                    tracing::info!(
                        subscription_id = %updated.id,
                        price_id = %price_id,
                        items = updated.items.len(),
                        "Removed workflow item"
                    );
                    SubscriptionState::from_subscription(updated)
                }
            }
        };

        Ok(state)
    }

    /// The subscription reconciliation operates on, if any
    ///
    /// Prefers the tracked id while it is still active, otherwise the first
    /// active subscription Stripe lists. Whichever is used becomes tracked.
    pub async fn active_subscription(&self, customer_id: &str) -> BillingResult<Option<Subscription>> {
        let tracked = self.store.subscription_id_for_customer(customer_id).await?;

        if let Some(subscription_id) = tracked.as_deref() {
            match self.gateway.retrieve_subscription(subscription_id).await? {
                Some(subscription) if subscription.is_active() && subscription.customer == customer_id => {
                    return Ok(Some(subscription));
                }
                _ => {
                    tracing::debug!(
                        customer_id = %customer_id,
                        subscription_id = %subscription_id,
                        "Tracked subscription is no longer active"
                    );
                }
            }
        }

        let mut active = self
            .gateway
            .list_subscriptions(customer_id, SubscriptionFilter::Active, 2)
            .await?;

        if active.len() > 1 {
            tracing::warn!(
                customer_id = %customer_id,
                "Customer has more than one active subscription, using the first"
            );
        }

        let first = if active.is_empty() {
            None
        } else {
            Some(active.swap_remove(0))
        };

        let first_id = first.as_ref().map(|s| s.id.as_str());
        if first_id != tracked.as_deref() {
            self.track(customer_id, first_id).await?;
        }

        Ok(first)
    }

    async fn track(&self, customer_id: &str, subscription_id: Option<&str>) -> BillingResult<()> {
        self.store
            .save_subscription_id(customer_id, subscription_id, subscription_id.is_some())
            .await
    }
}
