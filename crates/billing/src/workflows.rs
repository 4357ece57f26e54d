//! Workflow activation
//!
//! Turning a workflow on or off touches three places: the price catalog, the
//! customer's subscription, and the local agent record. The agent record is
//! updated optimistically and rolled back if Stripe rejects the change.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use workflow_billing_shared::{AgentStatus, WorkflowAction};

use crate::catalog::CatalogService;
use crate::customer::CustomerService;
use crate::error::BillingResult;
use crate::gateway::SubscriptionItem;
use crate::optimistic::{apply_optimistic, AgentTransition};
use crate::store::{BillingStore, BillingUser};
use crate::subscriptions::SubscriptionService;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowToggleRequest {
    pub workflow_id: String,
    pub name: String,
    pub amount_cents: i64,
    pub action: WorkflowAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowToggleResult {
    pub price_id: String,
    pub subscription_id: Option<String>,
    pub items: Vec<SubscriptionItem>,
    pub agent_status: AgentStatus,
}

pub struct WorkflowToggleService {
    catalog: Arc<CatalogService>,
    customers: Arc<CustomerService>,
    subscriptions: Arc<SubscriptionService>,
    store: Arc<dyn BillingStore>,
}

impl WorkflowToggleService {
    pub fn new(
        catalog: Arc<CatalogService>,
        customers: Arc<CustomerService>,
        subscriptions: Arc<SubscriptionService>,
        store: Arc<dyn BillingStore>,
    ) -> Self {
        Self {
            catalog,
            customers,
            subscriptions,
            store,
        }
    }

    pub async fn toggle(
        &self,
        user: &BillingUser,
        request: WorkflowToggleRequest,
    ) -> BillingResult<WorkflowToggleResult> {
        let price_id = self
            .catalog
            .ensure_price(&request.workflow_id, &request.name, request.amount_cents)
            .await?;
        let customer_id = self.customers.resolve_customer(user).await?;

        let pending = apply_optimistic(
            self.store.clone(),
            AgentTransition {
                user_id: user.user_id,
                workflow_id: request.workflow_id.clone(),
                name: request.name.clone(),
                target: request.action.target_status(),
            },
        )
        .await?;

        match self
            .subscriptions
            .reconcile(&customer_id, &price_id, request.action)
            .await
        {
            Ok(state) => {
                let agent_status = pending.commit();
                tracing::info!(
                    user_id = %user.user_id,
                    workflow_id = %request.workflow_id,
                    action = %request.action,
                    items = state.items.len(),
                    "Workflow toggled"
                );
                Ok(WorkflowToggleResult {
                    price_id,
                    subscription_id: state.subscription_id,
                    items: state.items,
                    agent_status,
                })
            }
            Err(e) => {
                if e.is_client_error() {
                    tracing::info!(
                        user_id = %user.user_id,
                        workflow_id = %request.workflow_id,
                        error = %e,
                        "Subscription update rejected, reverting agent status"
                    );
                } else {
                    tracing::warn!(
                        user_id = %user.user_id,
                        workflow_id = %request.workflow_id,
                        error = %e,
                        "Subscription update failed, reverting agent status"
                    );
                }
                if let Err(revert_err) = pending.revert().await {
                    tracing::error!(
                        user_id = %user.user_id,
                        workflow_id = %request.workflow_id,
                        error = %revert_err,
                        "Failed to revert agent status"
                    );
                }
                Err(e)
            }
        }
    }
}
