//! Billing routes

use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use workflow_billing::{
    BillingError, BillingSummary, PaymentMethodSummary, SubscriptionItem, WorkflowPriceRequest,
};
use workflow_billing_shared::WorkflowAction;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EnsurePricesRequest {
    pub workflows: Option<Vec<WorkflowPriceRequest>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsurePricesResponse {
    pub price_ids: BTreeMap<String, String>,
}

/// POST /api/v1/billing/ensure-prices
pub async fn ensure_prices(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<EnsurePricesRequest>, JsonRejection>,
) -> ApiResult<Json<EnsurePricesResponse>> {
    let Json(request) = payload?;
    let workflows = request
        .workflows
        .ok_or_else(|| ApiError::Validation("'workflows' array is required".to_string()))?;

    let price_ids = state.billing.catalog.ensure_prices(&workflows).await?;
    tracing::info!(user_id = %user.user_id, count = price_ids.len(), "Ensured workflow prices");

    Ok(Json(EnsurePricesResponse { price_ids }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodsResponse {
    pub payment_methods: Vec<PaymentMethodSummary>,
    pub default_payment_method_id: Option<String>,
}

/// GET /api/v1/billing/payment-methods
pub async fn list_payment_methods(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<PaymentMethodsResponse>> {
    let billing_user = user.billing_user()?;

    let Some(customer_id) = state.billing.customer.find_customer(&billing_user).await? else {
        return Ok(Json(PaymentMethodsResponse {
            payment_methods: Vec::new(),
            default_payment_method_id: None,
        }));
    };

    let list = state
        .billing
        .payment_methods
        .list_and_enforce_default(&customer_id)
        .await?;

    Ok(Json(PaymentMethodsResponse {
        payment_methods: list.payment_methods,
        default_payment_method_id: list.default_payment_method_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodRequest {
    pub payment_method_id: Option<String>,
}

impl PaymentMethodRequest {
    fn payment_method_id(self) -> ApiResult<String> {
        self.payment_method_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::Validation("payment_method_id is required".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// POST /api/v1/billing/payment-methods/default
pub async fn set_default_payment_method(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<PaymentMethodRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(request) = payload?;
    let payment_method_id = request.payment_method_id()?;
    let customer_id = existing_customer(&state, &user).await?;

    state
        .billing
        .payment_methods
        .set_default(&customer_id, &payment_method_id)
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
pub struct DeletePaymentMethodResponse {
    pub success: bool,
    pub new_default_payment_method: Option<String>,
}

/// POST /api/v1/billing/payment-methods/delete
pub async fn delete_payment_method(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<PaymentMethodRequest>, JsonRejection>,
) -> ApiResult<Json<DeletePaymentMethodResponse>> {
    let Json(request) = payload?;
    let payment_method_id = request.payment_method_id()?;
    let customer_id = existing_customer(&state, &user).await?;

    let new_default = state
        .billing
        .payment_methods
        .remove_method(&customer_id, &payment_method_id)
        .await?;

    Ok(Json(DeletePaymentMethodResponse {
        success: true,
        new_default_payment_method: new_default,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WorkflowSubscriptionRequest {
    pub action: Option<String>,
    pub price_id: Option<String>,
}

/// Subscription line item as returned to the client
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ItemView {
    pub id: String,
    pub price: String,
    pub quantity: u64,
}

impl From<SubscriptionItem> for ItemView {
    fn from(item: SubscriptionItem) -> Self {
        Self {
            id: item.id,
            price: item.price_id,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSubscriptionResponse {
    pub success: bool,
    pub subscription_id: Option<String>,
    pub items: Vec<ItemView>,
}

/// POST /api/v1/billing/workflow-subscription
pub async fn manage_workflow_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<WorkflowSubscriptionRequest>, JsonRejection>,
) -> ApiResult<Json<WorkflowSubscriptionResponse>> {
    let Json(request) = payload?;
    let (Some(action), Some(price_id)) = (
        request.action.filter(|a| !a.is_empty()),
        request.price_id.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::Validation("action and price_id are required".to_string()));
    };
    let action: WorkflowAction = action.parse().map_err(|_| {
        ApiError::Validation("Invalid action. Use 'activate' or 'deactivate'.".to_string())
    })?;

    let billing_user = user.billing_user()?;
    let customer_id = state.billing.customer.resolve_customer(&billing_user).await?;
    let subscription = state
        .billing
        .subscriptions
        .reconcile(&customer_id, &price_id, action)
        .await?;

    Ok(Json(WorkflowSubscriptionResponse {
        success: true,
        subscription_id: subscription.subscription_id,
        items: subscription.items.into_iter().map(ItemView::from).collect(),
    }))
}

/// GET /api/v1/billing/summary
pub async fn get_summary(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<BillingSummary>> {
    let billing_user = user.billing_user()?;

    let summary = match state.billing.customer.find_customer(&billing_user).await? {
        Some(customer_id) => state.billing.summary.summarize(&customer_id).await?,
        None => BillingSummary::empty(),
    };

    Ok(Json(summary))
}

/// Customer for endpoints that act on existing billing data only
async fn existing_customer(state: &AppState, user: &AuthUser) -> ApiResult<String> {
    let billing_user = user.billing_user()?;
    state
        .billing
        .customer
        .find_customer(&billing_user)
        .await?
        .ok_or_else(|| BillingError::NoCustomer.into())
}
