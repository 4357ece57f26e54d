//! Workflow toggle route

use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use serde::Serialize;
use workflow_billing::WorkflowToggleRequest;
use workflow_billing_shared::AgentStatus;

use super::billing::ItemView;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowToggleResponse {
    pub success: bool,
    pub price_id: String,
    pub subscription_id: Option<String>,
    pub items: Vec<ItemView>,
    pub agent_status: AgentStatus,
}

/// POST /api/v1/workflows/toggle
pub async fn toggle_workflow(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<WorkflowToggleRequest>, JsonRejection>,
) -> ApiResult<Json<WorkflowToggleResponse>> {
    let Json(request) = payload?;
    let billing_user = user.billing_user()?;

    let result = state.billing.workflows.toggle(&billing_user, request).await?;

    Ok(Json(WorkflowToggleResponse {
        success: true,
        price_id: result.price_id,
        subscription_id: result.subscription_id,
        items: result.items.into_iter().map(ItemView::from).collect(),
        agent_status: result.agent_status,
    }))
}
