//! Admin routes

use axum::{body::Bytes, extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use workflow_billing::{CurrentPrice, SubscriberRecord};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersRequest {
    #[serde(default)]
    pub include_prices: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveUser {
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub email: String,
    pub workflows_active: i64,
    pub price_monthly_cents: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActiveUsersResponse {
    pub users: Vec<ActiveUser>,
}

/// POST /api/v1/admin/active-users
///
/// The body is optional; an empty one means prices are not fetched.
pub async fn list_active_users(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    body: Bytes,
) -> ApiResult<Json<ActiveUsersResponse>> {
    let request: ActiveUsersRequest = if body.is_empty() {
        ActiveUsersRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("Invalid request body: {e}")))?
    };

    let profiles = state.directory.list_profiles().await?;
    let active_counts = state.directory.active_agent_counts().await?;
    let subscribers: HashMap<Uuid, SubscriberRecord> = state
        .billing
        .store()
        .list_subscribers()
        .await?
        .into_iter()
        .map(|s| (s.user_id, s))
        .collect();

    let mut users = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let price = match subscribers.get(&profile.user_id) {
            Some(record) if request.include_prices => price_for(&state, record).await,
            _ => None,
        };

        users.push(ActiveUser {
            user_id: profile.user_id,
            full_name: profile.full_name,
            email: profile.email,
            workflows_active: active_counts.get(&profile.user_id).copied().unwrap_or(0),
            price_monthly_cents: price.as_ref().map_or(0, |p| p.unit_amount),
            currency: price.and_then(|p| p.currency),
        });
    }

    tracing::info!(
        admin_id = %admin.user_id,
        users = users.len(),
        include_prices = request.include_prices,
        "Listed active users"
    );

    Ok(Json(ActiveUsersResponse { users }))
}

/// Current unit price for a subscriber; failures only affect this user's row
async fn price_for(state: &AppState, record: &SubscriberRecord) -> Option<CurrentPrice> {
    if !record.subscribed {
        return None;
    }
    let customer_id = record.stripe_customer_id.as_deref()?;

    match state.billing.summary.current_price(customer_id).await {
        Ok(price) => price,
        Err(e) => {
            tracing::warn!(
                user_id = %record.user_id,
                customer_id = %customer_id,
                error = %e,
                "Failed to fetch current price"
            );
            None
        }
    }
}
