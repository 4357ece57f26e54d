//! HTTP routes

pub mod admin;
pub mod billing;
pub mod workflows;

#[cfg(test)]
mod route_tests;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::auth::{require_auth, require_superadmin};
use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/api/v1/billing/ensure-prices", post(billing::ensure_prices))
        .route(
            "/api/v1/billing/payment-methods",
            get(billing::list_payment_methods),
        )
        .route(
            "/api/v1/billing/payment-methods/default",
            post(billing::set_default_payment_method),
        )
        .route(
            "/api/v1/billing/payment-methods/delete",
            post(billing::delete_payment_method),
        )
        .route(
            "/api/v1/billing/workflow-subscription",
            post(billing::manage_workflow_subscription),
        )
        .route("/api/v1/billing/summary", get(billing::get_summary))
        .route("/api/v1/workflows/toggle", post(workflows::toggle_workflow))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    // Layers run outermost-last: authentication before the role check
    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/active-users",
            post(admin::list_active_users),
        )
        .route_layer(from_fn_with_state(state.clone(), require_superadmin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
