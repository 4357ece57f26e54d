//! Router tests over the in-memory billing gateway

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use workflow_billing::testing::{InMemoryBillingStore, InMemoryGateway};
use workflow_billing::{BillingService, BillingSettings, BillingStore, BillingUser};
use workflow_billing_shared::AppRole;

use super::create_router;
use crate::auth::jwt::test_tokens::{claims_for, sign, token_for, TEST_SECRET};
use crate::auth::JwtVerifier;
use crate::directory::{Profile, UserDirectory};
use crate::error::ApiResult;
use crate::state::AppState;

struct FakeDirectory {
    superadmins: Vec<Uuid>,
    profiles: Vec<Profile>,
    store: Arc<InMemoryBillingStore>,
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn has_role(&self, user_id: Uuid, role: AppRole) -> ApiResult<bool> {
        Ok(role == AppRole::Superadmin && self.superadmins.contains(&user_id))
    }

    async fn list_profiles(&self) -> ApiResult<Vec<Profile>> {
        Ok(self.profiles.clone())
    }

    async fn active_agent_counts(&self) -> ApiResult<HashMap<Uuid, i64>> {
        Ok(self.store.active_agent_counts().await)
    }
}

struct TestApp {
    router: Router,
    gateway: Arc<InMemoryGateway>,
    store: Arc<InMemoryBillingStore>,
    user: Profile,
    admin: Profile,
}

fn profile(email: &str, name: &str) -> Profile {
    Profile {
        user_id: Uuid::new_v4(),
        email: email.to_string(),
        full_name: Some(name.to_string()),
    }
}

fn app() -> TestApp {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = Arc::new(InMemoryBillingStore::new());
    let billing = BillingService::new(gateway.clone(), store.clone(), BillingSettings::default());

    let user = profile("user@example.com", "Ana User");
    let admin = profile("admin@example.com", "Admin");
    let directory = FakeDirectory {
        superadmins: vec![admin.user_id],
        profiles: vec![user.clone(), admin.clone()],
        store: store.clone(),
    };

    let state = AppState::from_parts(
        Arc::new(billing),
        Arc::new(directory),
        JwtVerifier::new(TEST_SECRET),
    );

    TestApp {
        router: create_router(state),
        gateway,
        store,
        user,
        admin,
    }
}

impl TestApp {
    fn user_token(&self) -> String {
        token_for(self.user.user_id, &self.user.email)
    }

    fn admin_token(&self) -> String {
        token_for(self.admin.user_id, &self.admin.email)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, token, None).await
    }

    async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Customer with a stored id, like one created by an earlier request
    async fn stored_customer(&self) -> String {
        let customer_id = self.gateway.seed_customer(&self.user.email).await;
        self.store
            .save_customer_id(
                &BillingUser::new(self.user.user_id, &self.user.email),
                &customer_id,
            )
            .await
            .unwrap();
        customer_id
    }
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let app = app();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = app();
    let (status, body) = app.get("/api/v1/billing/summary", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");
}

#[tokio::test]
async fn test_non_bearer_header_is_unauthorized() {
    let app = app();
    let request = Request::builder()
        .uri("/api/v1/billing/summary")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_without_email_is_unauthorized() {
    let app = app();
    let token = sign(&claims_for(app.user.user_id, None), TEST_SECRET);

    let (status, body) = app.get("/api/v1/billing/summary", Some(&token)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "User not authenticated or email not available");
}

#[tokio::test]
async fn test_ensure_prices_returns_map() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/v1/billing/ensure-prices",
            &app.user_token(),
            json!({ "workflows": [
                { "id": "wf1", "name": "Invoices", "amount_cents": 1500 },
                { "id": "wf2", "name": "Payroll", "amount_cents": 2500 }
            ]}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let price_ids = body["priceIds"].as_object().unwrap();
    assert_eq!(price_ids.len(), 2);
    assert!(price_ids["wf1"].as_str().unwrap().starts_with("price_"));
}

#[tokio::test]
async fn test_ensure_prices_requires_workflows() {
    let app = app();
    let (status, body) = app
        .post("/api/v1/billing/ensure-prices", &app.user_token(), json!({}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "'workflows' array is required");
}

#[tokio::test]
async fn test_ensure_prices_rejects_bad_amount() {
    let app = app();
    let (status, _) = app
        .post(
            "/api/v1/billing/ensure-prices",
            &app.user_token(),
            json!({ "workflows": [{ "id": "wf1", "name": "Invoices", "amount_cents": 0 }] }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.gateway.products().await.is_empty());
}

#[tokio::test]
async fn test_payment_methods_empty_without_customer() {
    let app = app();
    let (status, body) = app
        .get("/api/v1/billing/payment-methods", Some(&app.user_token()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "paymentMethods": [], "defaultPaymentMethodId": null })
    );
    assert!(app.gateway.customers().await.is_empty());
}

#[tokio::test]
async fn test_payment_methods_promote_default() {
    let app = app();
    let customer_id = app.stored_customer().await;
    let card = app
        .gateway
        .seed_card(Some(&customer_id), "visa", "4242")
        .await;

    let (status, body) = app
        .get("/api/v1/billing/payment-methods", Some(&app.user_token()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["defaultPaymentMethodId"], card.as_str());
    assert_eq!(body["paymentMethods"][0]["is_default"], true);
}

#[tokio::test]
async fn test_set_default_for_foreign_card_is_forbidden() {
    let app = app();
    app.stored_customer().await;
    let other = app.gateway.seed_customer("other@example.com").await;
    let foreign = app.gateway.seed_card(Some(&other), "visa", "1111").await;

    let (status, _) = app
        .post(
            "/api/v1/billing/payment-methods/default",
            &app.user_token(),
            json!({ "payment_method_id": foreign }),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_without_customer_is_not_found() {
    let app = app();
    let (status, _) = app
        .post(
            "/api/v1/billing/payment-methods/delete",
            &app.user_token(),
            json!({ "payment_method_id": "pm_1" }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_default_promotes_remaining_card() {
    let app = app();
    let customer_id = app.stored_customer().await;
    let first = app.gateway.seed_card(Some(&customer_id), "visa", "4242").await;
    let second = app.gateway.seed_card(Some(&customer_id), "mastercard", "5555").await;
    app.gateway.seed_default(&customer_id, Some(&first)).await;

    let (status, body) = app
        .post(
            "/api/v1/billing/payment-methods/delete",
            &app.user_token(),
            json!({ "payment_method_id": first }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["new_default_payment_method"], second.as_str());
}

#[tokio::test]
async fn test_workflow_subscription_validates_input() {
    let app = app();
    let token = app.user_token();

    let (status, body) = app
        .post(
            "/api/v1/billing/workflow-subscription",
            &token,
            json!({ "action": "activate" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "action and price_id are required");

    let (status, body) = app
        .post(
            "/api/v1/billing/workflow-subscription",
            &token,
            json!({ "action": "pause", "price_id": "price_a" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid action. Use 'activate' or 'deactivate'.");
}

#[tokio::test]
async fn test_workflow_subscription_activate_and_deactivate() {
    let app = app();
    app.gateway.seed_price("price_a", 1500, "eur").await;
    app.gateway.seed_price("price_b", 1500, "eur").await;
    let token = app.user_token();

    for price_id in ["price_a", "price_b"] {
        let (status, _) = app
            .post(
                "/api/v1/billing/workflow-subscription",
                &token,
                json!({ "action": "activate", "price_id": price_id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .post(
            "/api/v1/billing/workflow-subscription",
            &token,
            json!({ "action": "deactivate", "price_id": "price_a" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["subscriptionId"].is_string());
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["price"], "price_b");
    assert_eq!(items[0]["quantity"], 1);
}

#[tokio::test]
async fn test_stripe_failure_message_passed_through() {
    let app = app();
    app.gateway.seed_price("price_a", 1500, "eur").await;
    app.gateway.fail_on("create_subscription").await;

    let (status, body) = app
        .post(
            "/api/v1/billing/workflow-subscription",
            &app.user_token(),
            json!({ "action": "activate", "price_id": "price_a" }),
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("create_subscription"));
}

#[tokio::test]
async fn test_summary_empty_without_customer() {
    let app = app();
    let (status, body) = app
        .get("/api/v1/billing/summary", Some(&app.user_token()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["subscription"].is_null());
    assert_eq!(body["invoices"], json!([]));
}

#[tokio::test]
async fn test_toggle_workflow_activates_agent() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/v1/workflows/toggle",
            &app.user_token(),
            json!({
                "workflow_id": "wf1",
                "name": "Invoices",
                "amount_cents": 1500,
                "action": "activate"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agentStatus"], "active");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["items"][0]["price"].as_str(),
        body["priceId"].as_str()
    );
}

#[tokio::test]
async fn test_admin_route_requires_superadmin() {
    let app = app();
    let (status, body) = app
        .post("/api/v1/admin/active-users", &app.user_token(), json!({}))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");
}

#[tokio::test]
async fn test_active_users_without_prices() {
    let app = app();
    app.post(
        "/api/v1/workflows/toggle",
        &app.user_token(),
        json!({
            "workflow_id": "wf1",
            "name": "Invoices",
            "amount_cents": 1500,
            "action": "activate"
        }),
    )
    .await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/admin/active-users")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.admin_token()))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    let user = users
        .iter()
        .find(|u| u["email"] == "user@example.com")
        .unwrap();
    assert_eq!(user["workflows_active"], 1);
    assert_eq!(user["price_monthly_cents"], 0);
    assert!(user["currency"].is_null());
}

#[tokio::test]
async fn test_active_users_with_prices() {
    let app = app();
    let customer_id = app.stored_customer().await;
    app.gateway.seed_price("price_a", 1500, "eur").await;
    let subscription_id = app
        .gateway
        .seed_subscription(&customer_id, "active", &["price_a"])
        .await;
    app.store
        .save_subscription_id(&customer_id, Some(&subscription_id), true)
        .await
        .unwrap();

    let (status, body) = app
        .post(
            "/api/v1/admin/active-users",
            &app.admin_token(),
            json!({ "includePrices": true }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let user = body["users"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["email"] == "user@example.com")
        .unwrap()
        .clone();
    assert_eq!(user["price_monthly_cents"], 1500);
    assert_eq!(user["currency"], "eur");
    assert_eq!(user["workflows_active"], 0);
}

#[tokio::test]
async fn test_active_users_price_failure_is_isolated() {
    let app = app();
    let customer_id = app.stored_customer().await;
    app.store
        .save_subscription_id(&customer_id, None, true)
        .await
        .unwrap();
    app.gateway.fail_on("list_subscriptions").await;

    let (status, body) = app
        .post(
            "/api/v1/admin/active-users",
            &app.admin_token(),
            json!({ "includePrices": true }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    for user in body["users"].as_array().unwrap() {
        assert_eq!(user["price_monthly_cents"], 0);
    }
}
