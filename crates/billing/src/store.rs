//! Local billing bookkeeping
//!
//! Stripe stays the source of truth for what a customer is billed. This store
//! only remembers the ids needed to find things again (customer, tracked
//! subscription) and the per-workflow agent projection shown in the dashboard.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use workflow_billing_shared::AgentStatus;

use crate::error::{BillingError, BillingResult};

/// Application user as seen by the billing services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingUser {
    pub user_id: Uuid,
    pub email: String,
}

impl BillingUser {
    pub fn new(user_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }
}

/// Subscriber row: which Stripe objects belong to a user
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SubscriberRecord {
    pub user_id: Uuid,
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscribed: bool,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn subscriber(&self, user_id: Uuid) -> BillingResult<Option<SubscriberRecord>>;

    async fn list_subscribers(&self) -> BillingResult<Vec<SubscriberRecord>>;

    /// Remember the Stripe customer created or found for a user
    async fn save_customer_id(&self, user: &BillingUser, customer_id: &str) -> BillingResult<()>;

    async fn subscription_id_for_customer(&self, customer_id: &str)
        -> BillingResult<Option<String>>;

    /// Track (or forget, with `None`) the subscription used for a customer
    async fn save_subscription_id(
        &self,
        customer_id: &str,
        subscription_id: Option<&str>,
        subscribed: bool,
    ) -> BillingResult<()>;

    async fn agent_status(&self, user_id: Uuid, workflow_id: &str)
        -> BillingResult<Option<AgentStatus>>;

    /// Upsert the agent record for a workflow
    async fn set_agent_status(
        &self,
        user_id: Uuid,
        workflow_id: &str,
        name: &str,
        status: AgentStatus,
    ) -> BillingResult<()>;

    /// Remove the agent record entirely (used when reverting a first activation)
    async fn delete_agent(&self, user_id: Uuid, workflow_id: &str) -> BillingResult<()>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn subscriber(&self, user_id: Uuid) -> BillingResult<Option<SubscriberRecord>> {
        let row: Option<SubscriberRecord> = sqlx::query_as(
            r#"
            SELECT user_id, email, stripe_customer_id, stripe_subscription_id, subscribed
            FROM subscribers
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_subscribers(&self) -> BillingResult<Vec<SubscriberRecord>> {
        let rows: Vec<SubscriberRecord> = sqlx::query_as(
            r#"
            SELECT user_id, email, stripe_customer_id, stripe_subscription_id, subscribed
            FROM subscribers
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn save_customer_id(&self, user: &BillingUser, customer_id: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (user_id, email, stripe_customer_id, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET email = EXCLUDED.email,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                updated_at = NOW()
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn subscription_id_for_customer(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT stripe_subscription_id FROM subscribers WHERE stripe_customer_id = $1 LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(id,)| id))
    }

    async fn save_subscription_id(
        &self,
        customer_id: &str,
        subscription_id: Option<&str>,
        subscribed: bool,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscribers
            SET stripe_subscription_id = $2, subscribed = $3, updated_at = NOW()
            WHERE stripe_customer_id = $1
            "#,
        )
        .bind(customer_id)
        .bind(subscription_id)
        .bind(subscribed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn agent_status(
        &self,
        user_id: Uuid,
        workflow_id: &str,
    ) -> BillingResult<Option<AgentStatus>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM ai_agents WHERE user_id = $1 AND workflow_id = $2")
                .bind(user_id)
                .bind(workflow_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(status,)| {
            status
                .parse::<AgentStatus>()
                .map_err(|e| BillingError::Database(e.to_string()))
        })
        .transpose()
    }

    async fn set_agent_status(
        &self,
        user_id: Uuid,
        workflow_id: &str,
        name: &str,
        status: AgentStatus,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_agents (user_id, workflow_id, name, status, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, workflow_id) DO UPDATE
            SET status = EXCLUDED.status, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(workflow_id)
        .bind(name)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_agent(&self, user_id: Uuid, workflow_id: &str) -> BillingResult<()> {
        sqlx::query("DELETE FROM ai_agents WHERE user_id = $1 AND workflow_id = $2")
            .bind(user_id)
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
