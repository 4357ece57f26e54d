//! Read access to users, roles and agent counts

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;
use workflow_billing_shared::AppRole;

use crate::error::ApiResult;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Profile {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn has_role(&self, user_id: Uuid, role: AppRole) -> ApiResult<bool>;

    async fn list_profiles(&self) -> ApiResult<Vec<Profile>>;

    /// Number of agents in `active` status per user
    async fn active_agent_counts(&self) -> ApiResult<HashMap<Uuid, i64>>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn has_role(&self, user_id: Uuid, role: AppRole) -> ApiResult<bool> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM user_roles WHERE user_id = $1 AND role = $2")
                .bind(user_id)
                .bind(role.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn list_profiles(&self) -> ApiResult<Vec<Profile>> {
        let rows: Vec<Profile> =
            sqlx::query_as("SELECT user_id, email, full_name FROM profiles ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows)
    }

    async fn active_agent_counts(&self) -> ApiResult<HashMap<Uuid, i64>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*)
            FROM ai_agents
            WHERE status = 'active'
            GROUP BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
