//! Optimistic local agent updates
//!
//! The dashboard flips an agent's status before Stripe confirms the change.
//! [`apply_optimistic`] writes the new status and hands back a
//! [`PendingTransition`] that either commits (keeps it) or reverts to what was
//! there before.

use std::sync::Arc;
use uuid::Uuid;
use workflow_billing_shared::AgentStatus;

use crate::error::BillingResult;
use crate::store::BillingStore;

/// Desired status for one user's workflow agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTransition {
    pub user_id: Uuid,
    pub workflow_id: String,
    pub name: String,
    pub target: AgentStatus,
}

/// A status change that has been written but not yet confirmed
#[must_use = "a pending transition must be committed or reverted"]
pub struct PendingTransition {
    store: Arc<dyn BillingStore>,
    transition: AgentTransition,
    previous: Option<AgentStatus>,
}

impl std::fmt::Debug for PendingTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransition")
            .field("transition", &self.transition)
            .field("previous", &self.previous)
            .finish()
    }
}

impl PendingTransition {
    /// Status before the transition; `None` if the agent did not exist
    pub fn previous(&self) -> Option<AgentStatus> {
        self.previous
    }

    pub fn target(&self) -> AgentStatus {
        self.transition.target
    }

    /// Keep the new status
    pub fn commit(self) -> AgentStatus {
        self.transition.target
    }

    /// Restore the previous status, deleting an agent this transition created
    pub async fn revert(self) -> BillingResult<()> {
        let AgentTransition {
            user_id,
            workflow_id,
            name,
            target,
        } = self.transition;

        match self.previous {
            Some(previous) => {
                self.store
                    .set_agent_status(user_id, &workflow_id, &name, previous)
                    .await?
            }
            None => self.store.delete_agent(user_id, &workflow_id).await?,
        }

        tracing::info!(
            user_id = %user_id,
            workflow_id = %workflow_id,
            reverted_from = %target,
            restored = ?self.previous,
            "Reverted optimistic agent status"
        );
        Ok(())
    }
}

/// Write `transition.target` now, remembering the status it replaces
pub async fn apply_optimistic(
    store: Arc<dyn BillingStore>,
    transition: AgentTransition,
) -> BillingResult<PendingTransition> {
    let previous = store
        .agent_status(transition.user_id, &transition.workflow_id)
        .await?;

    store
        .set_agent_status(
            transition.user_id,
            &transition.workflow_id,
            &transition.name,
            transition.target,
        )
        .await?;

    Ok(PendingTransition {
        store,
        transition,
        previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryBillingStore;

    fn transition(user_id: Uuid, target: AgentStatus) -> AgentTransition {
        AgentTransition {
            user_id,
            workflow_id: "wf1".to_string(),
            name: "Invoices".to_string(),
            target,
        }
    }

    #[tokio::test]
    async fn test_commit_keeps_new_status() {
        let store = Arc::new(InMemoryBillingStore::new());
        let user_id = Uuid::new_v4();

        let pending = apply_optimistic(store.clone(), transition(user_id, AgentStatus::Active))
            .await
            .unwrap();
        assert_eq!(pending.previous(), None);
        assert_eq!(pending.commit(), AgentStatus::Active);

        assert_eq!(
            store.agent_status(user_id, "wf1").await.unwrap(),
            Some(AgentStatus::Active)
        );
    }

    #[tokio::test]
    async fn test_revert_restores_previous_status() {
        let store = Arc::new(InMemoryBillingStore::new());
        let user_id = Uuid::new_v4();
        store
            .set_agent_status(user_id, "wf1", "Invoices", AgentStatus::Paused)
            .await
            .unwrap();

        let pending = apply_optimistic(store.clone(), transition(user_id, AgentStatus::Active))
            .await
            .unwrap();
        assert_eq!(
            store.agent_status(user_id, "wf1").await.unwrap(),
            Some(AgentStatus::Active)
        );
        pending.revert().await.unwrap();

        assert_eq!(
            store.agent_status(user_id, "wf1").await.unwrap(),
            Some(AgentStatus::Paused)
        );
    }

    #[tokio::test]
    async fn test_revert_removes_created_agent() {
        let store = Arc::new(InMemoryBillingStore::new());
        let user_id = Uuid::new_v4();

        let pending = apply_optimistic(store.clone(), transition(user_id, AgentStatus::Active))
            .await
            .unwrap();
        pending.revert().await.unwrap();

        assert_eq!(store.agent(user_id, "wf1").await, None);
    }
}
