//! # Task Detail Factory
//!
//! Creates one task management detail per mutated item, before any cloud
//! call is planned, and stamps flow/action bindings onto them once the chain
//! builder and the assembler know where each item ended up.
//!
//! Binding happens on the in-memory copies; the assembler persists the
//! bindings in one batch once the flow id is known.

use crate::constants::{DetailState, TaskType};
use crate::error::Result;
use crate::models::{ActionId, DetailPatch, NewTaskManagementDetail, TaskManagementDetail};
use crate::orchestration::context::BuildContext;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::debug;

/// Fields shared by every detail of one construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailScope {
    pub task_management_id: i64,
    pub business_id: i64,
    pub task_type: TaskType,
}

#[derive(Clone)]
pub struct TaskDetailFactory {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for TaskDetailFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDetailFactory").finish_non_exhaustive()
    }
}

impl TaskDetailFactory {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// One `Pending` detail per parameter, in order. Zero parameters is a
    /// no-op that never touches storage.
    ///
    /// An expired context aborts before the insert. A started insert runs to
    /// completion even past the deadline, so every committed detail is
    /// returned and can be unwound.
    pub async fn create_details(
        &self,
        ctx: &BuildContext,
        scope: &DetailScope,
        params: Vec<serde_json::Value>,
    ) -> Result<Vec<TaskManagementDetail>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let new_details: Vec<NewTaskManagementDetail> = params
            .into_iter()
            .map(|param| NewTaskManagementDetail {
                task_management_id: scope.task_management_id,
                business_id: scope.business_id,
                task_type: scope.task_type,
                param,
            })
            .collect();

        let details = ctx
            .run_to_completion(
                "create_task_details",
                self.storage.create_task_details(new_details),
            )
            .await?;

        debug!(
            task_management_id = scope.task_management_id,
            task_type = %scope.task_type,
            detail_count = details.len(),
            "Created task management details"
        );
        Ok(details)
    }

    /// Stamp the owning action id onto already-created details
    pub fn bind_to_action(details: &mut [TaskManagementDetail], action_id: &ActionId) {
        for detail in details {
            detail.action_id = Some(action_id.clone());
        }
    }

    /// Stamp the owning flow id onto already-created details
    pub fn bind_to_flow(details: &mut [TaskManagementDetail], flow_id: i64) {
        for detail in details {
            detail.flow_id = Some(flow_id);
        }
    }

    /// Persist the flow/action bindings held in memory
    pub async fn persist_bindings(
        &self,
        ctx: &BuildContext,
        details: &[TaskManagementDetail],
    ) -> Result<()> {
        let patches: Vec<DetailPatch> = details.iter().map(|d| d.binding_patch()).collect();
        ctx.run("update_task_details", self.storage.update_task_details(&patches))
            .await
    }

    /// Resolve details that need no cloud call
    pub async fn mark_succeeded(
        &self,
        ctx: &BuildContext,
        details: &mut [TaskManagementDetail],
    ) -> Result<()> {
        let patches: Vec<DetailPatch> = details
            .iter()
            .map(|d| DetailPatch::state(d.id, DetailState::Success, None))
            .collect();
        ctx.run("update_task_details", self.storage.update_task_details(&patches))
            .await?;

        for detail in details {
            detail.state = DetailState::Success;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{InMemoryStorage, StorageOp};

    fn scope() -> DetailScope {
        DetailScope {
            task_management_id: 9,
            business_id: 2001,
            task_type: TaskType::ModifyTargetWeight,
        }
    }

    #[tokio::test]
    async fn test_one_pending_detail_per_item() {
        let storage = Arc::new(InMemoryStorage::new());
        let factory = TaskDetailFactory::new(storage.clone());

        let params = vec![
            serde_json::json!({"target_id": "t-1"}),
            serde_json::json!({"target_id": "t-2"}),
        ];
        let details = factory
            .create_details(&BuildContext::new(), &scope(), params.clone())
            .await
            .unwrap();

        assert_eq!(details.len(), 2);
        for (detail, param) in details.iter().zip(&params) {
            assert_eq!(detail.state, DetailState::Pending);
            assert_eq!(&detail.param, param);
            assert_eq!(detail.task_management_id, 9);
            assert_eq!(detail.business_id, 2001);
            assert!(detail.flow_id.is_none());
            assert!(detail.action_id.is_none());
        }
        assert_eq!(storage.detail_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_items_is_a_no_op() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.fail_on(StorageOp::CreateTaskDetails, "must not be called");
        let factory = TaskDetailFactory::new(storage.clone());

        let details = factory
            .create_details(&BuildContext::new(), &scope(), Vec::new())
            .await
            .unwrap();
        assert!(details.is_empty());
        assert_eq!(storage.call_count(StorageOp::CreateTaskDetails), 0);
    }

    #[tokio::test]
    async fn test_expired_context_creates_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let factory = TaskDetailFactory::new(storage.clone());
        let ctx = BuildContext::new().with_deadline(tokio::time::Instant::now());

        let err = factory
            .create_details(&ctx, &scope(), vec![serde_json::json!({}); 2])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "aborted");
        assert_eq!(storage.call_count(StorageOp::CreateTaskDetails), 0);
        assert_eq!(storage.detail_count(), 0);
    }

    #[tokio::test]
    async fn test_bindings_are_persisted_together() {
        let storage = Arc::new(InMemoryStorage::new());
        let factory = TaskDetailFactory::new(storage.clone());
        let ctx = BuildContext::new();

        let mut details = factory
            .create_details(&ctx, &scope(), vec![serde_json::json!({}); 3])
            .await
            .unwrap();

        TaskDetailFactory::bind_to_action(&mut details[..2], &ActionId::new("1"));
        TaskDetailFactory::bind_to_action(&mut details[2..], &ActionId::new("2"));
        TaskDetailFactory::bind_to_flow(&mut details, 55);
        factory.persist_bindings(&ctx, &details).await.unwrap();

        let stored = storage.all_details();
        assert!(stored.iter().all(|d| d.flow_id == Some(55)));
        assert_eq!(stored[0].action_id, Some(ActionId::new("1")));
        assert_eq!(stored[2].action_id, Some(ActionId::new("2")));
        assert!(stored.iter().all(|d| d.state == DetailState::Pending));
    }

    #[tokio::test]
    async fn test_mark_succeeded() {
        let storage = Arc::new(InMemoryStorage::new());
        let factory = TaskDetailFactory::new(storage.clone());
        let ctx = BuildContext::new();

        let mut details = factory
            .create_details(&ctx, &scope(), vec![serde_json::json!({}); 2])
            .await
            .unwrap();
        factory.mark_succeeded(&ctx, &mut details).await.unwrap();

        assert!(details.iter().all(|d| d.state == DetailState::Success));
        assert_eq!(storage.details_in_state(DetailState::Success).len(), 2);
    }
}
