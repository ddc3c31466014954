//! # Resource Exclusivity Gate
//!
//! Serializes flows competing for the same cloud resource. A resource is
//! owned by at most one flow at a time, recorded as a resource flow relation.
//!
//! The protocol has two steps:
//! 1. [`ResourceGate::ensure_available`] runs before anything is written and
//!    turns an existing owner into a [`FlowError::ResourceBusy`] clean abort.
//! 2. [`ResourceGate::lock`] runs after the flow is persisted. It is a
//!    conditional insert, so two requests that both passed step 1 cannot both
//!    acquire the lock: the loser gets `ResourceBusy` and its flow is never
//!    activated.
//!
//! ```rust
//! use lbflow_core::constants::{LockKind, ResourceType};
//! use lbflow_core::orchestration::{BuildContext, ResourceGate};
//! use lbflow_core::storage::InMemoryStorage;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let gate = ResourceGate::new(Arc::new(InMemoryStorage::new()));
//! let ctx = BuildContext::new();
//!
//! gate.lock(&ctx, "lb-1", ResourceType::LoadBalancer, 1, LockKind::ListenerDelete)
//!     .await
//!     .unwrap();
//! let err = gate
//!     .ensure_available(&ctx, "lb-1", ResourceType::LoadBalancer)
//!     .await
//!     .unwrap_err();
//! assert_eq!(err.code(), "resource_busy");
//! # });
//! ```

use crate::constants::{LockKind, ResourceType};
use crate::error::{FlowError, Result};
use crate::models::{NewResourceFlowRelation, ResourceFlowRelation};
use crate::orchestration::context::BuildContext;
use crate::storage::{RelationInsert, Storage};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct ResourceGate {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for ResourceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGate").finish_non_exhaustive()
    }
}

impl ResourceGate {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Current owner of the resource, if any
    pub async fn check_exclusive(
        &self,
        ctx: &BuildContext,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<Option<ResourceFlowRelation>> {
        ctx.run(
            "find_resource_relation",
            self.storage.find_resource_relation(resource_id, resource_type),
        )
        .await
    }

    /// Fail with `ResourceBusy` when another flow owns the resource
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn ensure_available(
        &self,
        ctx: &BuildContext,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<()> {
        match self.check_exclusive(ctx, resource_id, resource_type).await? {
            Some(owner) => {
                warn!(
                    resource_id = %resource_id,
                    owner_flow_id = owner.flow_id,
                    lock_kind = %owner.lock_kind,
                    "Resource is owned by another flow"
                );
                Err(busy(owner))
            }
            None => Ok(()),
        }
    }

    /// Record `flow_id` as the owner of the resource
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn lock(
        &self,
        ctx: &BuildContext,
        resource_id: &str,
        resource_type: ResourceType,
        flow_id: i64,
        lock_kind: LockKind,
    ) -> Result<ResourceFlowRelation> {
        let relation = NewResourceFlowRelation {
            resource_id: resource_id.to_string(),
            resource_type,
            flow_id,
            lock_kind,
        };

        match ctx
            .run(
                "create_resource_relation",
                self.storage.try_create_resource_relation(relation),
            )
            .await?
        {
            RelationInsert::Created(relation) => {
                info!(
                    resource_id = %resource_id,
                    flow_id = flow_id,
                    lock_kind = %lock_kind,
                    "Locked resource for flow"
                );
                Ok(relation)
            }
            RelationInsert::Conflict(owner) if owner.flow_id == flow_id => {
                debug!(resource_id = %resource_id, flow_id = flow_id, "Flow already owns resource");
                Ok(owner)
            }
            RelationInsert::Conflict(owner) => {
                warn!(
                    resource_id = %resource_id,
                    flow_id = flow_id,
                    owner_flow_id = owner.flow_id,
                    "Lost lock race for resource"
                );
                Err(busy(owner))
            }
        }
    }

    /// Drop the lock held by `flow_id`; a lock held by another flow is left
    /// untouched and `false` is returned
    pub async fn release(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        flow_id: i64,
    ) -> Result<bool> {
        let released = self
            .storage
            .delete_resource_relation(resource_id, resource_type, flow_id)
            .await?;
        debug!(resource_id = %resource_id, flow_id = flow_id, released, "Released resource lock");
        Ok(released)
    }
}

fn busy(owner: ResourceFlowRelation) -> FlowError {
    FlowError::ResourceBusy {
        resource_id: owner.resource_id,
        resource_type: owner.resource_type,
        owner_flow_id: owner.flow_id,
        lock_kind: owner.lock_kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{InMemoryStorage, StorageOp};

    fn gate() -> (Arc<InMemoryStorage>, ResourceGate) {
        let storage = Arc::new(InMemoryStorage::new());
        let gate = ResourceGate::new(storage.clone());
        (storage, gate)
    }

    #[tokio::test]
    async fn test_free_resource_is_available() {
        let (_, gate) = gate();
        let ctx = BuildContext::new();
        assert!(gate
            .ensure_available(&ctx, "lb-1", ResourceType::LoadBalancer)
            .await
            .is_ok());
        assert!(gate
            .check_exclusive(&ctx, "lb-1", ResourceType::LoadBalancer)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_locked_resource_reports_owner() {
        let (_, gate) = gate();
        let ctx = BuildContext::new();
        gate.lock(
            &ctx,
            "lb-1",
            ResourceType::LoadBalancer,
            7,
            LockKind::ListenerDelete,
        )
        .await
        .unwrap();

        let err = gate
            .ensure_available(&ctx, "lb-1", ResourceType::LoadBalancer)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::ResourceBusy {
                resource_id: "lb-1".to_string(),
                resource_type: ResourceType::LoadBalancer,
                owner_flow_id: 7,
                lock_kind: LockKind::ListenerDelete,
            }
        );

        // same id, different type is a different resource
        assert!(gate
            .ensure_available(&ctx, "lb-1", ResourceType::TargetGroup)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_second_lock_loses() {
        let (_, gate) = gate();
        let ctx = BuildContext::new();
        gate.lock(&ctx, "lb-1", ResourceType::LoadBalancer, 1, LockKind::TargetGroupModify)
            .await
            .unwrap();

        let err = gate
            .lock(&ctx, "lb-1", ResourceType::LoadBalancer, 2, LockKind::TargetGroupModify)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ResourceBusy { owner_flow_id: 1, .. }));

        // relocking by the owner is idempotent
        let relation = gate
            .lock(&ctx, "lb-1", ResourceType::LoadBalancer, 1, LockKind::TargetGroupModify)
            .await
            .unwrap();
        assert_eq!(relation.flow_id, 1);
    }

    #[tokio::test]
    async fn test_concurrent_lockers_have_one_winner() {
        let (storage, gate) = gate();
        let ctx = BuildContext::new();

        let attempts = (1..=16).map(|flow_id| {
            let gate = gate.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                gate.lock(
                    &ctx,
                    "lb-race",
                    ResourceType::LoadBalancer,
                    flow_id,
                    LockKind::TargetGroupModify,
                )
                .await
            })
        });

        let results = futures::future::join_all(attempts).await;
        let winners = results
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(winners, 1);
        assert_eq!(storage.relation_count(), 1);
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let (_, gate) = gate();
        let ctx = BuildContext::new();
        gate.lock(&ctx, "lb-1", ResourceType::LoadBalancer, 3, LockKind::TargetGroupBind)
            .await
            .unwrap();

        assert!(!gate.release("lb-1", ResourceType::LoadBalancer, 4).await.unwrap());
        assert!(gate.release("lb-1", ResourceType::LoadBalancer, 3).await.unwrap());
        assert!(gate
            .ensure_available(&ctx, "lb-1", ResourceType::LoadBalancer)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let (storage, gate) = gate();
        storage.fail_on(StorageOp::FindResourceRelation, "db down");
        let err = gate
            .ensure_available(&BuildContext::new(), "lb-1", ResourceType::LoadBalancer)
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::Aborted("db down".to_string()));
    }
}
