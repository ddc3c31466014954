//! # Flow Builder
//!
//! Entry points that build one flow for one resource, one per supported
//! operation. Each entry point plans the operation (pure, no writes) and then
//! runs the shared pipeline:
//!
//! ```text
//! plan ─► gate check ─► chain builder ─► flow assembler ─► flow id
//!                            │                  │
//!                            └──── on error ────┴─► failure unwind
//! ```
//!
//! A busy resource or an invalid plan is a clean abort with nothing
//! written. Any failure after the first detail exists unwinds every detail
//! of the attempt before the error is returned.

use crate::config::{BatchLimits, FlowConfig};
use crate::constants::{ResourceType, TaskType, Vendor};
use crate::error::Result;
use crate::logging::log_flow_operation;
use crate::models::{Listener, LoadBalancer, RetryPolicy};
use crate::orchestration::chain_builder::ChainBuilder;
use crate::orchestration::context::BuildContext;
use crate::orchestration::detail_factory::{DetailScope, TaskDetailFactory};
use crate::orchestration::failure_unwind::FailureUnwind;
use crate::orchestration::flow_assembler::{FlowAssembler, FlowDraft};
use crate::orchestration::plans::{self, BoundSpecs, BoundTargets, FlowPlan};
use crate::orchestration::resource_gate::ResourceGate;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Who a flow is built for and which resource it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowScope {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub account_id: String,
    pub task_management_id: i64,
    pub vendor: Vendor,
    pub business_id: i64,
}

impl FlowScope {
    /// Scope of a flow owning a load balancer
    pub fn load_balancer(
        lb_id: impl Into<String>,
        account_id: impl Into<String>,
        task_management_id: i64,
        vendor: Vendor,
        business_id: i64,
    ) -> Self {
        Self {
            resource_id: lb_id.into(),
            resource_type: ResourceType::LoadBalancer,
            account_id: account_id.into(),
            task_management_id,
            vendor,
            business_id,
        }
    }

    pub fn detail_scope(&self, task_type: TaskType) -> DetailScope {
        DetailScope {
            task_management_id: self.task_management_id,
            business_id: self.business_id,
            task_type,
        }
    }
}

/// Result of a successful flow construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowBuildResult {
    pub flow_id: i64,
    pub task_count: usize,
    pub detail_ids: Vec<i64>,
}

#[derive(Clone)]
pub struct FlowBuilder {
    gate: ResourceGate,
    factory: TaskDetailFactory,
    assembler: FlowAssembler,
    unwind: FailureUnwind,
    limits: BatchLimits,
    retry: RetryPolicy,
}

impl std::fmt::Debug for FlowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBuilder")
            .field("limits", &self.limits)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl FlowBuilder {
    pub fn new(storage: Arc<dyn Storage>, config: &FlowConfig) -> Self {
        let gate = ResourceGate::new(storage.clone());
        let factory = TaskDetailFactory::new(storage.clone());
        Self {
            assembler: FlowAssembler::new(storage.clone(), gate.clone(), factory.clone()),
            unwind: FailureUnwind::new(storage),
            gate,
            factory,
            limits: config.batch_limits.clone(),
            retry: config.retry,
        }
    }

    pub fn gate(&self) -> &ResourceGate {
        &self.gate
    }

    pub fn detail_factory(&self) -> &TaskDetailFactory {
        &self.factory
    }

    pub fn failure_unwind(&self) -> &FailureUnwind {
        &self.unwind
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Change the weight of bound targets, chunked per target group
    pub async fn build_modify_weight_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        new_weight: u32,
        groups: &[BoundTargets],
    ) -> Result<FlowBuildResult> {
        let limit = self.limits.limit_for(TaskType::ModifyTargetWeight);
        let plan = plans::plan_modify_weight(&scope.resource_id, limit, new_weight, groups)?;
        self.build_flow(ctx, scope, plan).await
    }

    /// Change the port of bound targets, chunked per target group
    pub async fn build_modify_port_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        new_port: u16,
        groups: &[BoundTargets],
    ) -> Result<FlowBuildResult> {
        let limit = self.limits.limit_for(TaskType::ModifyTargetPort);
        let plan = plans::plan_modify_port(&scope.resource_id, limit, new_port, groups)?;
        self.build_flow(ctx, scope, plan).await
    }

    /// Deregister bound targets from the cloud
    pub async fn build_remove_targets_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        groups: &[BoundTargets],
    ) -> Result<FlowBuildResult> {
        let limit = self.limits.limit_for(TaskType::RemoveTarget);
        let plan = plans::plan_remove_targets(&scope.resource_id, limit, groups)?;
        self.build_flow(ctx, scope, plan).await
    }

    /// Register new targets into bound target groups
    pub async fn build_add_targets_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        groups: &[BoundSpecs],
    ) -> Result<FlowBuildResult> {
        let limit = self.limits.limit_for(TaskType::AddTarget);
        let plan = plans::plan_add_targets(&scope.resource_id, limit, groups)?;
        self.build_flow(ctx, scope, plan).await
    }

    /// Delete listeners of one load balancer
    pub async fn build_delete_listener_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        lb: &LoadBalancer,
        listeners: &[Listener],
    ) -> Result<FlowBuildResult> {
        let limit = self.limits.limit_for(TaskType::DeleteListener);
        let plan = plans::plan_delete_listeners(lb, limit, listeners)?;
        self.build_flow(ctx, scope, plan).await
    }

    /// Bind target groups to listener rules, registering their targets
    pub async fn build_bind_target_group_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        groups: &[BoundSpecs],
    ) -> Result<FlowBuildResult> {
        let limit = self.limits.limit_for(TaskType::AddTarget);
        let plan = plans::plan_bind_target_groups(&scope.resource_id, limit, groups)?;
        self.build_flow(ctx, scope, plan).await
    }

    /// Run the shared pipeline for an already-validated plan
    #[instrument(skip_all, fields(
        request_id = %ctx.request_id(),
        resource_id = %scope.resource_id,
        task_type = %plan.task_type,
    ))]
    pub async fn build_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        plan: FlowPlan,
    ) -> Result<FlowBuildResult> {
        let started = Instant::now();
        let task_type = plan.task_type;
        let operation = task_type.flow_type();

        if let Err(err) = self
            .gate
            .ensure_available(ctx, &scope.resource_id, scope.resource_type)
            .await
        {
            log_flow_operation(
                operation.as_str(),
                &scope.resource_id,
                None,
                "rejected",
                0,
                0,
                elapsed_ms(started),
                Some(&err.to_string()),
            );
            return Err(err);
        }

        info!(
            task_count = plan.task_count(),
            item_count = plan.item_count(),
            "Building flow"
        );

        let mut chain = ChainBuilder::new(
            self.factory.clone(),
            scope.detail_scope(task_type),
            scope.vendor,
            self.retry,
        );

        let built = match chain.push_chunks(ctx, plan.chunks).await {
            Ok(()) => {
                let draft = FlowDraft {
                    flow_type: operation,
                    resource_id: scope.resource_id.clone(),
                    resource_type: scope.resource_type,
                    lock_kind: task_type.lock_kind(),
                    vendor: scope.vendor,
                    account_id: scope.account_id.clone(),
                    tasks: chain.take_tasks(),
                    sub_resources: plan.sub_resources,
                };
                self.assembler
                    .assemble(ctx, draft, chain.details_mut())
                    .await
            }
            Err(err) => Err(err),
        };

        let chain = chain.finish();
        match built {
            Ok(flow) => {
                log_flow_operation(
                    operation.as_str(),
                    &scope.resource_id,
                    Some(flow.id),
                    "built",
                    flow.tasks.len(),
                    chain.details.len(),
                    elapsed_ms(started),
                    None,
                );
                Ok(FlowBuildResult {
                    flow_id: flow.id,
                    task_count: flow.tasks.len(),
                    detail_ids: chain.details.iter().map(|d| d.id).collect(),
                })
            }
            Err(err) => {
                let mut details = chain.details;
                let unwound = self.unwind.unwind(&mut details, &err).await;
                log_flow_operation(
                    operation.as_str(),
                    &scope.resource_id,
                    details.first().and_then(|d| d.flow_id),
                    "failed",
                    0,
                    unwound,
                    elapsed_ms(started),
                    Some(&err.to_string()),
                );
                Err(err)
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DetailState, FlowState};
    use crate::error::FlowError;
    use crate::models::{Target, TargetGroupBinding};
    use crate::storage::memory::{InMemoryStorage, StorageOp};

    fn binding(tg: &str) -> TargetGroupBinding {
        TargetGroupBinding {
            target_group_id: tg.to_string(),
            lb_id: "lb-1".to_string(),
            lb_cloud_id: "lb-cloud-1".to_string(),
            listener_id: "lst-1".to_string(),
            listener_cloud_id: "lst-cloud-1".to_string(),
            rule_cloud_id: None,
        }
    }

    fn group(tg: &str, n: usize) -> BoundTargets {
        BoundTargets {
            binding: binding(tg),
            targets: (0..n)
                .map(|i| Target {
                    id: format!("{tg}-t{i}"),
                    target_group_id: tg.to_string(),
                    cloud_inst_id: format!("ins-{i}"),
                    ip: "10.0.0.1".to_string(),
                    port: 80,
                    weight: 10,
                })
                .collect(),
        }
    }

    fn scope() -> FlowScope {
        FlowScope::load_balancer("lb-1", "acct-1", 1, Vendor::TCloud, 77)
    }

    fn builder(storage: Arc<InMemoryStorage>, modify_weight_limit: usize) -> FlowBuilder {
        let mut config = FlowConfig::default();
        config.batch_limits.modify_weight = modify_weight_limit;
        FlowBuilder::new(storage, &config)
    }

    #[tokio::test]
    async fn test_modify_weight_flow() {
        let storage = Arc::new(InMemoryStorage::new());
        let builder = builder(storage.clone(), 2);

        let result = builder
            .build_modify_weight_flow(&BuildContext::new(), &scope(), 30, &[group("tg-1", 5)])
            .await
            .unwrap();

        assert_eq!(result.task_count, 3);
        assert_eq!(result.detail_ids.len(), 5);

        let flow = storage.get_flow(result.flow_id).await.unwrap().unwrap();
        assert_eq!(flow.state, FlowState::Pending);
        assert_eq!(flow.tasks[2].depends_on, vec![flow.tasks[1].action_id.clone()]);
        assert!(storage
            .all_details()
            .iter()
            .all(|d| d.flow_id == Some(result.flow_id) && d.action_id.is_some()));
    }

    #[tokio::test]
    async fn test_busy_resource_writes_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let builder = builder(storage.clone(), 500);
        builder
            .gate()
            .lock(
                &BuildContext::new(),
                "lb-1",
                ResourceType::LoadBalancer,
                41,
                TaskType::DeleteListener.lock_kind(),
            )
            .await
            .unwrap();

        let err = builder
            .build_remove_targets_flow(&BuildContext::new(), &scope(), &[group("tg-1", 3)])
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::ResourceBusy { owner_flow_id: 41, .. }));
        assert_eq!(storage.detail_count(), 0);
        assert_eq!(storage.flow_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_lost_after_availability_check_unwinds() {
        let storage = Arc::new(InMemoryStorage::new());
        let builder = builder(storage.clone(), 2);
        builder
            .gate()
            .lock(
                &BuildContext::new(),
                "lb-1",
                ResourceType::LoadBalancer,
                999,
                TaskType::DeleteListener.lock_kind(),
            )
            .await
            .unwrap();
        // the availability check misses the owner, so only the lock sees it
        storage.set_stale_relation_reads(true);

        let err = builder
            .build_modify_weight_flow(&BuildContext::new(), &scope(), 30, &[group("tg-1", 5)])
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::ResourceBusy { owner_flow_id: 999, .. }));
        assert_eq!(storage.detail_count(), 5);
        assert!(storage.details_in_state(DetailState::Pending).is_empty());
        assert!(storage
            .all_details()
            .iter()
            .all(|d| d.state == DetailState::Failed
                && d.reason.as_deref().is_some_and(|r| !r.is_empty())));

        assert_eq!(storage.flow_count(), 1);
        let flow_id = storage.all_details()[0]
            .flow_id
            .expect("details are linked to the flow before locking");
        let flow = storage.get_flow(flow_id).await.unwrap().unwrap();
        assert_eq!(flow.state, FlowState::Init);
        assert_eq!(storage.relation_count(), 1);

        storage.set_stale_relation_reads(false);
        let owner = builder
            .gate()
            .check_exclusive(&BuildContext::new(), "lb-1", ResourceType::LoadBalancer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.flow_id, 999);
    }

    #[tokio::test]
    async fn test_invalid_plan_writes_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let builder = builder(storage.clone(), 500);

        let err = builder
            .build_modify_weight_flow(&BuildContext::new(), &scope(), 300, &[group("tg-1", 3)])
            .await
            .unwrap_err();

        assert_eq!(err.code(), "invalid_parameter");
        assert_eq!(storage.call_count(StorageOp::FindResourceRelation), 0);
        assert_eq!(storage.detail_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_after_details_unwinds_all() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.fail_on(StorageOp::CreateFlow, "flow insert failed");
        let builder = builder(storage.clone(), 2);

        let err = builder
            .build_modify_weight_flow(&BuildContext::new(), &scope(), 30, &[group("tg-1", 5)])
            .await
            .unwrap_err();

        assert_eq!(err, FlowError::Aborted("flow insert failed".to_string()));
        assert_eq!(storage.detail_count(), 5);
        assert!(storage.details_in_state(DetailState::Pending).is_empty());
        assert!(storage
            .all_details()
            .iter()
            .all(|d| d.reason.as_deref() == Some("Aborted: flow insert failed")));
    }
}
