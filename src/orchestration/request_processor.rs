//! # Batch Request Processor
//!
//! Handles one API-level batch request end to end:
//!
//! 1. validate the operation parameters (no writes)
//! 2. resolve raw ids through the resource catalog (no writes)
//! 3. create the task management record
//! 4. resolve unbound target groups locally, without a flow
//! 5. build one flow per load balancer, each independently
//! 6. attach every built flow id to the task management record
//!
//! A failure in one load balancer's flow does not stop the others. The
//! submission records every failure and exposes the first one encountered,
//! which is what the API reports to the caller.

use crate::catalog::ResourceCatalog;
use crate::config::FlowConfig;
use crate::constants::{TaskType, Vendor};
use crate::error::{FlowError, Result};
use crate::models::{
    Listener, LoadBalancer, NewTaskManagement, Target, TargetGroup, TargetGroupBinding, TargetSpec,
};
use crate::orchestration::context::BuildContext;
use crate::orchestration::detail_factory::DetailScope;
use crate::orchestration::flow_builder::{FlowBuildResult, FlowBuilder, FlowScope};
use crate::orchestration::local_resolver::{LocalResolver, TargetChange};
use crate::orchestration::plans::{self, BoundSpecs, BoundTargets};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Operation requested by one API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum BatchOperation {
    ModifyTargetWeight {
        target_ids: Vec<String>,
        new_weight: u32,
    },
    ModifyTargetPort {
        target_ids: Vec<String>,
        new_port: u16,
    },
    RemoveTargets {
        target_ids: Vec<String>,
    },
    AddTargets {
        target_group_id: String,
        targets: Vec<TargetSpec>,
    },
    DeleteListeners {
        lb_id: String,
        listener_ids: Vec<String>,
    },
    BindTargetGroups {
        bindings: Vec<TargetGroupBinding>,
    },
}

impl BatchOperation {
    pub fn task_type(&self) -> TaskType {
        match self {
            BatchOperation::ModifyTargetWeight { .. } => TaskType::ModifyTargetWeight,
            BatchOperation::ModifyTargetPort { .. } => TaskType::ModifyTargetPort,
            BatchOperation::RemoveTargets { .. } => TaskType::RemoveTarget,
            BatchOperation::AddTargets { .. } => TaskType::AddTarget,
            BatchOperation::DeleteListeners { .. } => TaskType::DeleteListener,
            BatchOperation::BindTargetGroups { .. } => TaskType::BindTargetGroup,
        }
    }

    /// Parameter checks that need no catalog lookup
    pub fn validate(&self) -> Result<()> {
        match self {
            BatchOperation::ModifyTargetWeight {
                target_ids,
                new_weight,
            } => {
                require_items(target_ids, "target_ids")?;
                plans::validate_weight(*new_weight)
            }
            BatchOperation::ModifyTargetPort {
                target_ids,
                new_port,
            } => {
                require_items(target_ids, "target_ids")?;
                plans::validate_port(*new_port)
            }
            BatchOperation::RemoveTargets { target_ids } => require_items(target_ids, "target_ids"),
            BatchOperation::AddTargets {
                target_group_id,
                targets,
            } => {
                if target_group_id.is_empty() {
                    return Err(FlowError::InvalidParameter(
                        "target_group_id is required".to_string(),
                    ));
                }
                require_items(targets, "targets")?;
                targets.iter().try_for_each(plans::validate_target_spec)
            }
            BatchOperation::DeleteListeners {
                lb_id,
                listener_ids,
            } => {
                if lb_id.is_empty() {
                    return Err(FlowError::InvalidParameter("lb_id is required".to_string()));
                }
                require_items(listener_ids, "listener_ids")
            }
            BatchOperation::BindTargetGroups { bindings } => require_items(bindings, "bindings"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub business_id: i64,
    pub vendor: Vendor,
    pub account_id: String,
    /// Defaults to the configured source
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub operation: BatchOperation,
}

/// A resource whose work failed while the rest of the batch went ahead
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceFailure {
    pub resource_id: String,
    pub error: FlowError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSubmission {
    pub task_management_id: i64,
    pub flow_ids: Vec<i64>,
    /// Details resolved without a flow (unbound target groups)
    pub resolved_detail_ids: Vec<i64>,
    /// In the order they happened
    pub failures: Vec<ResourceFailure>,
}

impl BatchSubmission {
    fn new(task_management_id: i64) -> Self {
        Self {
            task_management_id,
            flow_ids: Vec::new(),
            resolved_detail_ids: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn first_error(&self) -> Option<&FlowError> {
        self.failures.first().map(|f| &f.error)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The submission, or the first error when anything failed
    pub fn into_result(self) -> Result<Self> {
        match self.failures.first() {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(self),
        }
    }

    fn record(&mut self, resource_id: &str, error: FlowError) {
        warn!(resource_id = %resource_id, error = %error, "Batch work failed for resource");
        self.failures.push(ResourceFailure {
            resource_id: resource_id.to_string(),
            error,
        });
    }
}

/// Work for a target group that was never pushed to the cloud
#[derive(Debug, Clone)]
enum LocalWork {
    Remove {
        target_group_id: String,
        targets: Vec<Target>,
    },
    Modify {
        target_group_id: String,
        targets: Vec<Target>,
        change: TargetChange,
    },
    Add {
        target_group_id: String,
        specs: Vec<TargetSpec>,
    },
}

impl LocalWork {
    fn target_group_id(&self) -> &str {
        match self {
            LocalWork::Remove {
                target_group_id, ..
            }
            | LocalWork::Modify {
                target_group_id, ..
            }
            | LocalWork::Add {
                target_group_id, ..
            } => target_group_id,
        }
    }
}

/// Work for one load balancer, built into exactly one flow
#[derive(Debug, Clone)]
enum FlowWork {
    ModifyWeight {
        lb_id: String,
        new_weight: u32,
        groups: Vec<BoundTargets>,
    },
    ModifyPort {
        lb_id: String,
        new_port: u16,
        groups: Vec<BoundTargets>,
    },
    Remove {
        lb_id: String,
        groups: Vec<BoundTargets>,
    },
    Add {
        lb_id: String,
        groups: Vec<BoundSpecs>,
    },
    DeleteListeners {
        lb: LoadBalancer,
        listeners: Vec<Listener>,
    },
    Bind {
        lb_id: String,
        groups: Vec<BoundSpecs>,
    },
}

impl FlowWork {
    fn lb_id(&self) -> &str {
        match self {
            FlowWork::ModifyWeight { lb_id, .. }
            | FlowWork::ModifyPort { lb_id, .. }
            | FlowWork::Remove { lb_id, .. }
            | FlowWork::Add { lb_id, .. }
            | FlowWork::Bind { lb_id, .. } => lb_id,
            FlowWork::DeleteListeners { lb, .. } => &lb.id,
        }
    }
}

#[derive(Debug, Default)]
struct ResolvedWork {
    local: Vec<LocalWork>,
    flows: Vec<FlowWork>,
}

#[derive(Clone)]
pub struct BatchRequestProcessor {
    storage: Arc<dyn Storage>,
    catalog: Arc<dyn ResourceCatalog>,
    builder: FlowBuilder,
    local: LocalResolver,
    default_source: String,
}

impl std::fmt::Debug for BatchRequestProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRequestProcessor")
            .field("builder", &self.builder)
            .field("default_source", &self.default_source)
            .finish_non_exhaustive()
    }
}

impl BatchRequestProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        catalog: Arc<dyn ResourceCatalog>,
        config: &FlowConfig,
    ) -> Self {
        let builder = FlowBuilder::new(storage.clone(), config);
        let local = LocalResolver::new(
            catalog.clone(),
            builder.detail_factory().clone(),
            builder.failure_unwind().clone(),
        );
        Self {
            storage,
            catalog,
            builder,
            local,
            default_source: config.default_source.clone(),
        }
    }

    pub fn flow_builder(&self) -> &FlowBuilder {
        &self.builder
    }

    /// Process one batch request. `Err` means nothing was written, or the
    /// final flow attachment failed.
    ///
    /// `Ok` does not mean every load balancer got a flow: per-resource
    /// failures such as `ResourceBusy` are recorded in the submission.
    /// Callers must check [`BatchSubmission::first_error`] or use
    /// [`BatchSubmission::into_result`].
    #[instrument(skip_all, fields(
        request_id = %ctx.request_id(),
        business_id = request.business_id,
        task_type = %request.operation.task_type(),
    ))]
    pub async fn process(
        &self,
        ctx: &BuildContext,
        request: BatchRequest,
    ) -> Result<BatchSubmission> {
        request.operation.validate()?;
        let work = self.resolve(ctx, &request).await?;
        let task_type = request.operation.task_type();

        let task_management = ctx
            .run(
                "create_task_management",
                self.storage.create_task_management(NewTaskManagement {
                    business_id: request.business_id,
                    vendor: request.vendor,
                    account_id: request.account_id.clone(),
                    source: request
                        .source
                        .clone()
                        .unwrap_or_else(|| self.default_source.clone()),
                    task_type,
                }),
            )
            .await?;

        let mut submission = BatchSubmission::new(task_management.id);

        for item in work.local {
            let scope = DetailScope {
                task_management_id: task_management.id,
                business_id: request.business_id,
                task_type,
            };
            match self.run_local(ctx, &scope, &item).await {
                Ok(ids) => submission.resolved_detail_ids.extend(ids),
                Err(err) => submission.record(item.target_group_id(), err),
            }
        }

        for item in work.flows {
            let scope = FlowScope::load_balancer(
                item.lb_id(),
                request.account_id.clone(),
                task_management.id,
                request.vendor,
                request.business_id,
            );
            match self.run_flow(ctx, &scope, &item).await {
                Ok(result) => submission.flow_ids.push(result.flow_id),
                Err(err) => submission.record(item.lb_id(), err),
            }
        }

        ctx.run(
            "attach_flows",
            self.storage
                .attach_flows(task_management.id, &submission.flow_ids),
        )
        .await?;

        info!(
            task_management_id = task_management.id,
            flow_count = submission.flow_ids.len(),
            resolved_locally = submission.resolved_detail_ids.len(),
            failure_count = submission.failures.len(),
            "Processed batch request"
        );
        Ok(submission)
    }

    async fn run_local(
        &self,
        ctx: &BuildContext,
        scope: &DetailScope,
        work: &LocalWork,
    ) -> Result<Vec<i64>> {
        match work {
            LocalWork::Remove { targets, .. } => self.local.remove_targets(ctx, scope, targets).await,
            LocalWork::Modify {
                targets, change, ..
            } => {
                self.local
                    .modify_targets(ctx, scope, targets, *change)
                    .await
            }
            LocalWork::Add {
                target_group_id,
                specs,
            } => {
                self.local
                    .add_targets(ctx, scope, target_group_id, specs)
                    .await
            }
        }
    }

    async fn run_flow(
        &self,
        ctx: &BuildContext,
        scope: &FlowScope,
        work: &FlowWork,
    ) -> Result<FlowBuildResult> {
        match work {
            FlowWork::ModifyWeight {
                new_weight, groups, ..
            } => {
                self.builder
                    .build_modify_weight_flow(ctx, scope, *new_weight, groups)
                    .await
            }
            FlowWork::ModifyPort {
                new_port, groups, ..
            } => {
                self.builder
                    .build_modify_port_flow(ctx, scope, *new_port, groups)
                    .await
            }
            FlowWork::Remove { groups, .. } => {
                self.builder
                    .build_remove_targets_flow(ctx, scope, groups)
                    .await
            }
            FlowWork::Add { groups, .. } => {
                self.builder.build_add_targets_flow(ctx, scope, groups).await
            }
            FlowWork::DeleteListeners { lb, listeners } => {
                self.builder
                    .build_delete_listener_flow(ctx, scope, lb, listeners)
                    .await
            }
            FlowWork::Bind { groups, .. } => {
                self.builder
                    .build_bind_target_group_flow(ctx, scope, groups)
                    .await
            }
        }
    }

    async fn resolve(&self, ctx: &BuildContext, request: &BatchRequest) -> Result<ResolvedWork> {
        match &request.operation {
            BatchOperation::ModifyTargetWeight {
                target_ids,
                new_weight,
            } => {
                let new_weight = *new_weight;
                self.resolve_targets(
                    ctx,
                    request,
                    target_ids,
                    |tg, targets| LocalWork::Modify {
                        target_group_id: tg,
                        targets,
                        change: TargetChange::Weight(new_weight),
                    },
                    |lb_id, groups| FlowWork::ModifyWeight {
                        lb_id,
                        new_weight,
                        groups,
                    },
                )
                .await
            }
            BatchOperation::ModifyTargetPort {
                target_ids,
                new_port,
            } => {
                let new_port = *new_port;
                self.resolve_targets(
                    ctx,
                    request,
                    target_ids,
                    |tg, targets| LocalWork::Modify {
                        target_group_id: tg,
                        targets,
                        change: TargetChange::Port(new_port),
                    },
                    |lb_id, groups| FlowWork::ModifyPort {
                        lb_id,
                        new_port,
                        groups,
                    },
                )
                .await
            }
            BatchOperation::RemoveTargets { target_ids } => {
                self.resolve_targets(
                    ctx,
                    request,
                    target_ids,
                    |tg, targets| LocalWork::Remove {
                        target_group_id: tg,
                        targets,
                    },
                    |lb_id, groups| FlowWork::Remove { lb_id, groups },
                )
                .await
            }
            BatchOperation::AddTargets {
                target_group_id,
                targets,
            } => {
                self.target_group(ctx, request, target_group_id).await?;
                let binding = ctx
                    .run(
                        "find_target_group_binding",
                        self.catalog.find_target_group_binding(target_group_id),
                    )
                    .await?;
                let mut work = ResolvedWork::default();
                match binding {
                    None => work.local.push(LocalWork::Add {
                        target_group_id: target_group_id.clone(),
                        specs: targets.clone(),
                    }),
                    Some(binding) => work.flows.push(FlowWork::Add {
                        lb_id: binding.lb_id.clone(),
                        groups: vec![BoundSpecs {
                            binding,
                            targets: targets.clone(),
                        }],
                    }),
                }
                Ok(work)
            }
            BatchOperation::DeleteListeners {
                lb_id,
                listener_ids,
            } => {
                let lb = self.load_balancer(ctx, request, lb_id).await?;
                let listeners = ctx
                    .run("list_listeners", self.catalog.list_listeners(listener_ids))
                    .await?;
                ensure_all_found(
                    "listener",
                    listener_ids,
                    listeners.iter().map(|l| l.id.as_str()),
                )?;
                Ok(ResolvedWork {
                    local: Vec::new(),
                    flows: vec![FlowWork::DeleteListeners { lb, listeners }],
                })
            }
            BatchOperation::BindTargetGroups { bindings } => {
                let mut per_lb: Vec<(String, Vec<BoundSpecs>)> = Vec::new();
                for binding in bindings {
                    self.target_group(ctx, request, &binding.target_group_id)
                        .await?;
                    if let Some(existing) = ctx
                        .run(
                            "find_target_group_binding",
                            self.catalog
                                .find_target_group_binding(&binding.target_group_id),
                        )
                        .await?
                    {
                        return Err(FlowError::RecordNotUpdate(format!(
                            "target group {} is already bound to listener {}",
                            existing.target_group_id, existing.listener_id
                        )));
                    }
                    self.load_balancer(ctx, request, &binding.lb_id).await?;
                    self.binding_listener(ctx, binding).await?;

                    let targets = ctx
                        .run(
                            "list_targets_by_group",
                            self.catalog
                                .list_targets_by_group(&binding.target_group_id),
                        )
                        .await?;
                    let group = BoundSpecs {
                        binding: binding.clone(),
                        targets: targets.iter().map(target_spec).collect(),
                    };
                    push_grouped(&mut per_lb, binding.lb_id.clone(), group);
                }
                Ok(ResolvedWork {
                    local: Vec::new(),
                    flows: per_lb
                        .into_iter()
                        .map(|(lb_id, groups)| FlowWork::Bind { lb_id, groups })
                        .collect(),
                })
            }
        }
    }

    /// Resolve target ids, split them per target group in request order and
    /// route each group to the local path or to its load balancer's flow
    async fn resolve_targets(
        &self,
        ctx: &BuildContext,
        request: &BatchRequest,
        target_ids: &[String],
        local: impl Fn(String, Vec<Target>) -> LocalWork,
        flow: impl Fn(String, Vec<BoundTargets>) -> FlowWork,
    ) -> Result<ResolvedWork> {
        let targets = ctx
            .run("list_targets", self.catalog.list_targets(target_ids))
            .await?;
        ensure_all_found("target", target_ids, targets.iter().map(|t| t.id.as_str()))?;

        let mut by_group: Vec<(String, Vec<Target>)> = Vec::new();
        for target in targets {
            push_grouped(&mut by_group, target.target_group_id.clone(), target);
        }

        let mut work = ResolvedWork::default();
        let mut per_lb: Vec<(String, Vec<BoundTargets>)> = Vec::new();
        for (target_group_id, targets) in by_group {
            self.target_group(ctx, request, &target_group_id).await?;
            let binding = ctx
                .run(
                    "find_target_group_binding",
                    self.catalog.find_target_group_binding(&target_group_id),
                )
                .await?;
            match binding {
                None => work.local.push(local(target_group_id, targets)),
                Some(binding) => {
                    let lb_id = binding.lb_id.clone();
                    push_grouped(&mut per_lb, lb_id, BoundTargets { binding, targets });
                }
            }
        }

        work.flows = per_lb
            .into_iter()
            .map(|(lb_id, groups)| flow(lb_id, groups))
            .collect();
        Ok(work)
    }

    async fn target_group(
        &self,
        ctx: &BuildContext,
        request: &BatchRequest,
        target_group_id: &str,
    ) -> Result<TargetGroup> {
        let tg = ctx
            .run(
                "get_target_group",
                self.catalog.get_target_group(target_group_id),
            )
            .await?
            .ok_or_else(|| FlowError::RecordNotFound(format!("target group {target_group_id}")))?;
        check_ownership("target group", &tg.id, tg.vendor, &tg.account_id, request)?;
        Ok(tg)
    }

    async fn load_balancer(
        &self,
        ctx: &BuildContext,
        request: &BatchRequest,
        lb_id: &str,
    ) -> Result<LoadBalancer> {
        let lb = ctx
            .run("get_load_balancer", self.catalog.get_load_balancer(lb_id))
            .await?
            .ok_or_else(|| FlowError::RecordNotFound(format!("load balancer {lb_id}")))?;
        check_ownership("load balancer", &lb.id, lb.vendor, &lb.account_id, request)?;
        Ok(lb)
    }

    /// The listener a binding targets, which must exist on the binding's
    /// load balancer under the cloud id the binding carries
    async fn binding_listener(
        &self,
        ctx: &BuildContext,
        binding: &TargetGroupBinding,
    ) -> Result<Listener> {
        let listener = ctx
            .run(
                "list_listeners",
                self.catalog
                    .list_listeners(std::slice::from_ref(&binding.listener_id)),
            )
            .await?
            .into_iter()
            .find(|l| l.id == binding.listener_id)
            .ok_or_else(|| {
                FlowError::RecordNotFound(format!("listener {}", binding.listener_id))
            })?;

        if listener.lb_id != binding.lb_id {
            return Err(FlowError::InvalidParameter(format!(
                "listener {} belongs to load balancer {}, not {}",
                listener.id, listener.lb_id, binding.lb_id
            )));
        }
        if listener.cloud_id != binding.listener_cloud_id {
            return Err(FlowError::InvalidParameter(format!(
                "listener {} has cloud id {}, binding names {}",
                listener.id, listener.cloud_id, binding.listener_cloud_id
            )));
        }
        Ok(listener)
    }
}

fn require_items<T>(items: &[T], name: &str) -> Result<()> {
    if items.is_empty() {
        return Err(FlowError::InvalidParameter(format!("{name} must not be empty")));
    }
    Ok(())
}

fn check_ownership(
    kind: &str,
    id: &str,
    vendor: Vendor,
    account_id: &str,
    request: &BatchRequest,
) -> Result<()> {
    if vendor != request.vendor || account_id != request.account_id {
        return Err(FlowError::InvalidParameter(format!(
            "{kind} {id} belongs to {vendor}/{account_id}, not {}/{}",
            request.vendor, request.account_id
        )));
    }
    Ok(())
}

fn ensure_all_found<'a>(
    kind: &str,
    requested: &[String],
    found: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let found: HashSet<&str> = found.collect();
    let missing: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|id| !found.contains(id))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(FlowError::RecordNotFound(format!(
        "{kind} {}",
        missing.join(", ")
    )))
}

/// Append `item` to the bucket of `key`, keeping buckets in first-seen order
fn push_grouped<K: PartialEq, T>(groups: &mut Vec<(K, Vec<T>)>, key: K, item: T) {
    match groups.iter().position(|(k, _)| *k == key) {
        Some(i) => groups[i].1.push(item),
        None => groups.push((key, vec![item])),
    }
}

fn target_spec(target: &Target) -> TargetSpec {
    TargetSpec {
        cloud_inst_id: target.cloud_inst_id.clone(),
        ip: target.ip.clone(),
        port: target.port,
        weight: target.weight,
    }
}
