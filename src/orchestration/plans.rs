//! # Flow Plans
//!
//! Pure planning for every supported operation: input validation, chunking
//! under the per-operation batch limit, duplicate detection and the cloud
//! request of each chunk. Nothing here touches storage, so every error
//! raised while planning aborts construction before the first write.

use crate::constants::{ResourceType, TaskType};
use crate::error::{FlowError, Result};
use crate::models::{
    BindTargetGroupRuleRequest, CloudRequest, DeleteListenersRequest, DeregisterTargetsRequest,
    Listener, ListenerRef, LoadBalancer, ModifyTargetPortRequest, ModifyTargetWeightRequest,
    RegisterTargetsRequest, Target, TargetGroupBinding, TargetRef, TargetSpec,
};
use crate::orchestration::chain_builder::{
    chunk_count, ensure_unique, split_into_chunks, PlannedChunk,
};
use crate::orchestration::flow_assembler::SubResource;
use serde_json::json;

/// Highest weight a backend target accepts
pub const MAX_TARGET_WEIGHT: u32 = 100;

/// Existing targets of one bound target group
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTargets {
    pub binding: TargetGroupBinding,
    pub targets: Vec<Target>,
}

/// New targets for one bound target group
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSpecs {
    pub binding: TargetGroupBinding,
    pub targets: Vec<TargetSpec>,
}

/// Chunks and sub-resources of one flow, ready for the chain builder
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPlan {
    pub task_type: TaskType,
    pub chunks: Vec<PlannedChunk>,
    pub sub_resources: Vec<SubResource>,
}

impl FlowPlan {
    pub fn item_count(&self) -> usize {
        self.chunks.iter().map(PlannedChunk::len).sum()
    }

    pub fn task_count(&self) -> usize {
        self.chunks.len()
    }
}

pub fn validate_weight(weight: u32) -> Result<()> {
    if weight > MAX_TARGET_WEIGHT {
        return Err(FlowError::InvalidParameter(format!(
            "weight {weight} is outside 0..={MAX_TARGET_WEIGHT}"
        )));
    }
    Ok(())
}

pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(FlowError::InvalidParameter(
            "port must be within 1..=65535".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_target_spec(spec: &TargetSpec) -> Result<()> {
    if spec.cloud_inst_id.is_empty() {
        return Err(FlowError::InvalidParameter(
            "target cloud instance id is empty".to_string(),
        ));
    }
    validate_port(spec.port)?;
    validate_weight(spec.weight)
}

pub fn plan_modify_weight(
    lb_id: &str,
    limit: usize,
    new_weight: u32,
    groups: &[BoundTargets],
) -> Result<FlowPlan> {
    validate_weight(new_weight)?;
    plan_target_chunks(
        TaskType::ModifyTargetWeight,
        lb_id,
        limit,
        groups.iter().map(|g| (&g.binding, g.targets.as_slice())),
        "cloud instance",
        |t: &Target| t.cloud_inst_id.clone(),
        |binding, chunk| PlannedChunk {
            detail_params: chunk
                .iter()
                .map(|t| with_field(target_param(t), "new_weight", json!(new_weight)))
                .collect(),
            request: CloudRequest::ModifyTargetWeight(ModifyTargetWeightRequest {
                binding: binding.clone(),
                new_weight,
                targets: chunk.iter().map(target_ref).collect(),
            }),
        },
    )
}

pub fn plan_modify_port(
    lb_id: &str,
    limit: usize,
    new_port: u16,
    groups: &[BoundTargets],
) -> Result<FlowPlan> {
    validate_port(new_port)?;
    plan_target_chunks(
        TaskType::ModifyTargetPort,
        lb_id,
        limit,
        groups.iter().map(|g| (&g.binding, g.targets.as_slice())),
        "cloud instance",
        |t: &Target| t.cloud_inst_id.clone(),
        |binding, chunk| PlannedChunk {
            detail_params: chunk
                .iter()
                .map(|t| with_field(target_param(t), "new_port", json!(new_port)))
                .collect(),
            request: CloudRequest::ModifyTargetPort(ModifyTargetPortRequest {
                binding: binding.clone(),
                new_port,
                targets: chunk.iter().map(target_ref).collect(),
            }),
        },
    )
}

pub fn plan_remove_targets(lb_id: &str, limit: usize, groups: &[BoundTargets]) -> Result<FlowPlan> {
    plan_target_chunks(
        TaskType::RemoveTarget,
        lb_id,
        limit,
        groups.iter().map(|g| (&g.binding, g.targets.as_slice())),
        "cloud instance and port",
        |t: &Target| format!("{}:{}", t.cloud_inst_id, t.port),
        |binding, chunk| PlannedChunk {
            detail_params: chunk.iter().map(target_param).collect(),
            request: CloudRequest::DeregisterTargets(DeregisterTargetsRequest {
                binding: binding.clone(),
                targets: chunk.iter().map(target_ref).collect(),
            }),
        },
    )
}

pub fn plan_add_targets(lb_id: &str, limit: usize, groups: &[BoundSpecs]) -> Result<FlowPlan> {
    for spec in groups.iter().flat_map(|g| &g.targets) {
        validate_target_spec(spec)?;
    }
    plan_target_chunks(
        TaskType::AddTarget,
        lb_id,
        limit,
        groups.iter().map(|g| (&g.binding, g.targets.as_slice())),
        "cloud instance and port",
        |s: &TargetSpec| format!("{}:{}", s.cloud_inst_id, s.port),
        register_chunk,
    )
}

pub fn plan_delete_listeners(
    lb: &LoadBalancer,
    limit: usize,
    listeners: &[Listener],
) -> Result<FlowPlan> {
    if listeners.is_empty() {
        return Err(no_items(TaskType::DeleteListener));
    }
    if let Some(foreign) = listeners.iter().find(|l| l.lb_id != lb.id) {
        return Err(FlowError::InvalidParameter(format!(
            "listener {} belongs to load balancer {}, not {}",
            foreign.id, foreign.lb_id, lb.id
        )));
    }

    let mut chunks = Vec::with_capacity(chunk_count(listeners.len(), limit));
    for chunk in split_into_chunks(listeners, limit) {
        ensure_unique(chunk, "listener", |l: &Listener| l.id.clone())?;
        chunks.push(PlannedChunk {
            detail_params: chunk
                .iter()
                .map(|l| {
                    json!({
                        "listener_id": l.id,
                        "cloud_id": l.cloud_id,
                        "protocol": l.protocol,
                        "port": l.port,
                    })
                })
                .collect(),
            request: CloudRequest::DeleteListeners(DeleteListenersRequest {
                lb_cloud_id: lb.cloud_id.clone(),
                listeners: chunk
                    .iter()
                    .map(|l| ListenerRef {
                        listener_id: l.id.clone(),
                        cloud_id: l.cloud_id.clone(),
                    })
                    .collect(),
            }),
        });
    }

    Ok(FlowPlan {
        task_type: TaskType::DeleteListener,
        chunks,
        sub_resources: listeners
            .iter()
            .map(|l| SubResource::new(l.id.clone(), ResourceType::Listener))
            .collect(),
    })
}

/// One rule binding per target group, followed by its targets registered in
/// chunks of at most `target_limit`. All chunks of all groups form one chain,
/// so a group's registrations run only after its rule is bound.
pub fn plan_bind_target_groups(
    lb_id: &str,
    target_limit: usize,
    groups: &[BoundSpecs],
) -> Result<FlowPlan> {
    if groups.is_empty() {
        return Err(no_items(TaskType::BindTargetGroup));
    }

    let mut chunks = Vec::with_capacity(groups.len());
    let mut sub_resources: Vec<SubResource> = Vec::with_capacity(groups.len());
    for group in groups {
        check_binding(lb_id, &group.binding)?;
        for spec in &group.targets {
            validate_target_spec(spec)?;
        }
        ensure_unique(&group.targets, "cloud instance and port", |s: &TargetSpec| {
            format!("{}:{}", s.cloud_inst_id, s.port)
        })?;

        let sub = SubResource::new(group.binding.target_group_id.clone(), ResourceType::TargetGroup);
        if sub_resources.contains(&sub) {
            return Err(FlowError::RecordDuplicated(format!(
                "target group {} is bound twice in one request",
                group.binding.target_group_id
            )));
        }
        sub_resources.push(sub);

        chunks.push(PlannedChunk {
            detail_params: vec![json!({
                "target_group_id": group.binding.target_group_id,
                "listener_id": group.binding.listener_id,
                "rule_cloud_id": group.binding.rule_cloud_id,
                "target_count": group.targets.len(),
            })],
            request: CloudRequest::BindTargetGroupRule(BindTargetGroupRuleRequest {
                binding: group.binding.clone(),
            }),
        });
        chunks.extend(
            split_into_chunks(&group.targets, target_limit)
                .map(|chunk| register_chunk(&group.binding, chunk)),
        );
    }

    Ok(FlowPlan {
        task_type: TaskType::BindTargetGroup,
        chunks,
        sub_resources,
    })
}

fn register_chunk(binding: &TargetGroupBinding, chunk: &[TargetSpec]) -> PlannedChunk {
    PlannedChunk {
        detail_params: chunk
            .iter()
            .map(|s| spec_param(&binding.target_group_id, s))
            .collect(),
        request: CloudRequest::RegisterTargets(RegisterTargetsRequest {
            binding: binding.clone(),
            targets: chunk.to_vec(),
        }),
    }
}

fn plan_target_chunks<'a, T, K>(
    task_type: TaskType,
    lb_id: &str,
    limit: usize,
    groups: impl Iterator<Item = (&'a TargetGroupBinding, &'a [T])>,
    label: &str,
    key: impl Fn(&T) -> K,
    build: impl Fn(&TargetGroupBinding, &[T]) -> PlannedChunk,
) -> Result<FlowPlan>
where
    T: 'a,
    K: Eq + std::hash::Hash + std::fmt::Display,
{
    let mut chunks = Vec::new();
    let mut sub_resources: Vec<SubResource> = Vec::new();

    for (binding, targets) in groups {
        check_binding(lb_id, binding)?;
        if targets.is_empty() {
            continue;
        }

        for chunk in split_into_chunks(targets, limit) {
            ensure_unique(chunk, label, &key)?;
            chunks.push(build(binding, chunk));
        }

        let sub = SubResource::new(binding.target_group_id.clone(), ResourceType::TargetGroup);
        if !sub_resources.contains(&sub) {
            sub_resources.push(sub);
        }
    }

    if chunks.is_empty() {
        return Err(no_items(task_type));
    }

    Ok(FlowPlan {
        task_type,
        chunks,
        sub_resources,
    })
}

fn check_binding(lb_id: &str, binding: &TargetGroupBinding) -> Result<()> {
    if binding.lb_id != lb_id {
        return Err(FlowError::InvalidParameter(format!(
            "target group {} is bound to load balancer {}, not {}",
            binding.target_group_id, binding.lb_id, lb_id
        )));
    }
    Ok(())
}

fn no_items(task_type: TaskType) -> FlowError {
    FlowError::InvalidParameter(format!("no items to {task_type}"))
}

fn target_ref(target: &Target) -> TargetRef {
    TargetRef {
        target_id: target.id.clone(),
        cloud_inst_id: target.cloud_inst_id.clone(),
        port: target.port,
    }
}

pub(crate) fn target_param(target: &Target) -> serde_json::Value {
    json!({
        "target_group_id": target.target_group_id,
        "target_id": target.id,
        "cloud_inst_id": target.cloud_inst_id,
        "ip": target.ip,
        "port": target.port,
        "weight": target.weight,
    })
}

pub(crate) fn spec_param(target_group_id: &str, spec: &TargetSpec) -> serde_json::Value {
    json!({
        "target_group_id": target_group_id,
        "cloud_inst_id": spec.cloud_inst_id,
        "ip": spec.ip,
        "port": spec.port,
        "weight": spec.weight,
    })
}

pub(crate) fn with_field(
    mut value: serde_json::Value,
    key: &str,
    field: serde_json::Value,
) -> serde_json::Value {
    if let Some(object) = value.as_object_mut() {
        object.insert(key.to_string(), field);
    }
    value
}
