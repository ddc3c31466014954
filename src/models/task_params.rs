//! # Task Parameters
//!
//! The payload stored on every flow task. The envelope carries what every
//! executor routine needs (vendor and the owning detail ids, so detail state
//! can be updated by id alone); the request is a tagged variant keyed by the
//! action name, so the executor dispatches on it exhaustively.

use crate::constants::{ActionName, Vendor};
use crate::models::resources::TargetGroupBinding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    pub vendor: Vendor,
    pub detail_ids: Vec<i64>,
    pub request: CloudRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum CloudRequest {
    RegisterTargets(RegisterTargetsRequest),
    DeregisterTargets(DeregisterTargetsRequest),
    ModifyTargetWeight(ModifyTargetWeightRequest),
    ModifyTargetPort(ModifyTargetPortRequest),
    DeleteListeners(DeleteListenersRequest),
    BindTargetGroupRule(BindTargetGroupRuleRequest),
}

impl CloudRequest {
    pub fn action_name(&self) -> ActionName {
        match self {
            CloudRequest::RegisterTargets(_) => ActionName::RegisterTargets,
            CloudRequest::DeregisterTargets(_) => ActionName::DeregisterTargets,
            CloudRequest::ModifyTargetWeight(_) => ActionName::ModifyTargetWeight,
            CloudRequest::ModifyTargetPort(_) => ActionName::ModifyTargetPort,
            CloudRequest::DeleteListeners(_) => ActionName::DeleteListeners,
            CloudRequest::BindTargetGroupRule(_) => ActionName::BindTargetGroupRule,
        }
    }

    /// Number of cloud items the request carries
    pub fn item_count(&self) -> usize {
        match self {
            CloudRequest::RegisterTargets(r) => r.targets.len(),
            CloudRequest::DeregisterTargets(r) => r.targets.len(),
            CloudRequest::ModifyTargetWeight(r) => r.targets.len(),
            CloudRequest::ModifyTargetPort(r) => r.targets.len(),
            CloudRequest::DeleteListeners(r) => r.listeners.len(),
            CloudRequest::BindTargetGroupRule(_) => 1,
        }
    }
}

/// Existing target addressed by a cloud call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub target_id: String,
    pub cloud_inst_id: String,
    pub port: u16,
}

/// Target to be created on the cloud side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub cloud_inst_id: String,
    pub ip: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRef {
    pub listener_id: String,
    pub cloud_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterTargetsRequest {
    pub binding: TargetGroupBinding,
    pub targets: Vec<TargetSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeregisterTargetsRequest {
    pub binding: TargetGroupBinding,
    pub targets: Vec<TargetRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyTargetWeightRequest {
    pub binding: TargetGroupBinding,
    pub new_weight: u32,
    pub targets: Vec<TargetRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyTargetPortRequest {
    pub binding: TargetGroupBinding,
    pub new_port: u16,
    pub targets: Vec<TargetRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteListenersRequest {
    pub lb_cloud_id: String,
    pub listeners: Vec<ListenerRef>,
}

/// Attaches a target group to a listener rule. The group's targets are
/// registered by the `RegisterTargets` tasks chained after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindTargetGroupRuleRequest {
    pub binding: TargetGroupBinding,
}
