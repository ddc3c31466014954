//! Load balancer domain records as returned by the resource catalog.

use crate::constants::Vendor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub cloud_id: String,
    pub vendor: Vendor,
    pub account_id: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub cloud_id: String,
    pub lb_id: String,
    pub protocol: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub id: String,
    pub name: String,
    pub vendor: Vendor,
    pub account_id: String,
}

/// Where a target group is attached on the cloud side. A target group without
/// a binding has never been pushed to the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupBinding {
    pub target_group_id: String,
    pub lb_id: String,
    pub lb_cloud_id: String,
    pub listener_id: String,
    pub listener_cloud_id: String,
    /// Layer-7 listeners bind through a rule
    pub rule_cloud_id: Option<String>,
}

/// A backend instance registered in a target group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub target_group_id: String,
    pub cloud_inst_id: String,
    pub ip: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTarget {
    pub target_group_id: String,
    pub cloud_inst_id: String,
    pub ip: String,
    pub port: u16,
    pub weight: u32,
}

/// Local-only change applied to a target that was never pushed to the cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPatch {
    pub id: String,
    pub port: Option<u16>,
    pub weight: Option<u32>,
}
