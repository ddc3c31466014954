//! # Resource Flow Relation
//!
//! Exclusivity record tying one (resource id, resource type) pair to the one
//! flow currently allowed to mutate it. At most one relation exists per pair;
//! storage enforces this with a unique key and an insert-or-fail write.

use crate::constants::{LockKind, ResourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFlowRelation {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub flow_id: i64,
    pub lock_kind: LockKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResourceFlowRelation {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub flow_id: i64,
    pub lock_kind: LockKind,
}

/// Secondary association between a flow and a sub-resource it touches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubFlowRelation {
    pub flow_id: i64,
    pub resource_id: String,
    pub resource_type: ResourceType,
}
