//! # Task Management Detail
//!
//! Per-item progress record. Every mutated target, listener or rule gets one
//! detail before any cloud call is planned. Details start `Pending`; the ones
//! bound to a task are resolved by the executor, all others are resolved
//! before flow construction returns.

use crate::constants::{DetailState, TaskType};
use crate::models::flow::ActionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManagementDetail {
    pub id: i64,
    pub task_management_id: i64,
    pub business_id: i64,
    pub task_type: TaskType,
    pub param: serde_json::Value,
    pub flow_id: Option<i64>,
    pub action_id: Option<ActionId>,
    pub state: DetailState,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskManagementDetail {
    /// Patch carrying the flow/action binding currently held in memory
    pub fn binding_patch(&self) -> DetailPatch {
        DetailPatch {
            id: self.id,
            flow_id: self.flow_id,
            action_id: self.action_id.clone(),
            ..DetailPatch::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskManagementDetail {
    pub task_management_id: i64,
    pub business_id: i64,
    pub task_type: TaskType,
    pub param: serde_json::Value,
}

/// Partial update of a detail; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailPatch {
    pub id: i64,
    pub flow_id: Option<i64>,
    pub action_id: Option<ActionId>,
    pub state: Option<DetailState>,
    pub reason: Option<String>,
}

impl DetailPatch {
    pub fn state(id: i64, state: DetailState, reason: Option<String>) -> Self {
        Self {
            id,
            state: Some(state),
            reason,
            ..Self::default()
        }
    }

    /// Apply to an in-memory copy
    pub fn apply(&self, detail: &mut TaskManagementDetail) {
        if let Some(flow_id) = self.flow_id {
            detail.flow_id = Some(flow_id);
        }
        if let Some(action_id) = &self.action_id {
            detail.action_id = Some(action_id.clone());
        }
        if let Some(state) = self.state {
            detail.state = state;
        }
        if let Some(reason) = &self.reason {
            detail.reason = Some(reason.clone());
        }
    }
}
