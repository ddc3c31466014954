//! # Task Management
//!
//! One record per incoming API-level batch request. Created before any flow
//! is built and updated once with the ids of every flow built for the request.

use crate::constants::{TaskType, Vendor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManagement {
    pub id: i64,
    pub business_id: i64,
    pub vendor: Vendor,
    pub account_id: String,
    pub source: String,
    pub task_type: TaskType,
    pub flow_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskManagement {
    pub business_id: i64,
    pub vendor: Vendor,
    pub account_id: String,
    pub source: String,
    pub task_type: TaskType,
}
