//! # Flow
//!
//! A flow is the persisted DAG of tasks built for one resource instance in
//! response to one operation. Tasks reference their predecessors by action
//! id; this core only ever builds linear chains, but the representation is a
//! general DAG so the executor does not need to know that.

use crate::constants::{ActionName, FlowState, FlowType};
use crate::models::task_params::TaskParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

/// Flow-unique, opaque task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric position of counter-issued ids
    pub fn sequence(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action id generator for one flow construction call.
///
/// The counter is a plain value: `issue` hands back the id together with the
/// advanced counter, so callers thread it explicitly through the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionIdCounter {
    next: u64,
    step: u64,
}

impl Default for ActionIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionIdCounter {
    pub const START: u64 = 1;
    pub const STEP: u64 = 1;

    pub fn new() -> Self {
        Self {
            next: Self::START,
            step: Self::STEP,
        }
    }

    /// Step must be non-zero, otherwise ids would repeat
    pub fn with_step(start: u64, step: u64) -> Self {
        Self {
            next: start,
            step: step.max(1),
        }
    }

    #[must_use]
    pub fn issue(self) -> (ActionId, Self) {
        let id = ActionId(self.next.to_string());
        (
            id,
            Self {
                next: self.next + self.step,
                step: self.step,
            },
        )
    }

    /// Number of ids issued so far
    pub fn issued(&self, start: u64) -> u64 {
        self.next.saturating_sub(start) / self.step
    }
}

/// Retry policy recorded on each task and honored by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_sleep_ms: u64,
    pub max_sleep_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_sleep_ms: 100,
            max_sleep_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn sleep_range_ms(&self) -> RangeInclusive<u64> {
        self.min_sleep_ms..=self.max_sleep_ms
    }
}

/// One DAG node inside a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTask {
    pub action_id: ActionId,
    pub action_name: ActionName,
    pub params: TaskParams,
    pub depends_on: Vec<ActionId>,
    pub retry: RetryPolicy,
}

impl FlowTask {
    /// The action name always follows the request variant
    pub fn new(
        action_id: ActionId,
        params: TaskParams,
        depends_on: Option<ActionId>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            action_name: params.request.action_name(),
            action_id,
            params,
            depends_on: depends_on.into_iter().collect(),
            retry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: i64,
    pub flow_type: FlowType,
    pub state: FlowState,
    pub share_data: BTreeMap<String, String>,
    pub tasks: Vec<FlowTask>,
    pub created_at: DateTime<Utc>,
}

impl Flow {
    pub fn task(&self, action_id: &ActionId) -> Option<&FlowTask> {
        self.tasks.iter().find(|t| &t.action_id == action_id)
    }

    /// Tasks with no predecessors
    pub fn root_tasks(&self) -> impl Iterator<Item = &FlowTask> {
        self.tasks.iter().filter(|t| t.depends_on.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFlow {
    pub flow_type: FlowType,
    pub share_data: BTreeMap<String, String>,
    pub tasks: Vec<FlowTask>,
}
