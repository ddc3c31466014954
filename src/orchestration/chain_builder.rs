//! # Dependency Chain Builder
//!
//! Turns planned chunks into a strict linear chain of tasks. Every chunk is
//! one cloud call: its details are created first, then it gets the next
//! action id from the flow's counter, and its task depends on the previous
//! chunk's task only.
//!
//! ```text
//! chunk 1 ──► chunk 2 ──► chunk 3
//! (500)       (500)       (200)
//! ```
//!
//! Chunks of one flow never run in parallel even when the cloud calls are
//! independent; the chain keeps the flow under per-second rate limits and
//! gives operators a single execution order.

use crate::constants::Vendor;
use crate::error::{FlowError, Result};
use crate::models::{
    ActionId, ActionIdCounter, CloudRequest, FlowTask, RetryPolicy, TaskManagementDetail,
    TaskParams,
};
use crate::orchestration::context::BuildContext;
use crate::orchestration::detail_factory::{DetailScope, TaskDetailFactory};
use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;
use tracing::debug;

/// One cloud-call-sized unit of work, planned but not yet written
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChunk {
    /// One entry per item; each becomes a task management detail
    pub detail_params: Vec<serde_json::Value>,
    pub request: CloudRequest,
}

impl PlannedChunk {
    pub fn len(&self) -> usize {
        self.detail_params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detail_params.is_empty()
    }
}

/// Split `items` into consecutive slices of at most `max_size` items. A zero
/// limit is treated as one item per chunk.
pub fn split_into_chunks<T>(items: &[T], max_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(max_size.max(1))
}

/// Number of chunks `split_into_chunks` yields for `len` items
pub fn chunk_count(len: usize, max_size: usize) -> usize {
    len.div_ceil(max_size.max(1))
}

/// Fail with `RecordDuplicated` when two items of one chunk share a key. The
/// cloud API rejects a batch naming the same instance twice.
pub fn ensure_unique<T, K, F>(chunk: &[T], label: &str, key: F) -> Result<()>
where
    K: Eq + Hash + Display,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::with_capacity(chunk.len());
    for item in chunk {
        let k = key(item);
        if seen.contains(&k) {
            return Err(FlowError::RecordDuplicated(format!(
                "{label} {k} appears more than once in one batch"
            )));
        }
        seen.insert(k);
    }
    Ok(())
}

/// Tasks and details produced by a finished chain
#[derive(Debug, Clone)]
pub struct Chain {
    pub tasks: Vec<FlowTask>,
    pub details: Vec<TaskManagementDetail>,
    pub counter: ActionIdCounter,
}

#[derive(Debug)]
pub struct ChainBuilder {
    factory: TaskDetailFactory,
    scope: DetailScope,
    vendor: Vendor,
    retry: RetryPolicy,
    counter: ActionIdCounter,
    last_action_id: Option<ActionId>,
    tasks: Vec<FlowTask>,
    details: Vec<TaskManagementDetail>,
}

impl ChainBuilder {
    pub fn new(
        factory: TaskDetailFactory,
        scope: DetailScope,
        vendor: Vendor,
        retry: RetryPolicy,
    ) -> Self {
        Self::with_counter(factory, scope, vendor, retry, ActionIdCounter::new())
    }

    pub fn with_counter(
        factory: TaskDetailFactory,
        scope: DetailScope,
        vendor: Vendor,
        retry: RetryPolicy,
        counter: ActionIdCounter,
    ) -> Self {
        Self {
            factory,
            scope,
            vendor,
            retry,
            counter,
            last_action_id: None,
            tasks: Vec::new(),
            details: Vec::new(),
        }
    }

    /// Append one chunk to the chain and return its task
    pub async fn push_chunk(&mut self, ctx: &BuildContext, chunk: PlannedChunk) -> Result<&FlowTask> {
        let mut details = self
            .factory
            .create_details(ctx, &self.scope, chunk.detail_params)
            .await?;

        let (action_id, counter) = self.counter.issue();
        self.counter = counter;

        let params = TaskParams {
            vendor: self.vendor,
            detail_ids: details.iter().map(|d| d.id).collect(),
            request: chunk.request,
        };
        let depends_on = self.last_action_id.replace(action_id.clone());
        let task = FlowTask::new(action_id.clone(), params, depends_on, self.retry);

        TaskDetailFactory::bind_to_action(&mut details, &action_id);

        debug!(
            action_id = %action_id,
            action_name = %task.action_name,
            detail_count = details.len(),
            depends_on = ?task.depends_on,
            "Chained task"
        );

        self.details.extend(details);
        self.tasks.push(task);
        Ok(&self.tasks[self.tasks.len() - 1])
    }

    /// Append chunks in order; stops at the first failure
    pub async fn push_chunks(
        &mut self,
        ctx: &BuildContext,
        chunks: impl IntoIterator<Item = PlannedChunk>,
    ) -> Result<()> {
        for chunk in chunks {
            self.push_chunk(ctx, chunk).await?;
        }
        Ok(())
    }

    pub fn tasks(&self) -> &[FlowTask] {
        &self.tasks
    }

    /// Every detail created so far, including those of a failed push
    /// sequence; these are what Failure Unwind must resolve
    pub fn details(&self) -> &[TaskManagementDetail] {
        &self.details
    }

    pub fn details_mut(&mut self) -> &mut [TaskManagementDetail] {
        &mut self.details
    }

    /// Remove the built tasks, keeping the details for unwind
    pub fn take_tasks(&mut self) -> Vec<FlowTask> {
        std::mem::take(&mut self.tasks)
    }

    pub fn finish(self) -> Chain {
        Chain {
            tasks: self.tasks,
            details: self.details,
            counter: self.counter,
        }
    }
}
