//! # Storage
//!
//! Persistence seam for the orchestration core. Every write the core performs
//! goes through [`Storage`]; there is no cross-call transaction, so each
//! method is its own durability boundary.
//!
//! Two implementations ship with the crate:
//! - [`memory::InMemoryStorage`] for tests and local development
//! - [`postgres::PgStorage`] for production, backed by SQLx
//!
//! The resource relation table is the only state shared between concurrent
//! requests. Its insert is conditional: [`Storage::try_create_resource_relation`]
//! either creates the relation or reports the current owner, and that single
//! write is the atomicity boundary of the exclusivity lock.

pub mod memory;
pub mod postgres;

use crate::constants::{FlowState, ResourceType};
use crate::error::Result;
use crate::models::{
    DetailPatch, Flow, NewFlow, NewResourceFlowRelation, NewTaskManagement,
    NewTaskManagementDetail, ResourceFlowRelation, SubFlowRelation, TaskManagement,
    TaskManagementDetail,
};
use async_trait::async_trait;

pub use memory::InMemoryStorage;
pub use postgres::PgStorage;

/// Outcome of a conditional relation insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationInsert {
    Created(ResourceFlowRelation),
    /// Another flow already owns the resource
    Conflict(ResourceFlowRelation),
}

impl RelationInsert {
    pub fn is_created(&self) -> bool {
        matches!(self, RelationInsert::Created(_))
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    // --- Task management ---

    async fn create_task_management(&self, new: NewTaskManagement) -> Result<TaskManagement>;

    async fn get_task_management(&self, id: i64) -> Result<Option<TaskManagement>>;

    /// Record the flows built for a request. Replaces the stored list.
    async fn attach_flows(&self, task_management_id: i64, flow_ids: &[i64]) -> Result<()>;

    // --- Task management details ---

    /// Create details in the given order; returned ids are storage-assigned
    async fn create_task_details(
        &self,
        details: Vec<NewTaskManagementDetail>,
    ) -> Result<Vec<TaskManagementDetail>>;

    async fn list_task_details(&self, task_management_id: i64)
        -> Result<Vec<TaskManagementDetail>>;

    async fn update_task_details(&self, patches: &[DetailPatch]) -> Result<()>;

    // --- Flows ---

    /// Persist a flow and all of its tasks; the flow starts in `Init`
    async fn create_flow(&self, flow: NewFlow) -> Result<Flow>;

    async fn get_flow(&self, flow_id: i64) -> Result<Option<Flow>>;

    /// Compare-and-swap the flow state. Returns `false` when the flow is
    /// missing or not in `expected`.
    async fn cas_flow_state(&self, flow_id: i64, expected: FlowState, target: FlowState)
        -> Result<bool>;

    // --- Resource exclusivity ---

    async fn find_resource_relation(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<Option<ResourceFlowRelation>>;

    async fn try_create_resource_relation(
        &self,
        relation: NewResourceFlowRelation,
    ) -> Result<RelationInsert>;

    /// Delete the relation only if `flow_id` owns it
    async fn delete_resource_relation(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        flow_id: i64,
    ) -> Result<bool>;

    // --- Sub-flow associations ---

    async fn create_sub_flow_relations(&self, relations: Vec<SubFlowRelation>) -> Result<()>;

    async fn list_sub_flow_relations(&self, flow_id: i64) -> Result<Vec<SubFlowRelation>>;
}
