//! In-memory storage implementation for testing.
//!
//! Ids come from per-table sequences starting at 1, so tests can predict
//! them. Failure injection lets tests fail a chosen operation to drive the
//! error paths of flow construction.
//!
//! ## Limitations
//!
//! - No durability and no cross-process coordination
//! - Not suitable for production

use super::{RelationInsert, Storage};
use crate::constants::{DetailState, FlowState, ResourceType};
use crate::error::{FlowError, Result};
use crate::models::{
    DetailPatch, Flow, NewFlow, NewResourceFlowRelation, NewTaskManagement,
    NewTaskManagementDetail, ResourceFlowRelation, SubFlowRelation, TaskManagement,
    TaskManagementDetail,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Storage operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    CreateTaskManagement,
    AttachFlows,
    CreateTaskDetails,
    UpdateTaskDetails,
    CreateFlow,
    CasFlowState,
    FindResourceRelation,
    CreateResourceRelation,
    CreateSubFlowRelations,
}

#[derive(Debug, Clone)]
struct FailureRule {
    /// Fail only this call (1-based); `None` fails every call
    nth_call: Option<usize>,
    message: String,
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    task_managements: RwLock<HashMap<i64, TaskManagement>>,
    details: RwLock<BTreeMap<i64, TaskManagementDetail>>,
    flows: RwLock<HashMap<i64, Flow>>,
    relations: DashMap<(String, ResourceType), ResourceFlowRelation>,
    sub_flows: RwLock<HashSet<SubFlowRelation>>,
    task_management_seq: AtomicI64,
    detail_seq: AtomicI64,
    flow_seq: AtomicI64,
    failures: Mutex<HashMap<StorageOp, FailureRule>>,
    calls: Mutex<HashMap<StorageOp, usize>>,
    stale_relation_reads: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail with `message`
    pub fn fail_on(&self, op: StorageOp, message: impl Into<String>) {
        self.failures.lock().insert(
            op,
            FailureRule {
                nth_call: None,
                message: message.into(),
            },
        );
    }

    /// Make only the `n`-th call (1-based) of `op` fail with `message`
    pub fn fail_nth(&self, op: StorageOp, n: usize, message: impl Into<String>) {
        self.failures.lock().insert(
            op,
            FailureRule {
                nth_call: Some(n),
                message: message.into(),
            },
        );
    }

    /// Make `find_resource_relation` report every resource as free, like a
    /// read taken just before another flow locked it. Locking still sees the
    /// real owner.
    pub fn set_stale_relation_reads(&self, stale: bool) {
        self.stale_relation_reads.store(stale, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn call_count(&self, op: StorageOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn detail_count(&self) -> usize {
        self.details.read().len()
    }

    pub fn flow_count(&self) -> usize {
        self.flows.read().len()
    }

    pub fn all_details(&self) -> Vec<TaskManagementDetail> {
        self.details.read().values().cloned().collect()
    }

    pub fn details_in_state(&self, state: DetailState) -> Vec<TaskManagementDetail> {
        self.details
            .read()
            .values()
            .filter(|d| d.state == state)
            .cloned()
            .collect()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    fn check(&self, op: StorageOp) -> Result<()> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(op).or_insert(0);
            *count += 1;
            *count
        };

        let failures = self.failures.lock();
        match failures.get(&op) {
            Some(rule) if rule.nth_call.map_or(true, |n| n == call) => {
                Err(FlowError::Aborted(rule.message.clone()))
            }
            _ => Ok(()),
        }
    }

    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_task_management(&self, new: NewTaskManagement) -> Result<TaskManagement> {
        self.check(StorageOp::CreateTaskManagement)?;

        let record = TaskManagement {
            id: Self::next_id(&self.task_management_seq),
            business_id: new.business_id,
            vendor: new.vendor,
            account_id: new.account_id,
            source: new.source,
            task_type: new.task_type,
            flow_ids: Vec::new(),
            created_at: Utc::now(),
        };
        self.task_managements
            .write()
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_task_management(&self, id: i64) -> Result<Option<TaskManagement>> {
        Ok(self.task_managements.read().get(&id).cloned())
    }

    async fn attach_flows(&self, task_management_id: i64, flow_ids: &[i64]) -> Result<()> {
        self.check(StorageOp::AttachFlows)?;

        let mut records = self.task_managements.write();
        let record = records.get_mut(&task_management_id).ok_or_else(|| {
            FlowError::RecordNotFound(format!("task management {task_management_id}"))
        })?;
        record.flow_ids = flow_ids.to_vec();
        Ok(())
    }

    async fn create_task_details(
        &self,
        details: Vec<NewTaskManagementDetail>,
    ) -> Result<Vec<TaskManagementDetail>> {
        if details.is_empty() {
            return Ok(Vec::new());
        }
        self.check(StorageOp::CreateTaskDetails)?;

        let now = Utc::now();
        let created: Vec<TaskManagementDetail> = details
            .into_iter()
            .map(|new| TaskManagementDetail {
                id: Self::next_id(&self.detail_seq),
                task_management_id: new.task_management_id,
                business_id: new.business_id,
                task_type: new.task_type,
                param: new.param,
                flow_id: None,
                action_id: None,
                state: DetailState::Pending,
                reason: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let mut table = self.details.write();
        for detail in &created {
            table.insert(detail.id, detail.clone());
        }
        Ok(created)
    }

    async fn list_task_details(
        &self,
        task_management_id: i64,
    ) -> Result<Vec<TaskManagementDetail>> {
        Ok(self
            .details
            .read()
            .values()
            .filter(|d| d.task_management_id == task_management_id)
            .cloned()
            .collect())
    }

    async fn update_task_details(&self, patches: &[DetailPatch]) -> Result<()> {
        if patches.is_empty() {
            return Ok(());
        }
        self.check(StorageOp::UpdateTaskDetails)?;

        let now = Utc::now();
        let mut table = self.details.write();
        for patch in patches {
            if let Some(detail) = table.get_mut(&patch.id) {
                patch.apply(detail);
                detail.updated_at = now;
            }
        }
        Ok(())
    }

    async fn create_flow(&self, flow: NewFlow) -> Result<Flow> {
        self.check(StorageOp::CreateFlow)?;

        let record = Flow {
            id: Self::next_id(&self.flow_seq),
            flow_type: flow.flow_type,
            state: FlowState::Init,
            share_data: flow.share_data,
            tasks: flow.tasks,
            created_at: Utc::now(),
        };
        self.flows.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_flow(&self, flow_id: i64) -> Result<Option<Flow>> {
        Ok(self.flows.read().get(&flow_id).cloned())
    }

    async fn cas_flow_state(
        &self,
        flow_id: i64,
        expected: FlowState,
        target: FlowState,
    ) -> Result<bool> {
        self.check(StorageOp::CasFlowState)?;

        let mut flows = self.flows.write();
        match flows.get_mut(&flow_id) {
            Some(flow) if flow.state == expected => {
                flow.state = target;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_resource_relation(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<Option<ResourceFlowRelation>> {
        self.check(StorageOp::FindResourceRelation)?;
        if self.stale_relation_reads.load(Ordering::SeqCst) {
            return Ok(None);
        }

        Ok(self
            .relations
            .get(&(resource_id.to_string(), resource_type))
            .map(|entry| entry.value().clone()))
    }

    async fn try_create_resource_relation(
        &self,
        relation: NewResourceFlowRelation,
    ) -> Result<RelationInsert> {
        self.check(StorageOp::CreateResourceRelation)?;

        let key = (relation.resource_id.clone(), relation.resource_type);
        match self.relations.entry(key) {
            Entry::Occupied(existing) => Ok(RelationInsert::Conflict(existing.get().clone())),
            Entry::Vacant(slot) => {
                let created = ResourceFlowRelation {
                    resource_id: relation.resource_id,
                    resource_type: relation.resource_type,
                    flow_id: relation.flow_id,
                    lock_kind: relation.lock_kind,
                    created_at: Utc::now(),
                };
                slot.insert(created.clone());
                Ok(RelationInsert::Created(created))
            }
        }
    }

    async fn delete_resource_relation(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        flow_id: i64,
    ) -> Result<bool> {
        let removed = self
            .relations
            .remove_if(&(resource_id.to_string(), resource_type), |_, relation| {
                relation.flow_id == flow_id
            });
        Ok(removed.is_some())
    }

    async fn create_sub_flow_relations(&self, relations: Vec<SubFlowRelation>) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }
        self.check(StorageOp::CreateSubFlowRelations)?;

        self.sub_flows.write().extend(relations);
        Ok(())
    }

    async fn list_sub_flow_relations(&self, flow_id: i64) -> Result<Vec<SubFlowRelation>> {
        let mut relations: Vec<SubFlowRelation> = self
            .sub_flows
            .read()
            .iter()
            .filter(|r| r.flow_id == flow_id)
            .cloned()
            .collect();
        relations.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(relations)
    }
}
