//! # Flow Assembler
//!
//! Persists a built chain as a flow and makes it visible, in this order:
//!
//! 1. create the flow (state `Init`) with its tasks and shared context
//! 2. stamp the flow id onto every detail of the construction
//! 3. persist the detail bindings (flow id + action id)
//! 4. register sub-flow associations for the sub-resources touched
//! 5. lock the owning resource through the gate
//! 6. move the flow from `Init` to `Pending`
//!
//! Consumers read detail → flow → lock in that order, so a reader that sees
//! the lock always finds the details. A flow whose lock fails stays `Init`
//! and is never picked up by the executor.

use crate::constants::{
    FlowState, FlowType, LockKind, ResourceType, Vendor, SHARE_DATA_ACCOUNT_ID,
    SHARE_DATA_RESOURCE_ID, SHARE_DATA_VENDOR,
};
use crate::error::{FlowError, Result};
use crate::models::{Flow, FlowTask, NewFlow, SubFlowRelation, TaskManagementDetail};
use crate::orchestration::context::BuildContext;
use crate::orchestration::detail_factory::TaskDetailFactory;
use crate::orchestration::resource_gate::ResourceGate;
use crate::storage::Storage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// A sub-resource touched by a flow, e.g. a target group or a listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubResource {
    pub resource_id: String,
    pub resource_type: ResourceType,
}

impl SubResource {
    pub fn new(resource_id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_type,
        }
    }
}

/// Everything the assembler needs besides the details
#[derive(Debug, Clone)]
pub struct FlowDraft {
    pub flow_type: FlowType,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub lock_kind: LockKind,
    pub vendor: Vendor,
    pub account_id: String,
    pub tasks: Vec<FlowTask>,
    pub sub_resources: Vec<SubResource>,
}

impl FlowDraft {
    fn share_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SHARE_DATA_RESOURCE_ID.to_string(), self.resource_id.clone()),
            (SHARE_DATA_VENDOR.to_string(), self.vendor.to_string()),
            (SHARE_DATA_ACCOUNT_ID.to_string(), self.account_id.clone()),
        ])
    }
}

#[derive(Clone)]
pub struct FlowAssembler {
    storage: Arc<dyn Storage>,
    gate: ResourceGate,
    factory: TaskDetailFactory,
}

impl std::fmt::Debug for FlowAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowAssembler")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl FlowAssembler {
    pub fn new(storage: Arc<dyn Storage>, gate: ResourceGate, factory: TaskDetailFactory) -> Self {
        Self {
            storage,
            gate,
            factory,
        }
    }

    /// Persist `draft` as a flow and lock its resource. `details` are the
    /// in-memory details of this construction; they come back bound to the
    /// flow even when a later step fails.
    #[instrument(skip_all, fields(
        request_id = %ctx.request_id(),
        resource_id = %draft.resource_id,
        flow_type = %draft.flow_type,
    ))]
    pub async fn assemble(
        &self,
        ctx: &BuildContext,
        draft: FlowDraft,
        details: &mut [TaskManagementDetail],
    ) -> Result<Flow> {
        if draft.tasks.is_empty() {
            return Err(FlowError::InvalidParameter(
                "cannot assemble a flow without tasks".to_string(),
            ));
        }

        let new_flow = NewFlow {
            flow_type: draft.flow_type,
            share_data: draft.share_data(),
            tasks: draft.tasks.clone(),
        };
        let mut flow = ctx.run("create_flow", self.storage.create_flow(new_flow)).await?;

        TaskDetailFactory::bind_to_flow(details, flow.id);
        self.factory.persist_bindings(ctx, details).await?;

        let sub_flows: Vec<SubFlowRelation> = draft
            .sub_resources
            .iter()
            .map(|sub| SubFlowRelation {
                flow_id: flow.id,
                resource_id: sub.resource_id.clone(),
                resource_type: sub.resource_type,
            })
            .collect();
        ctx.run(
            "create_sub_flow_relations",
            self.storage.create_sub_flow_relations(sub_flows),
        )
        .await?;

        self.gate
            .lock(
                ctx,
                &draft.resource_id,
                draft.resource_type,
                flow.id,
                draft.lock_kind,
            )
            .await?;

        let activated = ctx
            .run(
                "cas_flow_state",
                self.storage
                    .cas_flow_state(flow.id, FlowState::Init, FlowState::Pending),
            )
            .await?;
        if !activated {
            return Err(FlowError::Aborted(format!(
                "flow {} left the init state before activation",
                flow.id
            )));
        }
        flow.state = FlowState::Pending;

        info!(
            flow_id = flow.id,
            task_count = flow.tasks.len(),
            detail_count = details.len(),
            "Assembled flow"
        );
        Ok(flow)
    }
}
