//! # Orchestration Core
//!
//! Turns one batch request into trackable task management details, a linear
//! chain of retryable tasks persisted as a flow, and an exclusivity lock on
//! the resource the flow mutates. Executing the flow is someone else's job.
//!
//! ## Core Components
//!
//! - **ResourceGate**: pre-flight check and conditional lock of a
//!   (resource id, resource type) pair against a single owning flow
//! - **TaskDetailFactory**: one detail per mutated item, created before any
//!   cloud call is planned, plus action/flow binding
//! - **ChainBuilder**: chunk-per-task chain under the cloud batch limit with
//!   strictly increasing action ids
//! - **FlowAssembler**: persists the flow, binds details, registers sub-flow
//!   associations, locks the resource and activates the flow
//! - **FailureUnwind**: best-effort compensation marking the details of a
//!   failed attempt `Failed`
//! - **FlowBuilder**: one `build_*_flow` entry point per operation
//! - **LocalResolver**: DB-only path for target groups never pushed to the
//!   cloud
//! - **BatchRequestProcessor**: request-level driver, one flow per load
//!   balancer
//!
//! Data flows top-down:
//!
//! ```text
//! BatchRequestProcessor
//!   ├─► LocalResolver (unbound target groups)
//!   └─► FlowBuilder (one per load balancer)
//!         ResourceGate ─► ChainBuilder ─► FlowAssembler ─► Flow
//!                              └──────────┴─► FailureUnwind (error paths)
//! ```

pub mod chain_builder;
pub mod context;
pub mod detail_factory;
pub mod failure_unwind;
pub mod flow_assembler;
pub mod flow_builder;
pub mod local_resolver;
pub mod plans;
pub mod request_processor;
pub mod resource_gate;

// Re-export core types and components for easy access
pub use chain_builder::{
    chunk_count, ensure_unique, split_into_chunks, Chain, ChainBuilder, PlannedChunk,
};
pub use context::BuildContext;
pub use detail_factory::{DetailScope, TaskDetailFactory};
pub use failure_unwind::FailureUnwind;
pub use flow_assembler::{FlowAssembler, FlowDraft, SubResource};
pub use flow_builder::{FlowBuildResult, FlowBuilder, FlowScope};
pub use local_resolver::{LocalResolver, TargetChange};
pub use plans::{BoundSpecs, BoundTargets, FlowPlan};
pub use request_processor::{
    BatchOperation, BatchRequest, BatchRequestProcessor, BatchSubmission, ResourceFailure,
};
pub use resource_gate::ResourceGate;
