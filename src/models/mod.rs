pub mod flow;
pub mod resource_flow_relation;
pub mod resources;
pub mod task_management;
pub mod task_management_detail;
pub mod task_params;

// Re-export core models for easy access
pub use flow::{ActionId, ActionIdCounter, Flow, FlowTask, NewFlow, RetryPolicy};
pub use resource_flow_relation::{NewResourceFlowRelation, ResourceFlowRelation, SubFlowRelation};
pub use resources::{
    Listener, LoadBalancer, NewTarget, Target, TargetGroup, TargetGroupBinding, TargetPatch,
};
pub use task_management::{NewTaskManagement, TaskManagement};
pub use task_management_detail::{DetailPatch, NewTaskManagementDetail, TaskManagementDetail};
pub use task_params::{
    BindTargetGroupRuleRequest, CloudRequest, DeleteListenersRequest, DeregisterTargetsRequest,
    ListenerRef, ModifyTargetPortRequest, ModifyTargetWeightRequest, RegisterTargetsRequest,
    TargetRef, TargetSpec, TaskParams,
};
