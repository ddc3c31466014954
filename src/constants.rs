//! # System Constants
//!
//! Enums and well-known keys that define the operational vocabulary of the
//! orchestration core. Every enum is stored as snake_case text, both in
//! serialized payloads and in database columns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key under which the owning resource id is placed in a flow's shared context
pub const SHARE_DATA_RESOURCE_ID: &str = "lb_id";

/// Key under which the vendor is placed in a flow's shared context
pub const SHARE_DATA_VENDOR: &str = "vendor";

/// Key under which the cloud account is placed in a flow's shared context
pub const SHARE_DATA_ACCOUNT_ID: &str = "account_id";

/// Default source recorded on task management records
pub const DEFAULT_TASK_SOURCE: &str = "api";

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$($name::$variant),+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {s}", stringify!($name))),
                }
            }
        }
    };
}

/// Cloud vendor a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    TCloud,
    Aws,
    HuaWei,
    Azure,
    Gcp,
}

text_enum!(Vendor {
    TCloud => "t_cloud",
    Aws => "aws",
    HuaWei => "hua_wei",
    Azure => "azure",
    Gcp => "gcp",
});

/// Operation requested by an API-level batch, recorded on task management and
/// task management detail rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AddTarget,
    RemoveTarget,
    ModifyTargetWeight,
    ModifyTargetPort,
    DeleteListener,
    BindTargetGroup,
}

text_enum!(TaskType {
    AddTarget => "add_target",
    RemoveTarget => "remove_target",
    ModifyTargetWeight => "modify_target_weight",
    ModifyTargetPort => "modify_target_port",
    DeleteListener => "delete_listener",
    BindTargetGroup => "bind_target_group",
});

impl TaskType {
    pub fn flow_type(&self) -> FlowType {
        match self {
            TaskType::AddTarget => FlowType::AddTarget,
            TaskType::RemoveTarget => FlowType::RemoveTarget,
            TaskType::ModifyTargetWeight => FlowType::ModifyTargetWeight,
            TaskType::ModifyTargetPort => FlowType::ModifyTargetPort,
            TaskType::DeleteListener => FlowType::DeleteListener,
            TaskType::BindTargetGroup => FlowType::BindTargetGroup,
        }
    }

    pub fn lock_kind(&self) -> LockKind {
        match self {
            TaskType::AddTarget
            | TaskType::RemoveTarget
            | TaskType::ModifyTargetWeight
            | TaskType::ModifyTargetPort => LockKind::TargetGroupModify,
            TaskType::DeleteListener => LockKind::ListenerDelete,
            TaskType::BindTargetGroup => LockKind::TargetGroupBind,
        }
    }
}

/// Identifies which operation a flow performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    AddTarget,
    RemoveTarget,
    ModifyTargetWeight,
    ModifyTargetPort,
    DeleteListener,
    BindTargetGroup,
}

text_enum!(FlowType {
    AddTarget => "add_target",
    RemoveTarget => "remove_target",
    ModifyTargetWeight => "modify_target_weight",
    ModifyTargetPort => "modify_target_port",
    DeleteListener => "delete_listener",
    BindTargetGroup => "bind_target_group",
});

/// Executable routine that consumes a task's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    RegisterTargets,
    DeregisterTargets,
    ModifyTargetWeight,
    ModifyTargetPort,
    DeleteListeners,
    BindTargetGroupRule,
}

text_enum!(ActionName {
    RegisterTargets => "register_targets",
    DeregisterTargets => "deregister_targets",
    ModifyTargetWeight => "modify_target_weight",
    ModifyTargetPort => "modify_target_port",
    DeleteListeners => "delete_listeners",
    BindTargetGroupRule => "bind_target_group_rule",
});

/// Lifecycle of a task management detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailState {
    Pending,
    Success,
    Failed,
}

text_enum!(DetailState {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
});

impl DetailState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DetailState::Success | DetailState::Failed)
    }
}

/// Lifecycle of a flow as seen by this core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Persisted but not yet visible to the executor
    Init,
    /// Locked and eligible for execution
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

text_enum!(FlowState {
    Init => "init",
    Pending => "pending",
    Running => "running",
    Success => "success",
    Failed => "failed",
    Cancelled => "cancelled",
});

/// Kind of resource guarded by the exclusivity gate, also used for sub-flow
/// associations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    LoadBalancer,
    Listener,
    TargetGroup,
}

text_enum!(ResourceType {
    LoadBalancer => "load_balancer",
    Listener => "listener",
    TargetGroup => "target_group",
});

/// Which mutation is in progress on a locked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    TargetGroupModify,
    ListenerDelete,
    TargetGroupBind,
}

text_enum!(LockKind {
    TargetGroupModify => "target_group_modify",
    ListenerDelete => "listener_delete",
    TargetGroupBind => "target_group_bind",
});
