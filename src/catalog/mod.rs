//! # Resource Catalog
//!
//! Read side of the load balancer inventory, used to turn raw request ids
//! into full records, plus the local-only writes needed by the "not yet
//! bound" path: resources that were never pushed to the cloud are changed in
//! the database directly, without a flow.

pub mod memory;

use crate::error::Result;
use crate::models::{
    Listener, LoadBalancer, NewTarget, Target, TargetGroup, TargetGroupBinding, TargetPatch,
};
use async_trait::async_trait;

pub use memory::InMemoryCatalog;

#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn get_load_balancer(&self, lb_id: &str) -> Result<Option<LoadBalancer>>;

    async fn get_target_group(&self, target_group_id: &str) -> Result<Option<TargetGroup>>;

    /// `None` when the target group is not attached to any listener or rule
    async fn find_target_group_binding(
        &self,
        target_group_id: &str,
    ) -> Result<Option<TargetGroupBinding>>;

    /// Missing ids are omitted from the result
    async fn list_targets(&self, target_ids: &[String]) -> Result<Vec<Target>>;

    async fn list_targets_by_group(&self, target_group_id: &str) -> Result<Vec<Target>>;

    /// Missing ids are omitted from the result
    async fn list_listeners(&self, listener_ids: &[String]) -> Result<Vec<Listener>>;

    async fn create_targets(&self, targets: Vec<NewTarget>) -> Result<Vec<Target>>;

    async fn update_targets(&self, patches: &[TargetPatch]) -> Result<()>;

    async fn delete_targets(&self, target_ids: &[String]) -> Result<()>;
}
