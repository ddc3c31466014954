//! In-memory resource catalog for tests and local development.

use super::ResourceCatalog;
use crate::error::{FlowError, Result};
use crate::models::{
    Listener, LoadBalancer, NewTarget, Target, TargetGroup, TargetGroupBinding, TargetPatch,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    load_balancers: DashMap<String, LoadBalancer>,
    target_groups: DashMap<String, TargetGroup>,
    bindings: DashMap<String, TargetGroupBinding>,
    targets: DashMap<String, Target>,
    listeners: DashMap<String, Listener>,
    target_seq: AtomicU64,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_load_balancer(&self, lb: LoadBalancer) {
        self.load_balancers.insert(lb.id.clone(), lb);
    }

    pub fn insert_target_group(&self, tg: TargetGroup) {
        self.target_groups.insert(tg.id.clone(), tg);
    }

    pub fn insert_binding(&self, binding: TargetGroupBinding) {
        self.bindings
            .insert(binding.target_group_id.clone(), binding);
    }

    pub fn insert_target(&self, target: Target) {
        self.targets.insert(target.id.clone(), target);
    }

    pub fn insert_listener(&self, listener: Listener) {
        self.listeners.insert(listener.id.clone(), listener);
    }

    pub fn target(&self, target_id: &str) -> Option<Target> {
        self.targets.get(target_id).map(|t| t.value().clone())
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryCatalog {
    async fn get_load_balancer(&self, lb_id: &str) -> Result<Option<LoadBalancer>> {
        Ok(self.load_balancers.get(lb_id).map(|lb| lb.value().clone()))
    }

    async fn get_target_group(&self, target_group_id: &str) -> Result<Option<TargetGroup>> {
        Ok(self
            .target_groups
            .get(target_group_id)
            .map(|tg| tg.value().clone()))
    }

    async fn find_target_group_binding(
        &self,
        target_group_id: &str,
    ) -> Result<Option<TargetGroupBinding>> {
        Ok(self
            .bindings
            .get(target_group_id)
            .map(|b| b.value().clone()))
    }

    async fn list_targets(&self, target_ids: &[String]) -> Result<Vec<Target>> {
        Ok(target_ids
            .iter()
            .filter_map(|id| self.targets.get(id).map(|t| t.value().clone()))
            .collect())
    }

    async fn list_targets_by_group(&self, target_group_id: &str) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = self
            .targets
            .iter()
            .filter(|t| t.target_group_id == target_group_id)
            .map(|t| t.value().clone())
            .collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(targets)
    }

    async fn list_listeners(&self, listener_ids: &[String]) -> Result<Vec<Listener>> {
        Ok(listener_ids
            .iter()
            .filter_map(|id| self.listeners.get(id).map(|l| l.value().clone()))
            .collect())
    }

    async fn create_targets(&self, targets: Vec<NewTarget>) -> Result<Vec<Target>> {
        let created: Vec<Target> = targets
            .into_iter()
            .map(|new| Target {
                id: format!("target-{}", self.target_seq.fetch_add(1, Ordering::SeqCst) + 1),
                target_group_id: new.target_group_id,
                cloud_inst_id: new.cloud_inst_id,
                ip: new.ip,
                port: new.port,
                weight: new.weight,
            })
            .collect();

        for target in &created {
            self.targets.insert(target.id.clone(), target.clone());
        }
        Ok(created)
    }

    async fn update_targets(&self, patches: &[TargetPatch]) -> Result<()> {
        for patch in patches {
            let mut target = self
                .targets
                .get_mut(&patch.id)
                .ok_or_else(|| FlowError::RecordNotFound(format!("target {}", patch.id)))?;
            if let Some(port) = patch.port {
                target.port = port;
            }
            if let Some(weight) = patch.weight {
                target.weight = weight;
            }
        }
        Ok(())
    }

    async fn delete_targets(&self, target_ids: &[String]) -> Result<()> {
        for id in target_ids {
            self.targets.remove(id);
        }
        Ok(())
    }
}
