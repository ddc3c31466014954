//! Test harness and catalog seeding helpers shared by the integration tests.

use lbflow_core::catalog::InMemoryCatalog;
use lbflow_core::config::FlowConfig;
use lbflow_core::constants::Vendor;
use lbflow_core::models::{Listener, LoadBalancer, Target, TargetGroup, TargetGroupBinding};
use lbflow_core::orchestration::{BatchOperation, BatchRequest, BatchRequestProcessor};
use lbflow_core::storage::InMemoryStorage;
use std::sync::Arc;

pub const VENDOR: Vendor = Vendor::TCloud;
pub const ACCOUNT: &str = "acct-test";
pub const BUSINESS_ID: i64 = 2005;

/// In-memory storage and catalog wired into a request processor
pub struct Harness {
    pub storage: Arc<InMemoryStorage>,
    pub catalog: Arc<InMemoryCatalog>,
    pub processor: BatchRequestProcessor,
    pub config: FlowConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    pub fn with_config(config: FlowConfig) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let processor = BatchRequestProcessor::new(storage.clone(), catalog.clone(), &config);
        Self {
            storage,
            catalog,
            processor,
            config,
        }
    }

    pub fn request(&self, operation: BatchOperation) -> BatchRequest {
        BatchRequest {
            business_id: BUSINESS_ID,
            vendor: VENDOR,
            account_id: ACCOUNT.to_string(),
            source: None,
            operation,
        }
    }

    pub fn load_balancer(&self, lb_id: &str) -> LoadBalancer {
        let lb = LoadBalancer {
            id: lb_id.to_string(),
            cloud_id: format!("{lb_id}-cloud"),
            vendor: VENDOR,
            account_id: ACCOUNT.to_string(),
            region: "ap-guangzhou".to_string(),
        };
        self.catalog.insert_load_balancer(lb.clone());
        lb
    }

    pub fn target_group(&self, tg_id: &str) -> TargetGroup {
        let tg = TargetGroup {
            id: tg_id.to_string(),
            name: format!("{tg_id}-name"),
            vendor: VENDOR,
            account_id: ACCOUNT.to_string(),
        };
        self.catalog.insert_target_group(tg.clone());
        tg
    }

    /// Binding of `tg_id` to a listener of `lb_id`. The listener is seeded,
    /// the binding itself is not inserted.
    pub fn binding(&self, tg_id: &str, lb_id: &str) -> TargetGroupBinding {
        let listener = Listener {
            id: format!("{tg_id}-listener"),
            cloud_id: format!("{tg_id}-listener-cloud"),
            lb_id: lb_id.to_string(),
            protocol: "HTTP".to_string(),
            port: 80,
        };
        self.catalog.insert_listener(listener.clone());
        TargetGroupBinding {
            target_group_id: tg_id.to_string(),
            lb_id: lb_id.to_string(),
            lb_cloud_id: format!("{lb_id}-cloud"),
            listener_id: listener.id,
            listener_cloud_id: listener.cloud_id,
            rule_cloud_id: Some(format!("{tg_id}-rule")),
        }
    }

    /// Target group bound to a listener of `lb_id`, with `n` targets
    pub fn bound_group(&self, tg_id: &str, lb_id: &str, n: usize) -> Vec<Target> {
        self.load_balancer(lb_id);
        self.target_group(tg_id);
        self.catalog.insert_binding(self.binding(tg_id, lb_id));
        self.targets(tg_id, n)
    }

    /// Target group never pushed to the cloud, with `n` targets
    pub fn unbound_group(&self, tg_id: &str, n: usize) -> Vec<Target> {
        self.target_group(tg_id);
        self.targets(tg_id, n)
    }

    pub fn targets(&self, tg_id: &str, n: usize) -> Vec<Target> {
        (0..n)
            .map(|i| {
                let target = Target {
                    id: format!("{tg_id}-target-{i}"),
                    target_group_id: tg_id.to_string(),
                    cloud_inst_id: format!("ins-{tg_id}-{i}"),
                    ip: format!("10.{}.{}.{}", i / 65536 % 256, i / 256 % 256, i % 256),
                    port: 8080,
                    weight: 10,
                };
                self.catalog.insert_target(target.clone());
                target
            })
            .collect()
    }

    pub fn listeners(&self, lb_id: &str, n: usize) -> Vec<Listener> {
        (0..n)
            .map(|i| {
                let listener = Listener {
                    id: format!("{lb_id}-listener-{i}"),
                    cloud_id: format!("{lb_id}-listener-cloud-{i}"),
                    lb_id: lb_id.to_string(),
                    protocol: "TCP".to_string(),
                    port: 10_000 + u16::try_from(i).unwrap_or(0),
                };
                self.catalog.insert_listener(listener.clone());
                listener
            })
            .collect()
    }
}

pub fn ids(targets: &[Target]) -> Vec<String> {
    targets.iter().map(|t| t.id.clone()).collect()
}
