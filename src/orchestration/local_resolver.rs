//! # Local Resolver
//!
//! DB-only path for target groups that are not bound to any listener or
//! rule. Nothing has been pushed to the cloud for them, so no flow is built:
//! the details are created for the audit trail, the catalog is changed
//! directly, and the details are resolved `Success` before returning. When
//! the catalog write fails the details are unwound to `Failed` instead.

use crate::catalog::ResourceCatalog;
use crate::constants::TaskType;
use crate::error::{FlowError, Result};
use crate::models::{NewTarget, Target, TargetPatch, TargetSpec};
use crate::orchestration::chain_builder::ensure_unique;
use crate::orchestration::context::BuildContext;
use crate::orchestration::detail_factory::{DetailScope, TaskDetailFactory};
use crate::orchestration::failure_unwind::FailureUnwind;
use crate::orchestration::plans::{
    spec_param, target_param, validate_port, validate_target_spec, validate_weight, with_field,
};
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Local change applied to existing unbound targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChange {
    Weight(u32),
    Port(u16),
}

impl TargetChange {
    fn task_type(&self) -> TaskType {
        match self {
            TargetChange::Weight(_) => TaskType::ModifyTargetWeight,
            TargetChange::Port(_) => TaskType::ModifyTargetPort,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            TargetChange::Weight(weight) => validate_weight(*weight),
            TargetChange::Port(port) => validate_port(*port),
        }
    }

    fn patch(&self, target_id: &str) -> TargetPatch {
        match self {
            TargetChange::Weight(weight) => TargetPatch {
                id: target_id.to_string(),
                port: None,
                weight: Some(*weight),
            },
            TargetChange::Port(port) => TargetPatch {
                id: target_id.to_string(),
                port: Some(*port),
                weight: None,
            },
        }
    }

    fn param(&self, target: &Target) -> serde_json::Value {
        match self {
            TargetChange::Weight(weight) => {
                with_field(target_param(target), "new_weight", json!(weight))
            }
            TargetChange::Port(port) => with_field(target_param(target), "new_port", json!(port)),
        }
    }
}

#[derive(Clone)]
pub struct LocalResolver {
    catalog: Arc<dyn ResourceCatalog>,
    factory: TaskDetailFactory,
    unwind: FailureUnwind,
}

impl std::fmt::Debug for LocalResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalResolver").finish_non_exhaustive()
    }
}

impl LocalResolver {
    pub fn new(
        catalog: Arc<dyn ResourceCatalog>,
        factory: TaskDetailFactory,
        unwind: FailureUnwind,
    ) -> Self {
        Self {
            catalog,
            factory,
            unwind,
        }
    }

    /// Delete unbound targets from the catalog
    pub async fn remove_targets(
        &self,
        ctx: &BuildContext,
        scope: &DetailScope,
        targets: &[Target],
    ) -> Result<Vec<i64>> {
        let params = targets.iter().map(target_param).collect();
        let ids: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
        self.resolve(
            ctx,
            scope,
            params,
            Box::pin(async move { self.catalog.delete_targets(&ids).await }),
        )
        .await
    }

    /// Change the weight or port of unbound targets in the catalog
    pub async fn modify_targets(
        &self,
        ctx: &BuildContext,
        scope: &DetailScope,
        targets: &[Target],
        change: TargetChange,
    ) -> Result<Vec<i64>> {
        change.validate()?;
        if change.task_type() != scope.task_type {
            return Err(FlowError::InvalidParameter(format!(
                "{} change cannot be recorded as {}",
                change.task_type(),
                scope.task_type
            )));
        }

        let params = targets.iter().map(|t| change.param(t)).collect();
        let patches: Vec<TargetPatch> = targets.iter().map(|t| change.patch(&t.id)).collect();
        self.resolve(
            ctx,
            scope,
            params,
            Box::pin(async move { self.catalog.update_targets(&patches).await }),
        )
        .await
    }

    /// Create new targets in an unbound target group
    pub async fn add_targets(
        &self,
        ctx: &BuildContext,
        scope: &DetailScope,
        target_group_id: &str,
        specs: &[TargetSpec],
    ) -> Result<Vec<i64>> {
        for spec in specs {
            validate_target_spec(spec)?;
        }
        ensure_unique(specs, "cloud instance and port", |s: &TargetSpec| {
            format!("{}:{}", s.cloud_inst_id, s.port)
        })?;

        let params = specs
            .iter()
            .map(|s| spec_param(target_group_id, s))
            .collect();
        let new_targets: Vec<NewTarget> = specs
            .iter()
            .map(|s| NewTarget {
                target_group_id: target_group_id.to_string(),
                cloud_inst_id: s.cloud_inst_id.clone(),
                ip: s.ip.clone(),
                port: s.port,
                weight: s.weight,
            })
            .collect();
        self.resolve(
            ctx,
            scope,
            params,
            Box::pin(async move { self.catalog.create_targets(new_targets).await.map(|_| ()) }),
        )
        .await
    }

    #[instrument(skip_all, fields(
        request_id = %ctx.request_id(),
        task_type = %scope.task_type,
        item_count = params.len(),
    ))]
    async fn resolve(
        &self,
        ctx: &BuildContext,
        scope: &DetailScope,
        params: Vec<serde_json::Value>,
        write: BoxFuture<'_, Result<()>>,
    ) -> Result<Vec<i64>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let mut details = self.factory.create_details(ctx, scope, params).await?;

        let resolved = match ctx.run("catalog_write", write).await {
            Ok(()) => self.factory.mark_succeeded(ctx, &mut details).await,
            Err(err) => Err(err),
        };

        if let Err(err) = resolved {
            self.unwind.unwind(&mut details, &err).await;
            return Err(err);
        }

        debug!(detail_count = details.len(), "Resolved unbound items locally");
        Ok(details.iter().map(|d| d.id).collect())
    }
}
