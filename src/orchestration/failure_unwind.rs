//! # Failure Unwind
//!
//! Compensating step run when flow construction fails: every detail created
//! by the failed attempt that is still `Pending` becomes `Failed` with the
//! triggering error as its reason. Nothing else is rolled back. The flow row
//! and any relation already written stay as they are.
//!
//! The unwind is best effort. Its own storage failure is logged and dropped
//! so the caller still sees the original error, and it runs without the
//! build deadline because it usually runs right after that deadline expired.

use crate::constants::DetailState;
use crate::error::FlowError;
use crate::models::{DetailPatch, TaskManagementDetail};
use crate::storage::Storage;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct FailureUnwind {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for FailureUnwind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureUnwind").finish_non_exhaustive()
    }
}

impl FailureUnwind {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Fail every pending detail with `cause` as the reason. Returns how many
    /// details were marked; zero when the batch update itself failed.
    pub async fn unwind(&self, details: &mut [TaskManagementDetail], cause: &FlowError) -> usize {
        let reason = cause.to_string();
        let patches: Vec<DetailPatch> = details
            .iter()
            .filter(|d| d.state == DetailState::Pending)
            .map(|d| DetailPatch::state(d.id, DetailState::Failed, Some(reason.clone())))
            .collect();

        if patches.is_empty() {
            return 0;
        }

        if let Err(unwind_err) = self.storage.update_task_details(&patches).await {
            error!(
                detail_count = patches.len(),
                cause = %cause,
                error = %unwind_err,
                "Failed to unwind task management details"
            );
            return 0;
        }

        for detail in details.iter_mut() {
            if detail.state == DetailState::Pending {
                detail.state = DetailState::Failed;
                detail.reason = Some(reason.clone());
            }
        }

        warn!(
            detail_count = patches.len(),
            cause = %cause,
            "Unwound task management details"
        );
        patches.len()
    }
}
