#![allow(dead_code)] // Each integration test binary uses a different subset

pub mod builders;
pub mod strategies;

pub use builders::*;

use lbflow_core::constants::DetailState;
use lbflow_core::models::TaskManagementDetail;

/// Count details per state: (pending, success, failed)
pub fn state_counts(details: &[TaskManagementDetail]) -> (usize, usize, usize) {
    details.iter().fold((0, 0, 0), |(p, s, f), d| match d.state {
        DetailState::Pending => (p + 1, s, f),
        DetailState::Success => (p, s + 1, f),
        DetailState::Failed => (p, s, f + 1),
    })
}
