//! # Build Context
//!
//! Request-scoped values threaded through every storage call of a flow
//! construction: a request id for log correlation and an optional deadline.
//! A storage call started after the deadline, or still pending when it
//! passes, fails with [`FlowError::Aborted`].
//!
//! Inserts whose rows the caller must track for unwinding go through
//! [`BuildContext::run_to_completion`] instead: the deadline is checked
//! before the insert starts, but a started insert is never dropped, so
//! committed rows always reach the caller.

use crate::error::{FlowError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BuildContext {
    request_id: String,
    deadline: Option<Instant>,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Await `operation` under the context deadline
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(deadline) = self.deadline else {
            return fut.await;
        };

        if Instant::now() >= deadline {
            return Err(Self::expired(operation));
        }

        tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| Self::expired(operation))?
    }

    /// Check the deadline, then await `operation` without a timeout
    pub async fn run_to_completion<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_expired() {
            return Err(Self::expired(operation));
        }
        fut.await
    }

    fn expired(operation: &str) -> FlowError {
        FlowError::Aborted(format!("deadline exceeded during {operation}"))
    }
}
