#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # LB Flow Core
//!
//! Task orchestration core of a multi-cloud load balancer service.
//!
//! ## Overview
//!
//! Batch mutations against cloud load balancers (add or remove backend
//! targets, change weights or ports, delete listeners, bind target groups to
//! rules) are never executed inline. This crate turns each request into:
//!
//! 1. one task management detail per mutated item, for progress tracking
//! 2. a flow per load balancer: a linear chain of retryable tasks, each one
//!    cloud call sized to the vendor's batch limit
//! 3. an exclusivity lock so at most one flow mutates a load balancer at a
//!    time
//!
//! An external executor walks the persisted flows and calls the cloud APIs.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Gate, detail factory, chain builder, flow assembler,
//!   failure unwind and the per-operation entry points
//! - [`models`] - Flows, tasks, details, relations and catalog records
//! - [`storage`] - Persistence trait with in-memory and PostgreSQL backends
//! - [`catalog`] - Read side of the load balancer inventory
//! - [`config`] - Layered configuration (defaults, TOML, environment)
//! - [`error`] - Error taxonomy surfaced to API callers
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lbflow_core::catalog::InMemoryCatalog;
//! use lbflow_core::config::FlowConfig;
//! use lbflow_core::constants::Vendor;
//! use lbflow_core::orchestration::{
//!     BatchOperation, BatchRequest, BatchRequestProcessor, BuildContext,
//! };
//! use lbflow_core::storage::InMemoryStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FlowConfig::load(None)?;
//! let processor = BatchRequestProcessor::new(
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(InMemoryCatalog::new()),
//!     &config,
//! );
//!
//! let submission = processor
//!     .process(
//!         &BuildContext::new(),
//!         BatchRequest {
//!             business_id: 2005,
//!             vendor: Vendor::TCloud,
//!             account_id: "acct-1".to_string(),
//!             source: None,
//!             operation: BatchOperation::RemoveTargets {
//!                 target_ids: vec!["target-1".to_string()],
//!             },
//!         },
//!     )
//!     .await?
//!     // a busy or failing load balancer is reported here, not as `Err` above
//!     .into_result()?;
//! println!("flows: {:?}", submission.flow_ids);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                  # Unit and integration tests
//! cargo test --features postgres-tests        # Adds PostgreSQL-backed tests
//! ```

pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod storage;

pub use config::{BatchLimits, DatabaseConfig, FlowConfig};
pub use constants::{
    ActionName, DetailState, FlowState, FlowType, LockKind, ResourceType, TaskType, Vendor,
};
pub use error::{FlowError, Result};
pub use models::{
    ActionId, ActionIdCounter, CloudRequest, Flow, FlowTask, RetryPolicy, TaskManagement,
    TaskManagementDetail, TaskParams,
};
pub use orchestration::{
    BatchOperation, BatchRequest, BatchRequestProcessor, BatchSubmission, BuildContext,
    FlowBuilder, FlowScope,
};
pub use storage::{InMemoryStorage, PgStorage, Storage};
