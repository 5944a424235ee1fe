//! azflow Cloud Reconciliation Engine
//!
//! This crate drives a cloud account toward declared identity bindings:
//! it routes each declared spec to the routine for its resource kind, reads
//! the resource's current state and grants a role to its managed identity.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   azflow CLI                     │
//! │          (reconcile / delete / retry)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 azflow-cloud                     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  dispatch → RoleAssignmentService         │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───┐  ┌──────────────┐     │
//! │  │  ResourceGetter      │──│  Operation   │     │
//! │  │  (ClientGetter)      │  │  Tracker     │     │
//! │  └──────────┬───────────┘  └──────┬───────┘     │
//! │  ┌──────────▼─────────────────────▼───────┐     │
//! │  │      trait ResourceClient { ... }      │     │
//! │  └────────────────────┬───────────────────┘     │
//! └───────────────────────┼─────────────────────────┘
//!                         │
//!                 ┌───────▼───────┐
//!                 │ azflow-cloud- │
//!                 │    azure      │
//!                 └───────────────┘
//! ```

pub mod client;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod getter;
pub mod operation;
pub mod resource;
pub mod retry;
pub mod roleassignments;
pub mod telemetry;

// Re-exports
pub use client::{Fetch, ResourceClient};
pub use context::{CallContext, Canceller};
pub use dispatch::{KindReconciler, PassReport, SpecPhase, SpecStatus, dispatch};
pub use error::{CloudError, ErrorClass, Result, ResultExt};
pub use getter::{ClientGetter, ResourceGetter};
pub use operation::{
    FileOperationStore, MemoryOperationStore, OperationRecord, OperationStatus, OperationStore,
    OperationToken, OperationTracker, PollOutcome,
};
pub use resource::{
    BUILT_IN_CONTRIBUTOR_ID, Identity, ProvisioningState, ResourceKind, ResourceRef, ResourceState,
    RoleAssignment, RoleAssignmentParameters, RoleAssignmentSpec, ScaleSetState, VmState,
};
pub use retry::RetryConfig;
pub use roleassignments::{AssignOutcome, RoleAssignmentService};
pub use telemetry::TracedClient;
