//! Reconciliation dispatch
//!
//! Routes each declared spec to the routine for its resource kind. Dispatch
//! performs no I/O of its own; every side effect happens in the
//! [`KindReconciler`] it delegates to.

use crate::context::CallContext;
use crate::error::{CloudError, Result};
use crate::resource::{ResourceKind, RoleAssignmentSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one declared spec within a reconcile pass
///
/// `Pending -> Fetching -> Assigning -> Done`, with `Failed` reachable from
/// every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecPhase {
    Pending,
    Fetching,
    Assigning,
    Done,
    Failed,
}

impl SpecPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SpecPhase::Done | SpecPhase::Failed)
    }

    pub fn can_transition_to(self, next: SpecPhase) -> bool {
        matches!(
            (self, next),
            (SpecPhase::Pending, SpecPhase::Fetching)
                | (SpecPhase::Fetching, SpecPhase::Assigning)
                | (SpecPhase::Assigning, SpecPhase::Done)
                | (SpecPhase::Pending | SpecPhase::Fetching | SpecPhase::Assigning, SpecPhase::Failed)
        )
    }

    /// Move to `next`; an invalid transition is a bug in the caller
    pub fn advance(&mut self, next: SpecPhase) {
        debug_assert!(
            self.can_transition_to(next),
            "invalid phase transition {} -> {}",
            self,
            next
        );
        tracing::trace!(from = %self, to = %next, "phase transition");
        *self = next;
    }
}

impl fmt::Display for SpecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecPhase::Pending => write!(f, "pending"),
            SpecPhase::Fetching => write!(f, "fetching"),
            SpecPhase::Assigning => write!(f, "assigning"),
            SpecPhase::Done => write!(f, "done"),
            SpecPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Kind-specific reconcile routines
///
/// Implementations advance `phase` as they go so that a failure can be
/// reported with the phase it happened in.
#[async_trait]
pub trait KindReconciler: Send + Sync {
    async fn reconcile_virtual_machine(
        &self,
        ctx: &CallContext,
        spec: &RoleAssignmentSpec,
        phase: &mut SpecPhase,
    ) -> Result<()>;

    async fn reconcile_scale_set(
        &self,
        ctx: &CallContext,
        spec: &RoleAssignmentSpec,
        phase: &mut SpecPhase,
    ) -> Result<()>;
}

/// Phase of one declared spec at the end of a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecStatus {
    pub name: String,
    pub resource_type: String,
    pub phase: SpecPhase,
}

/// Result of a successful reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// One entry per declared spec, in declaration order
    pub specs: Vec<SpecStatus>,
}

impl PassReport {
    /// Specs that reached `Done`
    pub fn converged(&self) -> impl Iterator<Item = &SpecStatus> {
        self.specs.iter().filter(|s| s.phase == SpecPhase::Done)
    }

    /// Specs left untouched by this pass
    pub fn untouched(&self) -> impl Iterator<Item = &SpecStatus> {
        self.specs.iter().filter(|s| s.phase == SpecPhase::Pending)
    }
}

/// Run one reconcile pass over `specs`
///
/// Only the first declared spec is processed; the pass returns as soon as it
/// converges or fails and every later spec stays `Pending`. Any failure
/// aborts the pass with a [`CloudError::Reconcile`] naming the spec's kind,
/// name and the phase it failed in.
pub async fn dispatch<R>(
    ctx: &CallContext,
    specs: &[RoleAssignmentSpec],
    reconciler: &R,
) -> Result<PassReport>
where
    R: KindReconciler + ?Sized,
{
    let mut report = PassReport {
        specs: specs
            .iter()
            .map(|spec| SpecStatus {
                name: spec.name.clone(),
                resource_type: spec.resource_type.clone(),
                phase: SpecPhase::Pending,
            })
            .collect(),
    };

    // Later specs are left for a future pass
    if let Some(spec) = specs.first() {
        let mut phase = SpecPhase::Pending;
        tracing::debug!(kind = %spec.resource_type, name = %spec.name, "dispatching spec");
        let result = match spec.kind() {
            Ok(ResourceKind::VirtualMachine) => {
                reconciler
                    .reconcile_virtual_machine(ctx, spec, &mut phase)
                    .await
            }
            Ok(ResourceKind::VirtualMachineScaleSet) => {
                reconciler.reconcile_scale_set(ctx, spec, &mut phase).await
            }
            Err(e) => Err(e),
        };

        if let Err(source) = result {
            return Err(CloudError::Reconcile {
                kind: spec.resource_type.clone(),
                name: spec.name.clone(),
                phase,
                source: Box::new(source),
            });
        }

        report.specs[0].phase = SpecPhase::Done;
    }

    Ok(report)
}
