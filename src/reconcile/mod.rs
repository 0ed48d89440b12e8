//! Idempotent "ensure" steps that converge a live database resource to the
//! desired audit logging configuration.
//!
//! Every step re-reads the resource, does nothing when it already matches,
//! and otherwise applies a single change only if the caller authorized it.
//! Without authorization the step fails with a policy violation naming the
//! manual remediation. Steps are safe to re-run after a partial prior run.

pub mod cluster;
pub mod instance;

pub use cluster::{ClusterPolicy, ClusterReconciler};
pub use instance::{InstanceEndpoint, InstancePolicy, InstanceReconciler};

use crate::error::RuntimeError;

/// Creating a resource that a previous run already created counts as success.
fn tolerate_existing(res: Result<(), RuntimeError>, code: &str) -> Result<(), RuntimeError> {
    match res {
        Err(err) if err.aws_code() == Some(code) => {
            tracing::info!(code, "resource already exists, reusing it");
            Ok(())
        }
        other => other,
    }
}
