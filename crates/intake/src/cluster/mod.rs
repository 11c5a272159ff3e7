//! Cluster control plane access.
//!
//! Everything the intake service and the reconciler do to cluster objects
//! goes through [`ClusterControl`]. Production uses [`Kubectl`]; tests use
//! an in-memory fake.

mod kubectl;

#[cfg(test)]
pub mod fake;

pub use kubectl::Kubectl;

use async_trait::async_trait;
use nodegate_common::{NodegateError, Role};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Cluster call errors
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object or resource type is not (yet) visible
    #[error("not found: {0}")]
    NotFound(String),

    /// kubectl ran and failed
    #[error("{action} failed (exit {code:?}): {stderr}")]
    Command {
        action: String,
        code: Option<i32>,
        stderr: String,
    },

    /// kubectl could not be started
    #[error("failed to run kubectl: {0}")]
    Spawn(#[from] std::io::Error),

    /// kubectl did not finish in time
    #[error("{action} timed out after {timeout:?}")]
    Timeout { action: String, timeout: Duration },
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ClusterError> for NodegateError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound(_) => NodegateError::NotFound(err.to_string()),
            ClusterError::Timeout { .. } => NodegateError::Timeout(err.to_string()),
            _ => NodegateError::Cluster(err.to_string()),
        }
    }
}

/// Observed state of a CustomResourceDefinition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdState {
    /// Not registered
    Missing,
    /// Registered but not yet reporting `Established`
    Present,
    /// Registered and `Established`
    Established,
}

/// Operations on cluster objects
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Set `node-role.kubernetes.io/<role>=true` on a Node (overwrite)
    async fn label_node(&self, node: &str, role: Role) -> Result<(), ClusterError>;

    /// Delete a Node object. Absent nodes yield `NotFound`.
    async fn delete_node(&self, node: &str) -> Result<(), ClusterError>;

    /// State of a CRD by full name (`<plural>.<group>`)
    async fn crd_state(&self, crd: &str) -> Result<CrdState, ClusterError>;

    /// Whether an object of `kind` named `name` exists
    async fn object_exists(&self, kind: &str, name: &str) -> Result<bool, ClusterError>;

    /// Apply a JSON merge patch to an object
    async fn merge_patch(&self, kind: &str, name: &str, patch: &Value) -> Result<(), ClusterError>;
}
