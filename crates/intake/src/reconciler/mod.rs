//! Applies an assigned block to the node's cluster objects.
//!
//! Stages run in order: wait for the CiliumNode CRD, wait for the node's
//! CiliumNode, patch the Node, patch the CiliumNode. Every wait is bounded.

mod policy;

pub use policy::{Decision, Probe, WaitPolicy};

use ipnet::Ipv4Net;
use nodegate_common::constants::{cluster, reconcile};
use serde_json::{Value, json};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::cluster::{ClusterControl, ClusterError, CrdState};

/// Reconciler timing and object names
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub poll_interval: Duration,
    pub schema_timeout: Duration,
    pub object_timeout: Duration,
    pub patch_retry_timeout: Duration,
    pub crd: String,
    pub resource: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(reconcile::POLL_INTERVAL_SECS),
            schema_timeout: Duration::from_secs(reconcile::SCHEMA_TIMEOUT_SECS),
            object_timeout: Duration::from_secs(reconcile::OBJECT_TIMEOUT_SECS),
            patch_retry_timeout: Duration::from_secs(reconcile::PATCH_RETRY_TIMEOUT_SECS),
            crd: cluster::CILIUM_NODE_CRD.to_string(),
            resource: cluster::CILIUM_NODE_RESOURCE.to_string(),
        }
    }
}

/// Reconciliation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WaitSchema,
    WaitObject,
    PatchNode,
    PatchAgentObject,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WaitSchema => "WAIT_SCHEMA",
            Self::WaitObject => "WAIT_OBJECT",
            Self::PatchNode => "PATCH_NODE",
            Self::PatchAgentObject => "PATCH_AGENT_OBJECT",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("CRD {crd} did not appear within {waited:?}")]
    SchemaNotFound { crd: String, waited: Duration },

    #[error("{kind}/{name} did not appear within {waited:?}")]
    ObjectNotFound {
        kind: String,
        name: String,
        waited: Duration,
    },

    #[error("{stage} failed: {source}")]
    Cluster {
        stage: Stage,
        #[source]
        source: ClusterError,
    },
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// False when the CRD never reported `Established` and the run went on anyway
    pub schema_established: bool,
    /// CiliumNode patch attempts, including the one that succeeded
    pub agent_patch_attempts: u32,
}

pub struct Reconciler {
    cluster: Arc<dyn ClusterControl>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterControl>, config: ReconcileConfig) -> Self {
        Self { cluster, config }
    }

    /// Apply `cidr` to the Node and CiliumNode named `node`
    pub async fn reconcile(&self, node: &str, cidr: Ipv4Net) -> Result<ReconcileOutcome, ReconcileError> {
        tracing::info!(node = node, cidr = %cidr, "Starting reconciliation");

        match self.run(node, cidr).await {
            Ok(outcome) => {
                tracing::info!(node = node, cidr = %cidr, stage = %Stage::Done, "Reconciliation complete");
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(node = node, cidr = %cidr, stage = %Stage::Failed, error = %e, "Reconciliation failed");
                Err(e)
            }
        }
    }

    async fn run(&self, node: &str, cidr: Ipv4Net) -> Result<ReconcileOutcome, ReconcileError> {
        tracing::info!(stage = %Stage::WaitSchema, crd = %self.config.crd, "Waiting for CRD");
        let schema_established = self.wait_schema().await?;

        tracing::info!(stage = %Stage::WaitObject, node = node, "Waiting for {}", self.config.resource);
        self.wait_object(node, self.config.object_timeout).await?;

        tracing::info!(stage = %Stage::PatchNode, node = node, "Patching Node podCIDR");
        self.cluster
            .merge_patch("node", node, &node_patch(cidr))
            .await
            .map_err(|source| ReconcileError::Cluster {
                stage: Stage::PatchNode,
                source,
            })?;

        tracing::info!(stage = %Stage::PatchAgentObject, node = node, "Patching {} podCIDRs", self.config.resource);
        let agent_patch_attempts = self.patch_agent_object(node, cidr).await?;

        Ok(ReconcileOutcome {
            schema_established,
            agent_patch_attempts,
        })
    }

    /// Returns whether the CRD reached `Established`
    async fn wait_schema(&self) -> Result<bool, ReconcileError> {
        let policy = WaitPolicy::new(self.config.poll_interval, self.config.schema_timeout).accept_partial();
        let crd = self.config.crd.as_str();
        let cluster = &*self.cluster;

        let (decision, last) = poll(policy, move || async move {
            match cluster.crd_state(crd).await {
                Ok(CrdState::Established) => Probe::Ready,
                Ok(CrdState::Present) => Probe::Partial,
                Ok(CrdState::Missing) => Probe::Absent,
                Err(e) => {
                    tracing::warn!(crd = crd, error = %e, "CRD probe failed");
                    Probe::Absent
                }
            }
        })
        .await;

        match decision {
            Decision::Fail => Err(ReconcileError::SchemaNotFound {
                crd: crd.to_string(),
                waited: policy.timeout,
            }),
            _ if last == Probe::Partial => {
                tracing::warn!(crd = crd, waited = ?policy.timeout, "CRD present but not Established, continuing");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    async fn wait_object(&self, node: &str, timeout: Duration) -> Result<(), ReconcileError> {
        let policy = WaitPolicy::new(self.config.poll_interval, timeout);
        let kind = self.config.resource.as_str();
        let cluster = &*self.cluster;

        let (decision, _) = poll(policy, move || async move {
            match cluster.object_exists(kind, node).await {
                Ok(true) => Probe::Ready,
                Ok(false) => Probe::Absent,
                Err(e) => {
                    tracing::warn!(kind = kind, node = node, error = %e, "Object probe failed");
                    Probe::Absent
                }
            }
        })
        .await;

        if decision == Decision::Fail {
            return Err(ReconcileError::ObjectNotFound {
                kind: kind.to_string(),
                name: node.to_string(),
                waited: timeout,
            });
        }
        Ok(())
    }

    /// Patch the CiliumNode, re-waiting on NotFound until the retry bound
    async fn patch_agent_object(&self, node: &str, cidr: Ipv4Net) -> Result<u32, ReconcileError> {
        let kind = self.config.resource.as_str();
        let patch = agent_patch(cidr);
        let retry = WaitPolicy::new(self.config.poll_interval, self.config.patch_retry_timeout);
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let err = match self.cluster.merge_patch(kind, node, &patch).await {
                Ok(()) => return Ok(attempts),
                Err(e) if e.is_not_found() => e,
                Err(source) => {
                    return Err(ReconcileError::Cluster {
                        stage: Stage::PatchAgentObject,
                        source,
                    });
                }
            };

            let elapsed = start.elapsed();
            if retry.decide(elapsed, Probe::Absent) == Decision::Fail {
                return Err(ReconcileError::ObjectNotFound {
                    kind: kind.to_string(),
                    name: node.to_string(),
                    waited: retry.timeout,
                });
            }

            tracing::warn!(
                kind = kind,
                node = node,
                attempt = attempts,
                error = %err,
                "Object vanished before patch, waiting again"
            );
            tokio::time::sleep(retry.next_sleep(elapsed)).await;

            let remaining = retry.timeout.saturating_sub(start.elapsed());
            self.wait_object(node, remaining).await?;
        }
    }
}

/// Probe until the policy stops waiting. Returns the final decision and
/// the probe it was made on.
async fn poll<F, Fut>(policy: WaitPolicy, mut probe: F) -> (Decision, Probe)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    let start = Instant::now();
    loop {
        let result = probe().await;
        let elapsed = start.elapsed();
        match policy.decide(elapsed, result) {
            Decision::Continue => tokio::time::sleep(policy.next_sleep(elapsed)).await,
            decision => return (decision, result),
        }
    }
}

pub fn node_patch(cidr: Ipv4Net) -> Value {
    let cidr = cidr.to_string();
    json!({ "spec": { "podCIDR": cidr, "podCIDRs": [cidr] } })
}

pub fn agent_patch(cidr: Ipv4Net) -> Value {
    json!({ "spec": { "ipam": { "podCIDRs": [cidr.to_string()] } } })
}
