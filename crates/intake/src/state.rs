//! Application state and shared resources.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::allocator::Allocator;
use crate::cluster::{ClusterControl, Kubectl};
use crate::config::AppConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Address allocator over the role ledgers
    pub allocator: Arc<Allocator>,

    /// Cluster object access
    pub cluster: Arc<dyn ClusterControl>,

    /// Token every register/delete call must present
    pub join_token: Arc<str>,
}

impl AppState {
    /// Build state for the running service: kubectl-backed cluster access
    /// and the token resolved from config or the join info file
    pub fn new(config: AppConfig) -> Result<Self> {
        let join_token = config.resolve_join_token()?;
        let cluster = Arc::new(kubectl_from(&config));
        Self::with_cluster(config, cluster, join_token)
    }

    pub fn with_cluster(
        config: AppConfig,
        cluster: Arc<dyn ClusterControl>,
        join_token: impl Into<Arc<str>>,
    ) -> Result<Self> {
        let (control_plane, worker) = config.pool_specs()?;
        let allocator = Arc::new(Allocator::new(config.ledger_dir.clone(), control_plane, worker));

        Ok(Self {
            config,
            allocator,
            cluster,
            join_token: join_token.into(),
        })
    }
}

/// kubectl client configured from `config.kubectl`
pub fn kubectl_from(config: &AppConfig) -> Kubectl {
    Kubectl::new(
        config.kubectl.program.clone(),
        config.kubectl.kubeconfig.clone(),
        Duration::from_secs(config.kubectl.timeout_secs),
    )
}
