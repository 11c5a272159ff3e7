//! Configuration management for the intake service.

use anyhow::{Context, Result, bail};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nodegate_common::constants::{DEFAULT_KUBECONFIG, DEFAULT_LISTEN_ADDR, cluster, paths, reconcile};
use nodegate_common::{JoinInfo, Role};

use crate::allocator::PoolSpec;
use crate::reconciler::ReconcileConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Directory holding the role ledgers
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,

    /// Shared join token (falls back to the join info file)
    #[serde(default)]
    pub join_token: Option<String>,

    /// Join info file written at cluster bootstrap
    #[serde(default = "default_join_info_path")]
    pub join_info_path: PathBuf,

    /// Facts about this node, used by bootstrap modes
    #[serde(default = "default_node_facts_path")]
    pub node_facts_path: PathBuf,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// kubectl settings
    #[serde(default)]
    pub kubectl: KubectlConfig,

    /// Address pools
    #[serde(default)]
    pub pools: PoolsConfig,

    /// Reconciler timing
    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

/// kubectl invocation settings
#[derive(Debug, Clone, Deserialize)]
pub struct KubectlConfig {
    /// kubectl binary
    #[serde(default = "default_kubectl_program")]
    pub program: PathBuf,

    /// Kubeconfig passed to every call
    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: Option<PathBuf>,

    /// Timeout for a single call in seconds
    #[serde(default = "default_kubectl_timeout")]
    pub timeout_secs: u64,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            program: default_kubectl_program(),
            kubeconfig: default_kubeconfig(),
            timeout_secs: default_kubectl_timeout(),
        }
    }
}

/// One role's pool
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub base: Ipv4Net,
    pub prefix: u8,
    #[serde(default)]
    pub reserve_first: bool,
    #[serde(default)]
    pub cluster_block: Option<Ipv4Net>,
}

impl PoolConfig {
    fn default_for(role: Role) -> Self {
        let spec = PoolSpec::default_for(role);
        Self {
            base: spec.base,
            prefix: spec.prefix,
            reserve_first: spec.reserve_first,
            cluster_block: spec.cluster_block,
        }
    }

    pub fn to_spec(&self, role: Role) -> Result<PoolSpec> {
        PoolSpec::new(role, self.base, self.prefix, self.reserve_first, self.cluster_block)
            .with_context(|| format!("Invalid {} pool", role))
    }
}

/// Pools per role
#[derive(Debug, Clone, Deserialize)]
pub struct PoolsConfig {
    #[serde(default = "default_control_plane_pool")]
    pub control_plane: PoolConfig,

    #[serde(default = "default_worker_pool")]
    pub worker: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            control_plane: default_control_plane_pool(),
            worker: default_worker_pool(),
        }
    }
}

/// Reconciler timing in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_schema_timeout")]
    pub schema_timeout_secs: u64,

    #[serde(default = "default_object_timeout")]
    pub object_timeout_secs: u64,

    #[serde(default = "default_patch_retry_timeout")]
    pub patch_retry_timeout_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            schema_timeout_secs: default_schema_timeout(),
            object_timeout_secs: default_object_timeout(),
            patch_retry_timeout_secs: default_patch_retry_timeout(),
        }
    }
}

impl ReconcileSettings {
    pub fn to_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            schema_timeout: Duration::from_secs(self.schema_timeout_secs),
            object_timeout: Duration::from_secs(self.object_timeout_secs),
            patch_retry_timeout: Duration::from_secs(self.patch_retry_timeout_secs),
            crd: cluster::CILIUM_NODE_CRD.to_string(),
            resource: cluster::CILIUM_NODE_RESOURCE.to_string(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_ledger_dir() -> PathBuf { PathBuf::from(paths::LEDGER_DIR) }
fn default_join_info_path() -> PathBuf { PathBuf::from(paths::JOIN_INFO) }
fn default_node_facts_path() -> PathBuf { PathBuf::from(paths::NODE_FACTS) }
fn default_request_timeout() -> u64 { 30 }
fn default_kubectl_program() -> PathBuf { PathBuf::from("kubectl") }
fn default_kubeconfig() -> Option<PathBuf> { Some(PathBuf::from(DEFAULT_KUBECONFIG)) }
fn default_kubectl_timeout() -> u64 { reconcile::KUBECTL_TIMEOUT_SECS }
fn default_control_plane_pool() -> PoolConfig { PoolConfig::default_for(Role::ControlPlane) }
fn default_worker_pool() -> PoolConfig { PoolConfig::default_for(Role::Worker) }
fn default_poll_interval() -> u64 { reconcile::POLL_INTERVAL_SECS }
fn default_schema_timeout() -> u64 { reconcile::SCHEMA_TIMEOUT_SECS }
fn default_object_timeout() -> u64 { reconcile::OBJECT_TIMEOUT_SECS }
fn default_patch_retry_timeout() -> u64 { reconcile::PATCH_RETRY_TIMEOUT_SECS }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            tracing::warn!(path = config_path, "Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref dir) = args.ledger_dir {
            config.ledger_dir = dir.clone();
        }
        if let Some(ref kubeconfig) = args.kubeconfig {
            config.kubectl.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(ref token) = args.join_token {
            config.join_token = Some(token.clone());
        }

        // Pools are checked up front so a bad file fails at startup
        config.pool_specs()?;

        Ok(config)
    }

    /// Validated pool specs (control-plane, worker)
    pub fn pool_specs(&self) -> Result<(PoolSpec, PoolSpec)> {
        Ok((
            self.pools.control_plane.to_spec(Role::ControlPlane)?,
            self.pools.worker.to_spec(Role::Worker)?,
        ))
    }

    /// Join token from the config/CLI, else from the join info file
    pub fn resolve_join_token(&self) -> Result<String> {
        if let Some(token) = self.join_token.as_deref().map(str::trim) {
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }

        if self.join_info_path.exists() {
            let info = JoinInfo::load(&self.join_info_path)
                .context("Failed to read join token from join info file")?;
            tracing::info!(path = ?self.join_info_path, "Join token loaded from join info file");
            return Ok(info.join_token);
        }

        bail!(
            "No join token configured: pass --join-token, set join_token in the config file, or provide {}",
            self.join_info_path.display()
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ledger_dir: default_ledger_dir(),
            join_token: None,
            join_info_path: default_join_info_path(),
            node_facts_path: default_node_facts_path(),
            request_timeout_secs: default_request_timeout(),
            kubectl: KubectlConfig::default(),
            pools: PoolsConfig::default(),
            reconcile: ReconcileSettings::default(),
        }
    }
}
