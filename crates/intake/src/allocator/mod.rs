//! Address allocation.
//!
//! Owns the two role ledgers and serializes every read-modify-write on them:
//! - `pool` - base pools and subnet selection
//! - `ledger` - the ledger document and its file

mod ledger;
mod pool;

pub use ledger::{Assignment, Ledger, LedgerFile};
pub use pool::PoolSpec;

use ipnet::Ipv4Net;
use nodegate_common::{NodegateError, Role};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

/// Allocation errors
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("no free subnet left in {role} pool {pool}")]
    PoolExhausted { role: Role, pool: Ipv4Net },

    #[error("node {name} already holds a block in the {existing} ledger")]
    RoleConflict { name: String, existing: Role },

    #[error("invalid pool: {0}")]
    InvalidPool(String),

    #[error("failed to write ledger {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode ledger: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<AllocError> for NodegateError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::PoolExhausted { .. } => NodegateError::PoolExhausted(err.to_string()),
            AllocError::RoleConflict { .. } => NodegateError::RoleConflict(err.to_string()),
            AllocError::InvalidPool(_) => NodegateError::Config(err.to_string()),
            AllocError::Persist { .. } | AllocError::Encode(_) => {
                NodegateError::Ledger(err.to_string())
            }
        }
    }
}

/// Per-ledger result of a release
#[derive(Debug, Default)]
pub struct ReleaseOutcome {
    /// Ledgers the node was removed from
    pub released_from: Vec<Role>,

    /// Ledgers that held the node but could not be rewritten
    pub failed: Vec<(Role, AllocError)>,
}

impl ReleaseOutcome {
    pub fn found(&self) -> bool {
        !self.released_from.is_empty() || !self.failed.is_empty()
    }

    /// Combined message for the failed ledgers, if any
    pub fn error_message(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        Some(
            self.failed
                .iter()
                .map(|(role, e)| format!("{}: {}", role, e))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// The address allocator.
///
/// One instance per intake process. All ledger access goes through the
/// internal lock, so concurrent registrations never read the same ledger
/// state before either writes.
pub struct Allocator {
    dir: PathBuf,
    control_plane: PoolSpec,
    worker: PoolSpec,
    lock: Mutex<()>,
}

impl Allocator {
    pub fn new(dir: impl Into<PathBuf>, control_plane: PoolSpec, worker: PoolSpec) -> Self {
        Self {
            dir: dir.into(),
            control_plane,
            worker,
            lock: Mutex::new(()),
        }
    }

    /// Directory holding the ledger files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pool(&self, role: Role) -> &PoolSpec {
        match role {
            Role::ControlPlane => &self.control_plane,
            Role::Worker => &self.worker,
        }
    }

    pub fn ledger_path(&self, role: Role) -> PathBuf {
        self.dir.join(role.ledger_file())
    }

    fn ledger_file(&self, role: Role) -> LedgerFile {
        LedgerFile::new(self.ledger_path(role))
    }

    /// Assign a block to `name`, or return the block it already holds.
    pub async fn assign(
        &self,
        role: Role,
        name: &str,
        globalip: Ipv4Addr,
    ) -> Result<Assignment, AllocError> {
        let _guard = self.lock.lock().await;

        let other = self.ledger_file(role.other()).load().await;
        if other.contains(name) {
            tracing::warn!(node = name, requested = %role, existing = %role.other(), "Node registered under another role");
            return Err(AllocError::RoleConflict {
                name: name.to_string(),
                existing: role.other(),
            });
        }

        let file = self.ledger_file(role);
        let mut ledger = file.load().await;
        let assignment = ledger.assign(self.pool(role), name, globalip)?;

        if assignment.created {
            file.save(&ledger).await?;
            tracing::info!(
                node = name,
                role = %role,
                cidr = %assignment.block.cidr,
                ledger = ?file.path(),
                "Assigned address block"
            );
        } else if assignment.block.globalip != globalip {
            tracing::warn!(
                node = name,
                cidr = %assignment.block.cidr,
                stored_ip = %assignment.block.globalip,
                requested_ip = %globalip,
                "Node already registered with a different address, keeping original block"
            );
        } else {
            tracing::warn!(node = name, cidr = %assignment.block.cidr, "Node already present in ledger");
        }

        Ok(assignment)
    }

    /// Remove `name` from every ledger that holds it.
    ///
    /// Each ledger is handled on its own: a failed write on one does not
    /// stop the other, and the outcome reports both. Not finding the node
    /// is not an error.
    pub async fn release(&self, name: &str) -> ReleaseOutcome {
        let _guard = self.lock.lock().await;
        let mut outcome = ReleaseOutcome::default();

        for role in Role::ALL {
            let file = self.ledger_file(role);
            let mut ledger = file.load().await;
            let Some(block) = ledger.release(name) else {
                continue;
            };

            match file.save(&ledger).await {
                Ok(()) => {
                    tracing::info!(node = name, role = %role, cidr = %block.cidr, "Released address block");
                    outcome.released_from.push(role);
                }
                Err(e) => {
                    tracing::error!(node = name, role = %role, error = %e, "Failed to release address block");
                    outcome.failed.push((role, e));
                }
            }
        }

        if !outcome.found() {
            tracing::info!(node = name, "Node not present in any ledger, nothing to release");
        }

        outcome
    }

    /// Current contents of a role's ledger
    pub async fn snapshot(&self, role: Role) -> Ledger {
        let _guard = self.lock.lock().await;
        self.ledger_file(role).load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    const IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

    fn allocator(dir: &Path) -> Allocator {
        Allocator::new(
            dir,
            PoolSpec::default_for(Role::ControlPlane),
            PoolSpec::default_for(Role::Worker),
        )
    }

    #[tokio::test]
    async fn test_distinct_nodes_get_disjoint_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());
        let pool = alloc.pool(Role::Worker).clone();

        let mut blocks = Vec::new();
        for i in 0..20 {
            let a = alloc.assign(Role::Worker, &format!("w{}", i), IP).await.unwrap();
            blocks.push(a.block.cidr);
        }

        for (i, a) in blocks.iter().enumerate() {
            assert!(pool.base.contains(a));
            for b in &blocks[i + 1..] {
                assert!(!a.contains(&b.network()) && !b.contains(&a.network()));
            }
        }
    }

    #[tokio::test]
    async fn test_reassign_returns_identical_block() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        let first = alloc.assign(Role::Worker, "node-a", IP).await.unwrap();
        let second = alloc.assign(Role::Worker, "node-a", IP).await.unwrap();

        assert_eq!(
            serde_json::to_vec(&first.block).unwrap(),
            serde_json::to_vec(&second.block).unwrap()
        );
        assert_eq!(alloc.snapshot(Role::Worker).await.len(), 1);
    }

    #[tokio::test]
    async fn test_reassign_with_new_address_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        let first = alloc.assign(Role::Worker, "node-a", IP).await.unwrap();
        let moved = alloc
            .assign(Role::Worker, "node-a", Ipv4Addr::new(198, 51, 100, 9))
            .await
            .unwrap();
        assert_eq!(moved.block, first.block);
    }

    #[tokio::test]
    async fn test_first_worker_block_skips_reserved_subnet() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        let a = alloc.assign(Role::Worker, "w1", IP).await.unwrap();
        assert_eq!(a.block.cidr.to_string(), "10.244.1.0/24");
        assert_eq!(a.block.clasterip, Ipv4Addr::new(10, 244, 1, 0));
    }

    #[tokio::test]
    async fn test_control_plane_block() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        let a = alloc.assign(Role::ControlPlane, "cp1", IP).await.unwrap();
        assert_eq!(a.block.cidr.to_string(), "10.244.0.0/26");
        assert_eq!(a.block.clasterip, Ipv4Addr::new(10, 244, 0, 0));

        let err = tokio_test::assert_err!(alloc.assign(Role::ControlPlane, "cp2", IP).await);
        assert!(matches!(err, AllocError::PoolExhausted { .. }));
        assert!(!alloc.snapshot(Role::ControlPlane).await.contains("cp2"));
    }

    #[tokio::test]
    async fn test_on_disk_order_ignores_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        // z takes .1, a takes .2; then z leaves and a third node refills .1
        alloc.assign(Role::Worker, "z", IP).await.unwrap();
        alloc.assign(Role::Worker, "a", IP).await.unwrap();
        alloc.release("z").await;
        alloc.assign(Role::Worker, "c", IP).await.unwrap();

        let text = std::fs::read_to_string(alloc.ledger_path(Role::Worker)).unwrap();
        let c = text.find("\"c\": {").unwrap();
        let a = text.find("\"a\": {").unwrap();
        assert!(c < a, "c holds 10.244.1.0/24 and must come first:\n{}", text);
    }

    #[tokio::test]
    async fn test_release_unknown_node() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());
        alloc.assign(Role::Worker, "w1", IP).await.unwrap();
        let before = std::fs::read(alloc.ledger_path(Role::Worker)).unwrap();

        let outcome = alloc.release("unknown-node").await;
        assert!(!outcome.found());
        assert_eq!(std::fs::read(alloc.ledger_path(Role::Worker)).unwrap(), before);
        assert!(!alloc.ledger_path(Role::ControlPlane).exists());
    }

    #[tokio::test]
    async fn test_release_frees_subnet_for_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        let first = alloc.assign(Role::Worker, "w1", IP).await.unwrap();
        let outcome = alloc.release("w1").await;
        assert_eq!(outcome.released_from, vec![Role::Worker]);
        assert!(outcome.error_message().is_none());

        let again = alloc.assign(Role::Worker, "w1", IP).await.unwrap();
        assert!(again.created);
        assert_eq!(again.block.cidr, first.block.cidr);
    }

    #[tokio::test]
    async fn test_release_reports_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        // Same name in both ledgers, written directly
        for role in Role::ALL {
            let mut ledger = Ledger::new();
            ledger.assign(alloc.pool(role), "n1", IP).unwrap();
            LedgerFile::new(alloc.ledger_path(role)).save(&ledger).await.unwrap();
        }

        // A directory where the worker temp file goes makes that save fail
        std::fs::create_dir(dir.path().join("worker_map.json.tmp")).unwrap();

        let outcome = alloc.release("n1").await;
        assert!(outcome.found());
        assert_eq!(outcome.released_from, vec![Role::ControlPlane]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, Role::Worker);
        assert!(outcome.error_message().unwrap().starts_with("worker: "));

        assert!(!alloc.snapshot(Role::ControlPlane).await.contains("n1"));
        assert!(alloc.snapshot(Role::Worker).await.contains("n1"));
    }

    #[tokio::test]
    async fn test_role_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());

        tokio_test::assert_ok!(alloc.assign(Role::ControlPlane, "n1", IP).await);
        let err = tokio_test::assert_err!(alloc.assign(Role::Worker, "n1", IP).await);
        assert!(matches!(err, AllocError::RoleConflict { existing: Role::ControlPlane, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_assignments_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = Arc::new(allocator(dir.path()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let alloc = alloc.clone();
            handles.push(tokio::spawn(async move {
                alloc.assign(Role::Worker, &format!("w{}", i), IP).await
            }));
        }

        let mut cidrs = HashSet::new();
        for h in handles {
            let a = h.await.unwrap().unwrap();
            assert!(cidrs.insert(a.block.cidr));
        }
        assert_eq!(alloc.snapshot(Role::Worker).await.len(), 16);
    }
}
