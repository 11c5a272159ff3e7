//! In-memory cluster used by tests.

use async_trait::async_trait;
use nodegate_common::Role;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::{ClusterControl, ClusterError, CrdState};

/// Scripted failure for the next patch calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFailure {
    NotFound,
    Other,
}

#[derive(Default)]
struct State {
    nodes: HashSet<String>,
    labels: Vec<(String, Role)>,
    crd: Option<CrdState>,
    crd_established_after: Option<usize>,
    crd_probes: usize,
    objects: HashSet<(String, String)>,
    appear_after: HashMap<String, usize>,
    object_probes: HashMap<String, usize>,
    patch_failures: VecDeque<PatchFailure>,
    patches: Vec<(String, String, Value)>,
    fail_label: bool,
    fail_delete: bool,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_node(&self, name: &str) {
        self.with(|s| s.nodes.insert(name.to_string()));
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.with(|s| s.nodes.contains(name))
    }

    pub fn set_crd(&self, state: CrdState) {
        self.with(|s| s.crd = Some(state));
    }

    /// CRD reports `Present` until probed `n` times, then `Established`
    pub fn establish_crd_after(&self, n: usize) {
        self.with(|s| {
            s.crd = Some(CrdState::Present);
            s.crd_established_after = Some(n);
        });
    }

    pub fn add_object(&self, kind: &str, name: &str) {
        self.with(|s| s.objects.insert((kind.to_string(), name.to_string())));
    }

    /// Object of `kind` becomes visible on the `n`th existence probe
    pub fn object_appears_after(&self, kind: &str, name: &str, n: usize) {
        self.with(|s| {
            s.appear_after.insert(format!("{}/{}", kind, name), n);
        });
    }

    pub fn fail_next_patches(&self, failures: &[PatchFailure]) {
        self.with(|s| s.patch_failures.extend(failures.iter().copied()));
    }

    pub fn fail_labels(&self) {
        self.with(|s| s.fail_label = true);
    }

    pub fn fail_deletes(&self) {
        self.with(|s| s.fail_delete = true);
    }

    pub fn labels(&self) -> Vec<(String, Role)> {
        self.with(|s| s.labels.clone())
    }

    pub fn patches(&self) -> Vec<(String, String, Value)> {
        self.with(|s| s.patches.clone())
    }
}

#[async_trait]
impl ClusterControl for FakeCluster {
    async fn label_node(&self, node: &str, role: Role) -> Result<(), ClusterError> {
        self.with(|s| {
            if s.fail_label {
                return Err(ClusterError::Command {
                    action: "label node".into(),
                    code: Some(1),
                    stderr: "connection refused".into(),
                });
            }
            s.labels.push((node.to_string(), role));
            Ok(())
        })
    }

    async fn delete_node(&self, node: &str) -> Result<(), ClusterError> {
        self.with(|s| {
            if s.fail_delete {
                return Err(ClusterError::Command {
                    action: "delete node".into(),
                    code: Some(1),
                    stderr: "connection refused".into(),
                });
            }
            if s.nodes.remove(node) {
                Ok(())
            } else {
                Err(ClusterError::NotFound(format!("nodes \"{}\" not found", node)))
            }
        })
    }

    async fn crd_state(&self, _crd: &str) -> Result<CrdState, ClusterError> {
        self.with(|s| {
            s.crd_probes += 1;
            if let Some(n) = s.crd_established_after {
                if s.crd_probes >= n {
                    s.crd = Some(CrdState::Established);
                }
            }
            Ok(s.crd.unwrap_or(CrdState::Missing))
        })
    }

    async fn object_exists(&self, kind: &str, name: &str) -> Result<bool, ClusterError> {
        self.with(|s| {
            let key = format!("{}/{}", kind, name);
            let probes = s.object_probes.entry(key.clone()).or_insert(0);
            *probes += 1;
            if let Some(&n) = s.appear_after.get(&key) {
                if *probes >= n {
                    s.objects.insert((kind.to_string(), name.to_string()));
                }
            }
            Ok(s.objects.contains(&(kind.to_string(), name.to_string())))
        })
    }

    async fn merge_patch(&self, kind: &str, name: &str, patch: &Value) -> Result<(), ClusterError> {
        self.with(|s| {
            if kind != "node" {
                match s.patch_failures.pop_front() {
                    Some(PatchFailure::NotFound) => {
                        return Err(ClusterError::NotFound(format!("{} \"{}\" not found", kind, name)));
                    }
                    Some(PatchFailure::Other) => {
                        return Err(ClusterError::Command {
                            action: "patch".into(),
                            code: Some(1),
                            stderr: "admission webhook denied the request".into(),
                        });
                    }
                    None => {}
                }
            }
            s.patches.push((kind.to_string(), name.to_string(), patch.clone()));
            Ok(())
        })
    }
}
