//! kubectl-backed cluster control.
//!
//! Each call spawns `kubectl` with an explicit kubeconfig, captures its
//! output, and classifies failures. "NotFound" class errors are reported as
//! [`ClusterError::NotFound`] so callers can tell a race from a real failure.

use async_trait::async_trait;
use nodegate_common::Role;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{ClusterControl, ClusterError, CrdState};

/// kubectl client
#[derive(Debug, Clone)]
pub struct Kubectl {
    /// kubectl binary
    program: PathBuf,
    /// Kubeconfig passed with every call (kubectl's default when None)
    kubeconfig: Option<PathBuf>,
    /// Per-call timeout
    timeout: Duration,
}

impl Kubectl {
    pub fn new(program: impl Into<PathBuf>, kubeconfig: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            kubeconfig,
            timeout,
        }
    }

    /// Run kubectl and return stdout
    async fn execute(&self, action: &str, args: &[&str]) -> Result<String, ClusterError> {
        let mut cmd = Command::new(&self.program);
        if let Some(ref kubeconfig) = self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(action = action, args = ?args, "Running kubectl");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ClusterError::Timeout {
                action: action.to_string(),
                timeout: self.timeout,
            })??;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(action, output.status.code(), stderr))
    }
}

/// Map a failed kubectl call to an error class.
///
/// A missing resource type counts as NotFound: the CRD may not be served yet.
fn classify_failure(action: &str, code: Option<i32>, stderr: String) -> ClusterError {
    let not_found = stderr.contains("NotFound")
        || stderr.contains("not found")
        || stderr.contains("doesn't have a resource type");

    if not_found {
        ClusterError::NotFound(format!("{}: {}", action, stderr))
    } else {
        ClusterError::Command {
            action: action.to_string(),
            code,
            stderr,
        }
    }
}

#[async_trait]
impl ClusterControl for Kubectl {
    async fn label_node(&self, node: &str, role: Role) -> Result<(), ClusterError> {
        let label = format!("{}=true", role.label_key());
        self.execute("label node", &["label", "node", node, &label, "--overwrite"])
            .await?;
        tracing::info!(node = node, label = %label, "Node labeled");
        Ok(())
    }

    async fn delete_node(&self, node: &str) -> Result<(), ClusterError> {
        self.execute("delete node", &["delete", "node", node]).await?;
        tracing::info!(node = node, "Node deleted from cluster");
        Ok(())
    }

    async fn crd_state(&self, crd: &str) -> Result<CrdState, ClusterError> {
        let result = self
            .execute(
                "get crd",
                &[
                    "get",
                    "crd",
                    crd,
                    "-o",
                    r#"jsonpath={.status.conditions[?(@.type=="Established")].status}"#,
                ],
            )
            .await;

        match result {
            Ok(status) if status == "True" => Ok(CrdState::Established),
            Ok(_) => Ok(CrdState::Present),
            Err(e) if e.is_not_found() => Ok(CrdState::Missing),
            Err(e) => Err(e),
        }
    }

    async fn object_exists(&self, kind: &str, name: &str) -> Result<bool, ClusterError> {
        match self.execute("get object", &["get", kind, name, "-o", "name"]).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn merge_patch(&self, kind: &str, name: &str, patch: &Value) -> Result<(), ClusterError> {
        let body = patch.to_string();
        self.execute("patch", &["patch", kind, name, "--type=merge", "-p", &body])
            .await?;
        tracing::debug!(kind = kind, name = name, patch = %body, "Patched object");
        Ok(())
    }
}
