//! Core types shared across Nodegate components.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::NodegateError;
use crate::constants::{cluster::ROLE_LABEL_PREFIX, paths};

/// Node role. Each role has its own address pool and ledger.
///
/// The primary role is spelled `control-plane` on the wire; `primary` is
/// accepted as an input alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "control-plane", alias = "primary")]
    ControlPlane,
    #[serde(rename = "worker")]
    Worker,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::ControlPlane, Role::Worker];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Worker => "worker",
        }
    }

    /// Node label marking this role, e.g. `node-role.kubernetes.io/worker`
    pub fn label_key(&self) -> String {
        format!("{}{}", ROLE_LABEL_PREFIX, self.as_str())
    }

    /// File name of this role's ledger
    pub fn ledger_file(&self) -> &'static str {
        match self {
            Self::ControlPlane => paths::CONTROL_PLANE_LEDGER,
            Self::Worker => paths::WORKER_LEDGER,
        }
    }

    /// The other role
    pub fn other(&self) -> Role {
        match self {
            Self::ControlPlane => Self::Worker,
            Self::Worker => Self::ControlPlane,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = NodegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "control-plane" | "primary" => Ok(Self::ControlPlane),
            "worker" => Ok(Self::Worker),
            other => Err(NodegateError::InvalidInput(format!(
                "unknown role '{}' (expected control-plane or worker)",
                other
            ))),
        }
    }
}

/// An address block assigned to one node.
///
/// Field names follow the ledger files and HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBlock {
    /// Role whose pool the block came from
    pub role: Role,

    /// Node name (hostname)
    pub name: String,

    /// Node's global (host) address
    pub globalip: Ipv4Addr,

    /// Assigned pod subnet
    pub cidr: Ipv4Net,

    /// Cluster address of the node inside its block
    pub clasterip: Ipv4Addr,
}

/// Node description inside register/delete bodies.
///
/// Every field is optional so the API can answer 400 for missing fields
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// `POST /register` body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl RegisterRequest {
    pub fn new(hostname: &str, ip: Ipv4Addr, role: Role, token: &str) -> Self {
        Self {
            node: Some(NodeSpec {
                hostname: Some(hostname.to_string()),
                ip: Some(ip.to_string()),
                role: Some(role.to_string()),
            }),
            token: Some(token.to_string()),
        }
    }
}

/// `POST /delete` body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl DeleteRequest {
    pub fn new(hostname: &str, role: Role, token: &str) -> Self {
        Self {
            node: Some(NodeSpec {
                hostname: Some(hostname.to_string()),
                ip: None,
                role: Some(role.to_string()),
            }),
            token: Some(token.to_string()),
        }
    }
}

/// Overall result of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    /// The node held a block that was released
    Ok,
    /// No ledger held the node
    NotFound,
}

/// `POST /delete` response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: DeleteStatus,

    /// Node name the request was about
    pub node: String,

    /// Whether the Node object is gone from the cluster
    pub node_removed: bool,

    /// Roles whose ledger dropped the node
    pub released_from: Vec<Role>,

    /// Ledger release failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_error: Option<String>,
}

/// Error body returned by the Intake API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Check that a node name is safe to use as a cluster object name and as a
/// command argument.
pub fn validate_hostname(name: &str) -> Result<(), NodegateError> {
    if name.is_empty() || name.len() > 253 {
        return Err(NodegateError::InvalidInput(format!(
            "hostname must be 1-253 characters, got {}",
            name.len()
        )));
    }
    if name.starts_with(['-', '.']) {
        return Err(NodegateError::InvalidInput(format!(
            "hostname '{}' must start with an alphanumeric character",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(NodegateError::InvalidInput(format!(
            "hostname '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}
