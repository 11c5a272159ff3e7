//! Typed node-local bootstrap state.
//!
//! Node discovery writes `node_facts.json` on every node; the primary node
//! writes `join_info.json`, which is copied to joining nodes. Both files are
//! JSON objects. Upper-case keys (`HOSTNAME`, `JOIN_TOKEN`, ...) are accepted
//! as aliases. Every field is validated when the file is loaded.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::NodegateError;
use crate::types::{Role, validate_hostname};

#[derive(Debug, Deserialize)]
struct RawNodeFacts {
    #[serde(default, alias = "HOSTNAME")]
    hostname: Option<String>,
    #[serde(default, alias = "IP")]
    ip: Option<String>,
    #[serde(default, alias = "ROLE")]
    role: Option<String>,
}

/// Facts about the local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFacts {
    pub hostname: String,
    pub ip: Ipv4Addr,
    pub role: Role,
}

impl NodeFacts {
    /// Load and validate a node facts file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodegateError> {
        let path = path.as_ref();
        let text = read_file(path, "node facts")?;
        Self::from_json(&text)
            .map_err(|e| NodegateError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate node facts from JSON text
    pub fn from_json(text: &str) -> Result<Self, NodegateError> {
        let raw: RawNodeFacts = serde_json::from_str(text)
            .map_err(|e| NodegateError::Config(format!("malformed node facts: {}", e)))?;

        let hostname = required(raw.hostname, "hostname")?;
        validate_hostname(&hostname)?;

        let ip_text = required(raw.ip, "ip")?;
        let ip = ip_text
            .parse::<Ipv4Addr>()
            .map_err(|_| NodegateError::InvalidInput(format!("ip '{}' is not IPv4", ip_text)))?;

        let role = required(raw.role, "role")?.parse::<Role>()?;

        Ok(Self { hostname, ip, role })
    }
}

#[derive(Debug, Deserialize)]
struct RawJoinInfo {
    #[serde(default, alias = "CONTROL_PLANE_IP")]
    control_plane_ip: Option<String>,
    #[serde(default, alias = "JOIN_TOKEN")]
    join_token: Option<String>,
    #[serde(default, alias = "IPAM_PASSWORD")]
    ipam_password: Option<String>,
}

/// Parameters a node needs to reach the primary node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Address of the primary node
    pub control_plane_ip: String,
    /// Shared join secret
    pub join_token: String,
    /// Password for the degraded password mode
    pub ipam_password: Option<String>,
}

impl JoinInfo {
    /// Load and validate a join info file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodegateError> {
        let path = path.as_ref();
        let text = read_file(path, "join info")?;
        Self::from_json(&text)
            .map_err(|e| NodegateError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate join info from JSON text
    pub fn from_json(text: &str) -> Result<Self, NodegateError> {
        let raw: RawJoinInfo = serde_json::from_str(text)
            .map_err(|e| NodegateError::Config(format!("malformed join info: {}", e)))?;

        let control_plane_ip = required(raw.control_plane_ip, "control_plane_ip")?;
        if control_plane_ip.starts_with('-') || control_plane_ip.contains(char::is_whitespace) {
            return Err(NodegateError::InvalidInput(format!(
                "control_plane_ip '{}' is not a host",
                control_plane_ip
            )));
        }

        let join_token = required(raw.join_token, "join_token")?;

        Ok(Self {
            control_plane_ip,
            join_token,
            ipam_password: raw.ipam_password,
        })
    }

    /// Password to use, if password mode is configured
    pub fn password(&self) -> Option<&str> {
        self.ipam_password
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

fn read_file(path: &Path, what: &str) -> Result<String, NodegateError> {
    std::fs::read_to_string(path).map_err(|e| {
        NodegateError::Config(format!("cannot read {} file {}: {}", what, path.display(), e))
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, NodegateError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(NodegateError::InvalidInput(format!("missing field '{}'", field))),
    }
}
