//! Shared constants for Nodegate components.

/// Default Intake API listen address (loopback only)
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5050";

/// Default Intake API port
pub const DEFAULT_INTAKE_PORT: u16 = 5050;

/// Loopback host the forced command always targets
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// SSH port of the dedicated intake sshd
pub const DEFAULT_SSH_PORT: u16 = 3333;

/// Dedicated low-privilege account on the primary node
pub const REMOTE_USER: &str = "ipam-client";

/// Key file name under ~/.ssh on joining nodes
pub const CLIENT_KEY_FILE: &str = "ipam-client.key";

/// Kubeconfig used by every kubectl call on the primary node
pub const DEFAULT_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

/// HTTP client timeout for intake calls (seconds)
pub const CLIENT_TIMEOUT_SECS: u64 = 15;

/// Exit statuses seen across the ssh channel
pub mod exit {
    /// ssh itself failed (connect, auth, host key)
    pub const SSH_FAILURE: i32 = 255;

    /// The gate ran and the call was refused; the answer is on stdout
    pub const GATE_REJECTED: u8 = 65;

    /// Highest status sshpass uses for its own failures
    pub const SSHPASS_MAX: i32 = 6;

    /// sshpass: the password was refused
    pub const SSHPASS_BAD_PASSWORD: i32 = 5;
}

/// Node-local state paths
pub mod paths {
    /// Ledger directory on the primary node
    pub const LEDGER_DIR: &str = "/var/lib/nodegate/maps";

    /// Control-plane ledger file name
    pub const CONTROL_PLANE_LEDGER: &str = "control_plane_map.json";

    /// Worker ledger file name
    pub const WORKER_LEDGER: &str = "worker_map.json";

    /// Typed node facts written during node discovery
    pub const NODE_FACTS: &str = "/var/lib/nodegate/node_facts.json";

    /// Join parameters copied from the primary node
    pub const JOIN_INFO: &str = "/var/lib/nodegate/join_info.json";

    /// Assignment received by a joining node
    pub const ASSIGNMENT: &str = "/var/lib/nodegate/assignment.json";
}

/// Default address pools
pub mod pools {
    use ipnet::Ipv4Net;
    use std::net::Ipv4Addr;

    /// Cluster pod range
    const POD_RANGE: Ipv4Addr = Ipv4Addr::new(10, 244, 0, 0);

    /// Control-plane base pool
    pub const CONTROL_PLANE_BASE: Ipv4Net = Ipv4Net::new_assert(POD_RANGE, 26);

    /// Control-plane subnet prefix length
    pub const CONTROL_PLANE_PREFIX: u8 = 26;

    /// Fixed block control-plane cluster addresses are numbered in
    pub const CONTROL_PLANE_CLUSTER_BLOCK: Ipv4Net = Ipv4Net::new_assert(POD_RANGE, 24);

    /// Worker base pool (full cluster pod range)
    pub const WORKER_BASE: Ipv4Net = Ipv4Net::new_assert(POD_RANGE, 16);

    /// Worker subnet prefix length
    pub const WORKER_PREFIX: u8 = 24;
}

/// Cluster object names
pub mod cluster {
    /// Role label prefix, the role name is appended
    pub const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

    /// CRD owning the network-agent objects
    pub const CILIUM_NODE_CRD: &str = "ciliumnodes.cilium.io";

    /// Resource name of the network-agent object
    pub const CILIUM_NODE_RESOURCE: &str = "ciliumnode";
}

/// Reconciler defaults (seconds)
pub mod reconcile {
    /// Poll interval for schema and object waits
    pub const POLL_INTERVAL_SECS: u64 = 2;

    /// Wait bound for the CRD to appear
    pub const SCHEMA_TIMEOUT_SECS: u64 = 180;

    /// Wait bound for the per-node object to appear
    pub const OBJECT_TIMEOUT_SECS: u64 = 300;

    /// Bound for retrying a patch that hit NotFound
    pub const PATCH_RETRY_TIMEOUT_SECS: u64 = 60;

    /// Timeout for a single kubectl invocation
    pub const KUBECTL_TIMEOUT_SECS: u64 = 30;
}

/// Environment variables
pub mod env {
    /// Set by sshd to the command the client asked for
    pub const SSH_ORIGINAL_COMMAND: &str = "SSH_ORIGINAL_COMMAND";

    /// Join token override for the intake service
    pub const JOIN_TOKEN: &str = "NODEGATE_JOIN_TOKEN";
}
