//! # Intake Client - Nodegate node-side tool
//!
//! One binary, three jobs:
//! - `register` / `delete`: call the Intake API directly
//! - `gate`: the sshd forced command on the primary node
//! - `join` / `leave`: reach the gate over ssh from a joining node
//!
//! Payloads go to stdout; logs go to stderr.

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use nodegate_common::constants::{
    CLIENT_KEY_FILE, DEFAULT_INTAKE_PORT, DEFAULT_SSH_PORT, LOOPBACK_HOST, REMOTE_USER, env, exit,
    paths,
};
use nodegate_common::{DeleteRequest, JoinInfo, NodeFacts, NodeSpec, RegisterRequest, Role};

mod channel;
mod forced;
mod gate;
mod http;

use channel::{Channel, ChannelConfig, ChannelError, Credential, DeleteReply, RemoteCall};
use http::{IntakeClient, Rejection};

/// Nodegate Intake Client
#[derive(Parser, Debug)]
#[command(name = "intake-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a node with the Intake API
    Register(RegisterArgs),

    /// Remove a node through the Intake API
    Delete(DeleteArgs),

    /// Forced command: run the call in SSH_ORIGINAL_COMMAND against the local API
    Gate {
        /// Intake API port on loopback
        #[arg(long, default_value_t = DEFAULT_INTAKE_PORT)]
        port: u16,
    },

    /// Register this node with the primary node over ssh and save the assignment
    Join {
        #[command(flatten)]
        channel: ChannelArgs,

        /// Register under this role instead of requiring a worker node
        #[arg(long)]
        role: Option<Role>,

        /// Where to save the received assignment
        #[arg(long, default_value = paths::ASSIGNMENT)]
        assignment: PathBuf,
    },

    /// Remove this node through the primary node over ssh
    Leave {
        #[command(flatten)]
        channel: ChannelArgs,
    },

    /// Print the authorized_keys entry and sshd_config block for the intake account
    AuthorizedKey {
        /// Public key file of the joining nodes' key pair
        #[arg(long)]
        public_key: PathBuf,

        /// Installed path of this program on the primary node
        #[arg(long, default_value = "/usr/local/bin/intake-client")]
        program: PathBuf,

        /// Intake API port the gate forwards to
        #[arg(long, default_value_t = DEFAULT_INTAKE_PORT)]
        port: u16,
    },
}

/// Intake API endpoint
#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct TargetArgs {
    #[arg(long, default_value = LOOPBACK_HOST)]
    pub host: String,

    #[arg(long, default_value_t = DEFAULT_INTAKE_PORT)]
    pub port: u16,
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long)]
    pub hostname: String,

    #[arg(long)]
    pub ip: Ipv4Addr,

    #[arg(long)]
    pub role: Role,

    #[arg(long)]
    pub token: String,
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long)]
    pub hostname: String,

    #[arg(long)]
    pub role: Option<Role>,

    #[arg(long)]
    pub token: String,
}

/// Node-local inputs for join/leave
#[derive(ClapArgs, Debug)]
struct ChannelArgs {
    /// Node facts file
    #[arg(long, default_value = paths::NODE_FACTS)]
    facts: PathBuf,

    /// Join info file
    #[arg(long, default_value = paths::JOIN_INFO)]
    join_info: PathBuf,

    /// Private key (default ~/.ssh/ipam-client.key)
    #[arg(long)]
    key: Option<PathBuf>,

    /// sshd port of the intake account
    #[arg(long, default_value_t = DEFAULT_SSH_PORT)]
    ssh_port: u16,

    /// ssh connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

impl ChannelArgs {
    fn open(&self, info: &JoinInfo) -> Result<Channel> {
        let key = self.key.clone().unwrap_or_else(default_key_path);
        let credential = Credential::resolve(info, &key)?;

        let mut config = ChannelConfig::new(info.control_plane_ip.clone());
        config.port = self.ssh_port;
        config.user = REMOTE_USER.to_string();
        config.connect_timeout = Duration::from_secs(self.connect_timeout);

        Ok(Channel::new(config, credential))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    match args.command {
        Command::Register(args) => register(&args).await?,
        Command::Delete(args) => delete(&args).await?,
        Command::Gate { port } => return run_gate(port).await,
        Command::Join {
            channel,
            role,
            assignment,
        } => join(&channel, role, &assignment).await?,
        Command::Leave { channel } => leave(&channel).await?,
        Command::AuthorizedKey {
            public_key,
            program,
            port,
        } => {
            let key = std::fs::read_to_string(&public_key)
                .with_context(|| format!("Failed to read {}", public_key.display()))?;
            println!("{}", forced::authorized_key_line(&key, &program, port)?);
            println!();
            print!("{}", forced::sshd_match_block(REMOTE_USER, &program, port));
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn register(args: &RegisterArgs) -> Result<()> {
    let client = IntakeClient::new(&args.target.host, args.target.port)?;
    let request = RegisterRequest::new(&args.hostname, args.ip, args.role, &args.token);
    let block = client.register(&request).await?;
    println!("{}", serde_json::to_string_pretty(&block)?);
    Ok(())
}

async fn delete(args: &DeleteArgs) -> Result<()> {
    let client = IntakeClient::new(&args.target.host, args.target.port)?;
    let request = DeleteRequest {
        node: Some(NodeSpec {
            hostname: Some(args.hostname.clone()),
            ip: None,
            role: args.role.map(|r| r.to_string()),
        }),
        token: Some(args.token.clone()),
    };
    let response = client.delete(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Forced command. A refused call prints the answer as JSON on stdout and
/// exits with `exit::GATE_REJECTED`, so the caller can tell it from an ssh
/// failure.
async fn run_gate(port: u16) -> Result<ExitCode> {
    let original = std::env::var(env::SSH_ORIGINAL_COMMAND).unwrap_or_default();

    let call = match gate::parse(&original, port) {
        Ok(call) => call,
        Err(e) => {
            tracing::warn!(error = %e, "Gate rejected command");
            println!("{}", serde_json::to_string(&e.to_body())?);
            return Ok(ExitCode::from(exit::GATE_REJECTED));
        }
    };

    let result = match call {
        gate::GateCall::Register(ref args) => {
            info!(node = %args.hostname, role = %args.role, "Gate forwarding register");
            register(args).await
        }
        gate::GateCall::Delete(ref args) => {
            info!(node = %args.hostname, "Gate forwarding delete");
            delete(args).await
        }
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<Rejection>() {
            Some(rejection) => {
                tracing::warn!(status = rejection.status, error = %rejection, "Intake refused the call");
                println!("{}", rejection.json_body());
                Ok(ExitCode::from(exit::GATE_REJECTED))
            }
            None => Err(e),
        },
    }
}

/// Log a channel failure by kind: transport problems and refusals by the
/// Intake API are reported differently
fn log_channel_error(action: &str, node: &str, primary: &str, err: &ChannelError) {
    match err {
        ChannelError::Remote { status, body } => tracing::error!(
            node = node,
            primary = primary,
            exit = ?status,
            response = %body,
            "{} refused by intake",
            action
        ),
        ChannelError::Credential(_) | ChannelError::Connection { .. } => tracing::error!(
            node = node,
            primary = primary,
            error = %err,
            "{} failed: cannot reach the primary node",
            action
        ),
        ChannelError::Payload(_) => tracing::error!(
            node = node,
            primary = primary,
            error = %err,
            "{} failed: unusable answer from the primary node",
            action
        ),
    }
}

async fn join(args: &ChannelArgs, role: Option<Role>, assignment: &Path) -> Result<()> {
    let facts = NodeFacts::load(&args.facts)?;
    let join_info = JoinInfo::load(&args.join_info)?;

    let role = match role {
        Some(role) => role,
        None if facts.role == Role::Worker => Role::Worker,
        None => bail!(
            "{} is a {} node; join registers worker nodes (pass --role to override)",
            facts.hostname,
            facts.role
        ),
    };

    let channel = args.open(&join_info)?;
    let call = RemoteCall::Register {
        hostname: facts.hostname.clone(),
        ip: facts.ip,
        role,
        token: join_info.join_token.clone(),
    };

    let block = channel.register(&call).await.map_err(|e| {
        log_channel_error("Join", &facts.hostname, &join_info.control_plane_ip, &e);
        e
    })?;

    let json = serde_json::to_string_pretty(&block)?;
    if let Some(dir) = assignment.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(assignment, format!("{}\n", json))
        .with_context(|| format!("Failed to save assignment to {}", assignment.display()))?;

    info!(node = %block.name, cidr = %block.cidr, path = ?assignment, "Assignment saved");
    println!("{}", json);
    Ok(())
}

async fn leave(args: &ChannelArgs) -> Result<()> {
    let facts = NodeFacts::load(&args.facts)?;
    let join_info = JoinInfo::load(&args.join_info)?;

    let channel = args.open(&join_info)?;
    let call = RemoteCall::Delete {
        hostname: facts.hostname.clone(),
        role: facts.role,
        token: join_info.join_token.clone(),
    };

    let reply = channel.delete(&call).await.map_err(|e| {
        log_channel_error("Leave", &facts.hostname, &join_info.control_plane_ip, &e);
        if let ChannelError::Remote { ref body, .. } = e {
            println!("{}", body);
        }
        e
    })?;

    match reply {
        DeleteReply::Response(response) => println!("{}", serde_json::to_string_pretty(&response)?),
        DeleteReply::Plain(text) => println!("{}", text),
    }
    Ok(())
}

fn default_key_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"));
    home.join(".ssh").join(CLIENT_KEY_FILE)
}

/// Initialize structured logging on stderr
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
