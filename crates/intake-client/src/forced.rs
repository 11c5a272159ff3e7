//! authorized_keys and sshd_config rendering for the intake account.

use anyhow::{Result, bail};
use std::path::Path;

/// Key types accepted in an authorized_keys entry
const KEY_TYPES: [&str; 5] = [
    "ssh-ed25519",
    "ssh-rsa",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
];

fn gate_command(program: &Path, port: u16) -> String {
    format!("{} gate --port {}", program.display(), port)
}

/// authorized_keys line pinning `public_key` to the gate
pub fn authorized_key_line(public_key: &str, program: &Path, port: u16) -> Result<String> {
    let key = public_key.trim();
    if key.lines().count() != 1 {
        bail!("expected exactly one public key line");
    }

    let mut fields = key.split_whitespace();
    let (Some(kind), Some(blob)) = (fields.next(), fields.next()) else {
        bail!("public key must be '<type> <base64> [comment]'");
    };
    if !KEY_TYPES.contains(&kind) {
        bail!("unsupported or already-restricted key type '{}'", kind);
    }

    let program = program.display().to_string();
    if program.contains(['"', ' ', '\\']) {
        bail!("gate program path '{}' must not contain quotes, spaces, or backslashes", program);
    }

    Ok(format!(
        "command=\"{}\",no-port-forwarding,no-X11-forwarding,no-agent-forwarding,no-pty,restrict {}",
        gate_command(Path::new(&program), port),
        [kind, blob].into_iter().chain(fields).collect::<Vec<_>>().join(" ")
    ))
}

/// sshd_config block for the intake account
pub fn sshd_match_block(user: &str, program: &Path, port: u16) -> String {
    format!(
        "Match User {}\n    ForceCommand {}\n    AllowTcpForwarding no\n    PermitTTY no\n    X11Forwarding no\n",
        user,
        gate_command(program, port)
    )
}
