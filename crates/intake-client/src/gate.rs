//! Forced-command gate.
//!
//! sshd runs `intake-client gate --port <p>` for every connection of the
//! intake account and puts what the client asked for in
//! `SSH_ORIGINAL_COMMAND`. The gate accepts only `register` and `delete`,
//! and always calls the Intake API on loopback at its own port.

use clap::{Parser, Subcommand};
use nodegate_common::ErrorBody;
use nodegate_common::constants::LOOPBACK_HOST;
use thiserror::Error;

use crate::{DeleteArgs, RegisterArgs};

/// Characters that never appear in a legitimate call
const SHELL_META: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '\\', '\'', '"', '*', '?', '[', ']', '{', '}',
    '~', '!', '#', '\n', '\r',
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("no command given")]
    Empty,

    #[error("command contains forbidden character {0:?}")]
    Forbidden(char),

    #[error("command '{0}' is not allowed")]
    NotAllowed(String),

    #[error("invalid arguments: {0}")]
    Arguments(String),
}

impl GateError {
    /// Answer sent back over the channel
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: "rejected".into(),
            detail: Some(self.to_string()),
        }
    }
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct RemoteArgs {
    #[command(subcommand)]
    call: GateCall,
}

/// A call accepted by the gate
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum GateCall {
    Register(RegisterArgs),
    Delete(DeleteArgs),
}

impl GateCall {
    /// Point the call at the local Intake API
    fn pin(&mut self, port: u16) {
        let (host, call_port) = match self {
            Self::Register(args) => (&mut args.target.host, &mut args.target.port),
            Self::Delete(args) => (&mut args.target.host, &mut args.target.port),
        };

        if host.as_str() != LOOPBACK_HOST || *call_port != port {
            tracing::warn!(
                requested_host = %host,
                requested_port = *call_port,
                "Ignoring requested target, using loopback"
            );
        }
        *host = LOOPBACK_HOST.to_string();
        *call_port = port;
    }
}

/// Parse an `SSH_ORIGINAL_COMMAND` value into a call pinned to
/// `127.0.0.1:<port>`
pub fn parse(original: &str, port: u16) -> Result<GateCall, GateError> {
    let command = original.trim();
    if command.is_empty() {
        return Err(GateError::Empty);
    }

    if let Some(c) = command.chars().find(|c| SHELL_META.contains(c)) {
        return Err(GateError::Forbidden(c));
    }

    let words: Vec<&str> = command.split_whitespace().collect();
    let verb = words[0];
    if verb != "register" && verb != "delete" {
        return Err(GateError::NotAllowed(verb.to_string()));
    }

    let mut call = RemoteArgs::try_parse_from(words.iter().copied())
        .map_err(|e| GateError::Arguments(e.to_string().trim().to_string()))?
        .call;

    call.pin(port);
    Ok(call)
}
