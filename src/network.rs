//! The public API for running commands on managed hosts. Does not contain a network
//! implementation.
//!
//! Every resource in [crate::core::resource] talks to its host through a [Transport]: one shell
//! command per call, run with root privileges, with optional stdin (uploads) or captured stdout
//! (probes).
//!
//! # Implementing non-SSH transports
//!
//! The reference implementation, [openssh::SshTransport], opens a fresh SSH session per call.
//! Anything that ultimately yields a POSIX shell running as root can implement [Transport]; the
//! resources only depend on the exit status and stdout of the commands they send. Commands are
//! handed to [Transport] methods unwrapped; privilege escalation is the transport's job (see
//! [wrap]).
//!
//! # Exit status is the protocol
//!
//! A command that ran and exited non-zero is reported as [Error::Command]. Probes rely on this
//! to tell "the answer is no" apart from "the question could not be asked" (any other variant).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
#[cfg(feature = "openssh")]
pub mod openssh;

/// Boxed error from a transport backend, e.g. [::openssh::Error].
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Runs shell commands on one managed host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs `command` and waits for it to exit.
    async fn run_command(&self, cancel: &CancellationToken, command: &str) -> Result<(), Error>;

    /// Runs `command`, writing `stdin` to its standard input while it runs.
    ///
    /// Typically used to upload file contents with `cat > <path>`.
    async fn run_command_stdin(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdin: &[u8],
    ) -> Result<(), Error>;

    /// Runs `command` and returns everything it wrote to standard output.
    async fn run_command_stdout(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<Vec<u8>, Error>;

    /// Checks the connection parameters without connecting.
    fn validate(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Connection parameters for a managed host.
///
/// Owned by the caller and never modified by converge.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Host {
    /// Network name or IP address.
    pub address: String,

    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The user converge logs in as. Must be allowed to run `sudo sh` without a password.
    pub user: String,

    /// Path to the OpenSSH private key used to log in.
    pub private_key: PathBuf,
}

fn default_port() -> u16 {
    22
}

impl Host {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        private_key: impl Into<PathBuf>,
    ) -> Self {
        Host {
            address: address.into(),
            port,
            user: user.into(),
            private_key: private_key.into(),
        }
    }

    /// Checks that every field is set. Does not touch the network or the key file.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: &str| Err(Error::InvalidHost(reason.to_owned()));
        if self.address.trim().is_empty() {
            return invalid("address is empty");
        }
        // u16 already caps the upper bound.
        if self.port == 0 {
            return invalid("port must be in 1..=65535");
        }
        if self.user.trim().is_empty() {
            return invalid("user is empty");
        }
        if self.private_key.as_os_str().is_empty() {
            return invalid("private key path is empty");
        }
        Ok(())
    }
}

/// Errors returned by [Transport] implementations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The [Host] is missing a required field.
    #[error("invalid host: {0}")]
    InvalidHost(String),

    /// The private key could not be loaded.
    #[error("failed to load private key {}", .path.display())]
    Signer {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The SSH connection could not be established.
    #[error("failed to connect to {host}")]
    Connect {
        host: String,
        #[source]
        source: BackendError,
    },

    /// The connection was up, but running the command on it failed.
    #[error("failed to run command on session: {command}")]
    Session {
        command: String,
        #[source]
        source: BackendError,
    },

    /// The command's standard input could not be written.
    #[error("failed to write stdin of command: {command}")]
    Stdin {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("command exited with {}: {command}", exit_message(.code.clone()))]
    Command { command: String, code: Option<i32> },

    /// The cancellation token fired before the command finished.
    #[error("command cancelled: {command}")]
    Cancelled { command: String },
}

impl Error {
    /// Whether this is [Error::Command], i.e. the host answered with a non-zero exit status.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Error::Command { .. })
    }
}

/// Describes an exit code for error output.
pub fn exit_message(code: Option<i32>) -> String {
    match code {
        Some(i) => format!("exit code {i}"),
        None => "error".to_string(),
    }
}

/// Wraps `command` for execution as root under a POSIX shell with a fixed locale.
///
/// The result is `sudo sh -c 'export LANG=C; <command>' <marker>`. `marker` becomes `$0` of the
/// remote shell, which lets a transport find and kill the process if the caller gives up on it.
/// `marker` must not need quoting.
pub fn wrap(command: &str, marker: &str) -> String {
    format!(
        "sudo sh -c {} {marker}",
        single_quote(&format!("export LANG=C; {command}"))
    )
}

/// Quotes `s` for a POSIX shell using single quotes.
pub fn single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quotes a path (or any other single word) for use in a command, leaving plain words untouched.
pub fn quote(word: &str) -> String {
    match shlex::try_quote(word) {
        Ok(quoted) => quoted.into_owned(),
        // Only nul bytes are rejected; single quotes are still correct for everything else.
        Err(_) => single_quote(&word.replace('\0', "")),
    }
}
