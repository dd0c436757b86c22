//! Idempotent building blocks for managed hosts.
//!
//! Every leaf resource here implements both [Applier] and [Configuration] (with itself as the
//! applier and no children), so it can be dropped straight into a tree. The composites ([File],
//! [Directory], [Service]) have no applier of their own and expand into ordered leaves.
//!
//! Remote resources talk to their host through an [Arc<dyn Transport>](Transport). Their probes
//! follow one rule: a probe command that exits non-zero ([crate::network::Error::Command]) means
//! "not satisfied", while any other transport error means the question could not be asked and is
//! returned as an error.

#[cfg(doc)]
use crate::core::{Applier, Configuration};
use crate::network::Transport;
use anyhow::{anyhow, bail};
use regex::Regex;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod chmod;
pub mod chown;
pub mod command;
pub mod directory;
pub mod file;
pub mod iptables;
pub mod local;
pub mod service;

pub use chmod::Chmod;
pub use chown::Chown;
pub use command::RemoteCommand;
pub use directory::{Directory, DirectoryExists};
pub use file::{File, FileContent};
pub use iptables::IptablesRule;
pub use local::LocalCommand;
pub use service::{Service, ServiceRunning};

/// Runs a probe command. Returns `false` if it exited non-zero.
pub(crate) async fn probe(
    transport: &dyn Transport,
    cancel: &CancellationToken,
    command: &str,
) -> anyhow::Result<bool> {
    match transport.run_command(cancel, command).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_command_failure() => {
            debug!(%command, "probe answered no");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs a probe command and returns its trimmed stdout, or `None` if it exited non-zero.
pub(crate) async fn probe_output(
    transport: &dyn Transport,
    cancel: &CancellationToken,
    command: &str,
) -> anyhow::Result<Option<String>> {
    match transport.run_command_stdout(cancel, command).await {
        Ok(stdout) => Ok(Some(String::from_utf8_lossy(&stdout).trim().to_owned())),
        Err(e) if e.is_command_failure() => {
            debug!(%command, "probe answered no");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Checks that `path` is absolute and can be embedded in a single-quoted shell word.
pub(crate) fn validate_path(path: &str) -> anyhow::Result<()> {
    if path.is_empty() {
        bail!("path is empty");
    }
    if !path.starts_with('/') {
        bail!("path is not absolute: {path}");
    }
    if path.contains('\'') {
        bail!("path contains a single quote: {path}");
    }
    if path.contains('\0') || path.contains('\n') {
        bail!("path contains a control character: {path:?}");
    }
    Ok(())
}

/// Checks a user or group name.
pub(crate) fn validate_account(kind: &str, name: &str) -> anyhow::Result<()> {
    static ACCOUNT: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    if name.is_empty() {
        bail!("{kind} is empty");
    }
    if !matches(&ACCOUNT, r"^[a-z_][a-z0-9_-]*$", name)? {
        bail!("invalid {kind} name: {name}");
    }
    Ok(())
}

/// Checks a systemd unit name.
pub(crate) fn validate_service(name: &str) -> anyhow::Result<()> {
    static SERVICE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    if name.is_empty() {
        bail!("service name is empty");
    }
    if !matches(&SERVICE, r"^[a-zA-Z0-9_@.-]+$", name)? {
        bail!("invalid service name: {name}");
    }
    Ok(())
}

/// Checks that `mode` fits in the permission and special bits.
pub(crate) fn validate_mode(mode: u32) -> anyhow::Result<()> {
    if mode > 0o7777 {
        bail!("mode {mode:o} is out of range");
    }
    Ok(())
}

/// Compiles `pattern` into `cell` on first use and matches `value` against it.
pub(crate) fn matches(
    cell: &OnceLock<Result<Regex, regex::Error>>,
    pattern: &str,
    value: &str,
) -> anyhow::Result<bool> {
    let regex = cell
        .get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|e| anyhow!("invalid pattern {pattern}: {e}"))?;
    Ok(regex.is_match(value))
}

/// Checks the transport's connection parameters.
pub(crate) fn validate_transport(transport: &dyn Transport) -> anyhow::Result<()> {
    Ok(transport.validate()?)
}
