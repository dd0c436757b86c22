use super::{probe, validate_transport};
use crate::core::{Applier, Children, Configuration};
use crate::network::Transport;
use anyhow::bail;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An arbitrary shell command on the host.
///
/// Without a probe the command is never satisfied and runs on every apply, so it should be
/// idempotent by itself. With a probe it runs only while the probe exits non-zero.
#[derive(Clone)]
pub struct RemoteCommand {
    transport: Arc<dyn Transport>,
    command: String,
    probe: Option<String>,
}

impl RemoteCommand {
    pub fn new(transport: Arc<dyn Transport>, command: impl Into<String>) -> Self {
        RemoteCommand {
            transport,
            command: command.into(),
            probe: None,
        }
    }

    /// Skips the command while `probe` exits zero.
    pub fn unless(mut self, probe: impl Into<String>) -> Self {
        self.probe = Some(probe.into());
        self
    }
}

#[async_trait]
impl Applier for RemoteCommand {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        match &self.probe {
            Some(command) => probe(self.transport.as_ref(), cancel, command).await,
            None => Ok(false),
        }
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.transport.run_command(cancel, &self.command).await?;
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        if self.command.trim().is_empty() {
            bail!("command is empty");
        }
        if matches!(&self.probe, Some(probe) if probe.trim().is_empty()) {
            bail!("probe is empty");
        }
        validate_transport(self.transport.as_ref())
    }
}

impl Configuration for RemoteCommand {
    fn name(&self) -> String {
        format!("RemoteCommand({})", self.command)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("command", &self.command)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}
