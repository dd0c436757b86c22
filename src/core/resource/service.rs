use super::{probe, validate_service, validate_transport};
use crate::core::{Applier, Children, Configuration};
use crate::network::{quote, Transport};
use anyhow::Context;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A systemd unit that is both enabled and active.
///
/// Applying starts the unit, then enables it. If starting succeeds and enabling fails, the unit
/// is left running and the error is returned; the next run picks up where this one stopped.
#[derive(Clone)]
pub struct ServiceRunning {
    transport: Arc<dyn Transport>,
    name: String,
}

impl ServiceRunning {
    pub fn new(transport: Arc<dyn Transport>, name: impl Into<String>) -> Self {
        ServiceRunning {
            transport,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Applier for ServiceRunning {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let name = quote(&self.name);
        let transport = self.transport.as_ref();
        if !probe(transport, cancel, &format!("systemctl is-enabled {name}")).await? {
            return Ok(false);
        }
        probe(transport, cancel, &format!("systemctl is-active --quiet {name}")).await
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let name = quote(&self.name);
        self.transport
            .run_command(cancel, &format!("systemctl start {name}"))
            .await
            .with_context(|| format!("failed to start {}", self.name))?;
        self.transport
            .run_command(cancel, &format!("systemctl enable {name}"))
            .await
            .with_context(|| format!("failed to enable {}", self.name))?;
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        validate_service(&self.name)?;
        validate_transport(self.transport.as_ref())
    }
}

impl Configuration for ServiceRunning {
    fn name(&self) -> String {
        format!("ServiceRunning({})", self.name)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for ServiceRunning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRunning")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named service. Expands to [ServiceRunning].
#[derive(Clone)]
pub struct Service {
    transport: Arc<dyn Transport>,
    name: String,
}

impl Service {
    pub fn new(transport: Arc<dyn Transport>, name: impl Into<String>) -> Self {
        Service {
            transport,
            name: name.into(),
        }
    }
}

impl Configuration for Service {
    fn name(&self) -> String {
        format!("Service({})", self.name)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(None)
    }

    fn children(&self) -> anyhow::Result<Children> {
        let mut children = Children::new();
        children.push(ServiceRunning::new(self.transport.clone(), self.name.clone()));
        Ok(children)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
