use super::{probe_output, validate_account, validate_path, validate_transport};
use crate::core::{Applier, Children, Configuration};
use crate::network::{quote, Transport};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The owning user and group of a remote path.
#[derive(Clone)]
pub struct Chown {
    transport: Arc<dyn Transport>,
    path: String,
    user: String,
    group: String,
}

impl Chown {
    pub fn new(
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        user: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Chown {
            transport,
            path: path.into(),
            user: user.into(),
            group: group.into(),
        }
    }

    fn owner(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }
}

#[async_trait]
impl Applier for Chown {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let command = format!("stat -c '%U:%G' {}", quote(&self.path));
        let current = probe_output(self.transport.as_ref(), cancel, &command).await?;
        Ok(current.as_deref() == Some(self.owner().as_str()))
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let command = format!("chown {} {}", self.owner(), quote(&self.path));
        self.transport.run_command(cancel, &command).await?;
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        validate_path(&self.path)?;
        validate_account("user", &self.user)?;
        validate_account("group", &self.group)?;
        validate_transport(self.transport.as_ref())
    }
}

impl Configuration for Chown {
    fn name(&self) -> String {
        format!("Chown({})", self.path)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for Chown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chown")
            .field("path", &self.path)
            .field("user", &self.user)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}
