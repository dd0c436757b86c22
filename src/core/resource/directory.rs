use super::{probe, validate_path, validate_transport, Chmod, Chown};
use crate::core::{Applier, Children, Configuration};
use crate::network::{quote, Transport};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A remote directory, created with its parents if missing.
#[derive(Clone)]
pub struct DirectoryExists {
    transport: Arc<dyn Transport>,
    path: String,
}

impl DirectoryExists {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>) -> Self {
        DirectoryExists {
            transport,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Applier for DirectoryExists {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let command = format!("test -d {}", quote(&self.path));
        probe(self.transport.as_ref(), cancel, &command).await
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let command = format!("mkdir -p {}", quote(&self.path));
        self.transport.run_command(cancel, &command).await?;
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        validate_path(&self.path)?;
        validate_transport(self.transport.as_ref())
    }
}

impl Configuration for DirectoryExists {
    fn name(&self) -> String {
        format!("DirectoryExists({})", self.path)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for DirectoryExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryExists")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A remote directory with optional ownership and a mode.
///
/// Expands to [DirectoryExists], then [Chown] if an owner is set, then [Chmod].
#[derive(Clone)]
pub struct Directory {
    transport: Arc<dyn Transport>,
    path: String,
    owner: Option<(String, String)>,
    mode: u32,
}

impl Directory {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>, mode: u32) -> Self {
        Directory {
            transport,
            path: path.into(),
            owner: None,
            mode,
        }
    }

    /// Also converge ownership to `user:group`.
    pub fn owned_by(mut self, user: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = Some((user.into(), group.into()));
        self
    }
}

impl Configuration for Directory {
    fn name(&self) -> String {
        format!("Directory({})", self.path)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(None)
    }

    fn children(&self) -> anyhow::Result<Children> {
        let mut children = Children::new();
        children.push(DirectoryExists::new(self.transport.clone(), self.path.clone()));
        if let Some((user, group)) = &self.owner {
            children.push(Chown::new(
                self.transport.clone(),
                self.path.clone(),
                user.clone(),
                group.clone(),
            ));
        }
        children.push(Chmod::new(self.transport.clone(), self.path.clone(), self.mode));
        Ok(children)
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("path", &self.path)
            .field("owner", &self.owner)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish_non_exhaustive()
    }
}
