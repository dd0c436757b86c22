use super::{probe_output, validate_mode, validate_path, validate_transport};
use crate::core::{Applier, Children, Configuration};
use crate::network::{quote, Transport};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The permission bits of a remote path.
#[derive(Clone)]
pub struct Chmod {
    transport: Arc<dyn Transport>,
    path: String,
    mode: u32,
}

impl Chmod {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>, mode: u32) -> Self {
        Chmod {
            transport,
            path: path.into(),
            mode,
        }
    }
}

#[async_trait]
impl Applier for Chmod {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let command = format!("stat -c '%a' {}", quote(&self.path));
        let Some(current) = probe_output(self.transport.as_ref(), cancel, &command).await? else {
            return Ok(false);
        };
        match u32::from_str_radix(&current, 8) {
            Ok(mode) => Ok(mode == self.mode),
            Err(_) => {
                debug!(path = %self.path, %current, "unparseable mode");
                Ok(false)
            }
        }
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        // Five digits, or GNU chmod keeps setuid/setgid on directories.
        let command = format!("chmod 0{:04o} {}", self.mode, quote(&self.path));
        self.transport.run_command(cancel, &command).await?;
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        validate_path(&self.path)?;
        validate_mode(self.mode)?;
        validate_transport(self.transport.as_ref())
    }
}

impl Configuration for Chmod {
    fn name(&self) -> String {
        format!("Chmod({})", self.path)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for Chmod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chmod")
            .field("path", &self.path)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish_non_exhaustive()
    }
}
