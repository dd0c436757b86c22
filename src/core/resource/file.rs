use super::{probe, validate_path, validate_transport, Chmod, Chown};
use crate::content::Content;
use crate::core::{Applier, Children, Configuration};
use crate::network::{quote, Transport};
use anyhow::Context;
use async_trait::async_trait;
use md5::{Digest, Md5};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The bytes of a remote file.
///
/// Satisfied when the file's MD5 matches the MD5 of [Content]; applied by streaming the
/// content into `cat > <path>`. Ownership and mode are left alone; see [File].
#[derive(Clone)]
pub struct FileContent {
    transport: Arc<dyn Transport>,
    path: String,
    content: Arc<dyn Content>,
}

impl FileContent {
    pub fn new(
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        content: impl Content + 'static,
    ) -> Self {
        FileContent {
            transport,
            path: path.into(),
            content: Arc::new(content),
        }
    }

    /// Like [Self::new], for content that is shared with other resources.
    pub fn shared(
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        content: Arc<dyn Content>,
    ) -> Self {
        FileContent {
            transport,
            path: path.into(),
            content,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn bytes(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        self.content
            .content(cancel)
            .await
            .with_context(|| format!("failed to produce content for {}", self.path))
    }
}

/// The `md5sum -c` line that checks `path` against `bytes`.
///
/// `printf %s` writes the path verbatim; `echo` under dash would expand backslashes in it.
fn md5_check(path: &str, bytes: &[u8]) -> String {
    format!(
        "printf '%s  %s\\n' {:x} {} | md5sum -c --status",
        Md5::digest(bytes),
        quote(path)
    )
}

#[async_trait]
impl Applier for FileContent {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let bytes = self.bytes(cancel).await?;
        probe(self.transport.as_ref(), cancel, &md5_check(&self.path, &bytes)).await
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let bytes = self.bytes(cancel).await?;
        self.transport
            .run_command_stdin(cancel, &format!("cat > {}", quote(&self.path)), &bytes)
            .await?;
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        validate_path(&self.path)?;
        validate_transport(self.transport.as_ref())
    }
}

impl Configuration for FileContent {
    fn name(&self) -> String {
        format!("FileContent({})", self.path)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A remote file with content, optional ownership, and mode.
///
/// Expands to [FileContent], then [Chown] if an owner is set, then [Chmod]. The parent
/// directory must already exist; put a [super::Directory] before it.
#[derive(Clone)]
pub struct File {
    transport: Arc<dyn Transport>,
    path: String,
    content: Arc<dyn Content>,
    owner: Option<(String, String)>,
    mode: u32,
}

impl File {
    pub fn new(
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        content: impl Content + 'static,
        mode: u32,
    ) -> Self {
        File {
            transport,
            path: path.into(),
            content: Arc::new(content),
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

impl Configuration for File {
    fn name(&self) -> String {
        format!("File({})", self.path)
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(None)
    }

    fn children(&self) -> anyhow::Result<Children> {
        let mut children = Children::new();
        children.push(FileContent::shared(
            self.transport.clone(),
            self.path.clone(),
            self.content.clone(),
        ));
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

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("owner", &self.owner)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish_non_exhaustive()
    }
}
