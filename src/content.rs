//! Lazy byte sources for file contents and command input.

use anyhow::Context;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Produces the bytes for a file or a command's stdin.
///
/// Implementations may be called any number of times and should return the same bytes each
/// time: resources hash the content to decide whether they are satisfied, so a provider that
/// changes its output on every call makes its resource apply on every run. Intentional
/// freshness (timestamps and the like) is the exception. For generated material that must stay
/// stable once created, see [crate::cache::CachedContent].
#[async_trait]
pub trait Content: Send + Sync {
    async fn content(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>>;
}

#[async_trait]
impl<C: Content + ?Sized> Content for Arc<C> {
    async fn content(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        (**self).content(cancel).await
    }
}

/// Fixed bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Static(pub Vec<u8>);

impl Static {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Static(bytes.into())
    }
}

#[async_trait]
impl Content for Static {
    async fn content(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// The contents of a file on the controller, read on every call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FromFile(pub PathBuf);

impl FromFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FromFile(path.into())
    }
}

#[async_trait]
impl Content for FromFile {
    async fn content(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(&self.0)
            .await
            .with_context(|| format!("failed to read {}", self.0.display()))
    }
}

/// Bytes computed by a closure, e.g. a rendered template or a freshly generated key.
pub struct Generated<F> {
    generate: F,
}

impl<F> Generated<F>
where
    F: Fn() -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    pub fn new(generate: F) -> Self {
        Generated { generate }
    }
}

impl<F> fmt::Debug for Generated<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generated").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Content for Generated<F>
where
    F: Fn() -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn content(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        (self.generate)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn static_works() {
        let content = Static::new("hi");
        assert_eq!(b"hi".to_vec(), content.content(&CancellationToken::new()).await.unwrap());
    }

    #[tokio::test]
    async fn from_file_works() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"server {}\n").unwrap();

        let content = FromFile::new(file.path());
        assert_eq!(
            b"server {}\n".to_vec(),
            content.content(&CancellationToken::new()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn from_file_names_missing_file() {
        let content = FromFile::new("/nonexistent/converge/content");
        let error = content
            .content(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("/nonexistent/converge/content"));
    }

    #[tokio::test]
    async fn generated_works() {
        let content = Generated::new(|| Ok(b"generated".to_vec()));
        assert_eq!(
            b"generated".to_vec(),
            content.content(&CancellationToken::new()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn generated_propagates_errors() {
        let content = Generated::new(|| Err(anyhow::anyhow!("entropy ran out")));
        assert!(content.content(&CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn arc_delegates() {
        let content: Arc<dyn Content> = Arc::new(Static::new("shared"));
        assert_eq!(
            b"shared".to_vec(),
            content.content(&CancellationToken::new()).await.unwrap()
        );
    }
}
