//! A local, write-once store for generated artifacts such as keys and certificates.
//!
//! Generated material usually has to stay the same across runs: a private key that changes on
//! every apply would make its [FileContent](crate::core::resource::FileContent) reapply forever
//! and break whatever trusts the old key. [CachedContent] calls its generator at most once per
//! cache directory and serves the stored bytes afterwards.

use crate::content::Content;
use crate::core::resource::matches;
use crate::core::{Applier, Children, Configuration};
use anyhow::{bail, Context};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::fs::{self, DirBuilder, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A directory holding cached artifacts, addressed by lists of key segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Cache { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Maps a logical key to a file path under the cache directory.
    ///
    /// Each segment becomes one path component and must match `^[A-Za-z0-9._-]+$` without being
    /// `.` or `..`, so a key can never point outside the cache.
    pub fn path<S: AsRef<str>>(&self, segments: &[S]) -> anyhow::Result<PathBuf> {
        static SEGMENT: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
        if segments.is_empty() {
            bail!("cache key is empty");
        }
        let mut path = self.dir.clone();
        for segment in segments {
            let segment = segment.as_ref();
            if segment == "." || segment == ".." {
                bail!("invalid cache key segment: {segment}");
            }
            if !matches(&SEGMENT, r"^[A-Za-z0-9._-]+$", segment)? {
                bail!("invalid cache key segment: {segment:?}");
            }
            path.push(segment);
        }
        Ok(path)
    }
}

/// [Content] that is generated once and then read back from a [Cache].
///
/// Also usable as a tree node: applying it makes sure the artifact exists, which lets a tree
/// generate secrets up front before anything consumes them.
#[derive(Clone)]
pub struct CachedContent {
    cache: Cache,
    key: Vec<String>,
    generator: Arc<dyn Content>,
}

impl CachedContent {
    pub fn new(
        cache: &Cache,
        key: impl IntoIterator<Item = impl Into<String>>,
        generator: impl Content + 'static,
    ) -> Self {
        CachedContent {
            cache: cache.clone(),
            key: key.into_iter().map(Into::into).collect(),
            generator: Arc::new(generator),
        }
    }

    /// Where the artifact is, or will be, stored.
    pub fn path(&self) -> anyhow::Result<PathBuf> {
        self.cache.path(&self.key)
    }

    /// Returns the stored bytes, generating and storing them first if needed.
    async fn load_or_create(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        let path = self.path()?;
        if let Some(bytes) = read_if_exists(&path).await? {
            return Ok(bytes);
        }

        if let Some(dir) = path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let bytes = self
            .generator
            .content(cancel)
            .await
            .with_context(|| format!("failed to generate {}", path.display()))?;

        // Write the whole artifact under a private name, then link it into place. Linking fails
        // if another writer got there first, in which case theirs is kept.
        let temp = temp_path(&path);
        let written = write_new(&temp, &bytes).await;
        let linked = match written {
            Ok(()) => fs::hard_link(&temp, &path).await,
            Err(e) => Err(e),
        };
        match fs::remove_file(&temp).await {
            Ok(()) => {}
            // write_new failed before creating it.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %temp.display(), %error, "failed to remove temporary file")
            }
        }

        match linked {
            Ok(()) => {
                debug!(path = %path.display(), "cached new artifact");
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "lost cache race, using existing artifact");
                fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))
            }
            Err(e) => Err(e).with_context(|| format!("failed to write {}", path.display())),
        }
    }
}

async fn read_if_exists(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn temp_path(path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(
        ".tmp-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed),
    ));
    path.with_file_name(name)
}

#[async_trait]
impl Content for CachedContent {
    async fn content(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<u8>> {
        self.load_or_create(cancel).await
    }
}

#[async_trait]
impl Applier for CachedContent {
    async fn satisfied(&self, _cancel: &CancellationToken) -> anyhow::Result<bool> {
        let path = self.path()?;
        fs::try_exists(&path)
            .await
            .with_context(|| format!("failed to check {}", path.display()))
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.load_or_create(cancel).await.map(|_| ())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.path().map(|_| ())
    }
}

impl Configuration for CachedContent {
    fn name(&self) -> String {
        format!("CachedContent({})", self.key.join("/"))
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for CachedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedContent")
            .field("cache", &self.cache)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
