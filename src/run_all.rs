//! Runs many independent trees at once.
//!
//! Each top-level app or build instruction gets its own tokio task running
//! [Runner::new] → [Runner::validate] → [Runner::apply]. Nothing inside a tree runs in
//! parallel; trees run in parallel with each other.

use crate::core::{Configuration, Runner};
use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A named desired-state tree, usually everything one application needs on its hosts.
#[derive(Clone)]
pub struct App {
    pub name: String,
    pub configuration: Arc<dyn Configuration>,
}

impl App {
    pub fn new(name: impl Into<String>, configuration: impl Configuration + 'static) -> Self {
        App {
            name: name.into(),
            configuration: Arc::new(configuration),
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A named pair of trees: one that builds artifacts and one that publishes them.
#[derive(Clone)]
pub struct BuildInstruction {
    pub name: String,
    pub build: Arc<dyn Configuration>,
    pub upload: Arc<dyn Configuration>,
}

impl BuildInstruction {
    pub fn new(
        name: impl Into<String>,
        build: impl Configuration + 'static,
        upload: impl Configuration + 'static,
    ) -> Self {
        BuildInstruction {
            name: name.into(),
            build: Arc::new(build),
            upload: Arc::new(upload),
        }
    }
}

impl fmt::Debug for BuildInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildInstruction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Resolves, validates and applies one tree.
async fn converge(
    configuration: Arc<dyn Configuration>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let runner = Runner::new(configuration.as_ref())?;
    runner.validate(&cancel).await?;
    runner.apply(&cancel).await
}

/// Converges every app concurrently and waits for all of them.
///
/// One app failing does not stop the others. Every failure is returned, tagged with the app's
/// name.
pub async fn apply_all(
    apps: &[App],
    cancel: &CancellationToken,
) -> Result<(), Vec<(String, anyhow::Error)>> {
    let mut tasks = JoinSet::new();
    let mut names = HashMap::new();
    for app in apps {
        let name = app.name.clone();
        let configuration = app.configuration.clone();
        let cancel = cancel.clone();
        let handle = tasks.spawn(async move {
            debug!(app = %name, "applying");
            let result = converge(configuration, cancel).await;
            (name, result)
        });
        names.insert(handle.id(), app.name.clone());
    }

    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(()))) => info!(app = %name, "converged"),
            Ok((name, Err(error))) => {
                let message = format!("{error:#}");
                warn!(app = %name, error = %message, "failed to converge");
                errors.push((name, error));
            }
            // Tasks are never aborted here, so this is a panic.
            Err(error) => {
                let name = names
                    .remove(&error.id())
                    .unwrap_or_else(|| "<unknown>".to_owned());
                warn!(app = %name, %error, "panicked");
                errors.push((name, error.into()));
            }
        }
    }

    match errors.len() {
        0 => Ok(()),
        _ => Err(errors),
    }
}

/// Converges every instruction's `build` tree concurrently. The first failure cancels the
/// rest.
pub async fn build_all(
    instructions: &[BuildInstruction],
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let trees = instructions
        .iter()
        .map(|i| (i.name.clone(), i.build.clone()))
        .collect();
    first_error(trees, cancel, "build").await
}

/// Converges every instruction's `upload` tree concurrently. The first failure cancels the
/// rest.
pub async fn upload_all(
    instructions: &[BuildInstruction],
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let trees = instructions
        .iter()
        .map(|i| (i.name.clone(), i.upload.clone()))
        .collect();
    first_error(trees, cancel, "upload").await
}

/// Runs every tree in its own task under a child of `cancel`. On the first error, cancels the
/// child token, aborts the remaining tasks and returns that error.
async fn first_error(
    trees: Vec<(String, Arc<dyn Configuration>)>,
    cancel: &CancellationToken,
    stage: &str,
) -> anyhow::Result<()> {
    let cancel = cancel.child_token();
    let mut tasks = JoinSet::new();
    for (name, configuration) in trees {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            debug!(instruction = %name, "starting");
            converge(configuration, cancel)
                .await
                .with_context(|| format!("{name} failed"))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(anyhow::Error::from)
            .and_then(|result| result);
        if let Err(error) = result {
            cancel.cancel();
            tasks.abort_all();
            return Err(error).with_context(|| format!("{stage} failed"));
        }
    }
    Ok(())
}
