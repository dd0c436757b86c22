//! Resolves a [Configuration] tree once and walks the result.

use crate::core::{Applier, Configuration};
use anyhow::{bail, Context};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type Walk<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// A resolved, immutable execution tree.
///
/// [Runner::new] asks every [Configuration] for its applier and children exactly once. After
/// that the tree never changes, so [Runner::validate] and [Runner::apply] see the same nodes no
/// matter how often they are called.
pub struct Runner {
    name: String,
    applier: Option<Arc<dyn Applier>>,
    runners: Vec<Runner>,
}

impl Runner {
    /// Resolves `configuration` and all of its descendants.
    ///
    /// The first builder error aborts resolution; no partial tree is returned.
    pub fn new(configuration: &dyn Configuration) -> anyhow::Result<Self> {
        let name = configuration.name();
        let build = || -> anyhow::Result<Self> {
            let applier = configuration.applier()?;
            let runners = configuration
                .children()?
                .iter()
                .map(|child| Runner::new(child.as_ref()))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Runner {
                name: name.clone(),
                applier,
                runners,
            })
        };
        build().with_context(|| format!("build runner for {name}"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn applier(&self) -> Option<&Arc<dyn Applier>> {
        self.applier.as_ref()
    }

    /// Child runners, in apply order.
    pub fn runners(&self) -> &[Runner] {
        &self.runners
    }

    /// Validates every applier in the tree, parents before children, stopping at the first
    /// error. Nothing is changed on any target.
    pub async fn validate(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.validate_at(cancel, Vec::new()).await
    }

    /// Converges the tree.
    ///
    /// Each node first asks its applier whether it is satisfied; if so, the node and everything
    /// below it are skipped. Otherwise its children are applied in order, then its own applier.
    /// The first error stops the walk.
    pub async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.apply_at(cancel, Vec::new()).await
    }

    fn validate_at<'a>(&'a self, cancel: &'a CancellationToken, mut path: Vec<String>) -> Walk<'a> {
        Box::pin(async move {
            path.push(self.name.clone());
            let rendered = render(&path);

            if cancel.is_cancelled() {
                bail!("in {rendered}: cancelled");
            }

            if let Some(applier) = &self.applier {
                debug!(path = %rendered, "validating");
                applier
                    .validate(cancel)
                    .await
                    .with_context(|| format!("in {rendered}"))?;
            }

            for runner in &self.runners {
                runner.validate_at(cancel, path.clone()).await?;
            }
            Ok(())
        })
    }

    fn apply_at<'a>(&'a self, cancel: &'a CancellationToken, mut path: Vec<String>) -> Walk<'a> {
        Box::pin(async move {
            path.push(self.name.clone());
            let rendered = render(&path);

            if cancel.is_cancelled() {
                bail!("in {rendered}: cancelled");
            }

            if let Some(applier) = &self.applier {
                let satisfied = applier
                    .satisfied(cancel)
                    .await
                    .context("check satisfied failed")
                    .with_context(|| format!("in {rendered}"))?;
                if satisfied {
                    debug!(path = %rendered, "satisfied, skipping");
                    return Ok(());
                }
            }

            for runner in &self.runners {
                runner
                    .apply_at(cancel, path.clone())
                    .await
                    .context("apply children failed")?;
            }

            if let Some(applier) = &self.applier {
                applier
                    .apply(cancel)
                    .await
                    .context("apply failed")
                    .with_context(|| format!("in {rendered}"))?;
                info!(path = %rendered, "applied");
            }
            Ok(())
        })
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("applier", &self.applier.is_some())
            .field("runners", &self.runners)
            .finish()
    }
}

/// Renders an execution path as `A -> B -> C`.
fn render(path: &[String]) -> String {
    path.join(" -> ")
}
