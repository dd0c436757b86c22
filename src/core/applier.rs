//! The leaf-action contract every resource implements.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A unit of desired state that can check itself and converge itself.
///
/// # Idempotency
///
/// If [Self::satisfied] returns `true`, calling [Self::apply] must not change anything that
/// matters to the desired state. The engine relies on this to make repeated runs safe: it skips
/// satisfied nodes and everything below them.
///
/// # Validation
///
/// [Self::validate] checks preconditions that are knowable without the target: required fields
/// are set, names are well-formed, ports are in range. It must not change anything anywhere.
#[async_trait]
pub trait Applier: Send + Sync {
    /// Returns whether the desired state already holds.
    ///
    /// An error means the question could not be answered (e.g. the host is unreachable), which
    /// is different from `Ok(false)`.
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool>;

    /// Converges the target to the desired state.
    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// Checks static preconditions without side effects.
    async fn validate(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
impl<A: Applier + ?Sized> Applier for Arc<A> {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        (**self).satisfied(cancel).await
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        (**self).apply(cancel).await
    }

    async fn validate(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        (**self).validate(cancel).await
    }
}
