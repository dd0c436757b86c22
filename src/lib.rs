//! Declarative, idempotent infrastructure convergence.
//!
//! # Trees of desired state
//!
//! Callers describe what a machine, an image or a cluster should look like as a tree of
//! [Configuration]s. Each node may carry an [Applier], the unit that knows how to check whether
//! its piece of desired state already holds ([Applier::satisfied]) and how to make it hold
//! ([Applier::apply]). Child order is dependency order: a directory comes before the file inside
//! it, a unit file before the service that uses it.
//!
//! # Program flow
//!
//! 1. Collaborator code builds [Configuration] values, e.g. a [Node] whose children are
//!    [core::resource::Directory] and [core::resource::File] resources talking to a host through
//!    an SSH [network::Transport].
//!
//! 2. [Runner::new] resolves the tree exactly once. Builders are allowed to fail (a secret could
//!    not be fetched, a field is missing); failure aborts resolution and nothing runs.
//!
//! 3. [Runner::validate] checks every applier's local preconditions without touching a host.
//!
//! 4. [Runner::apply] walks the tree depth-first, children before their parent, skipping every
//!    subtree whose root is already satisfied. The first failure stops forward progress; running
//!    again later resumes where the last run stopped, because finished work reports satisfied.
//!
//! Independent trees can be converged in parallel with [run_all].
//!
//! [Configuration]: core::Configuration
//! [Applier]: core::Applier
//! [Applier::satisfied]: core::Applier::satisfied
//! [Applier::apply]: core::Applier::apply
//! [Node]: core::Node
//! [Runner::new]: core::Runner::new
//! [Runner::validate]: core::Runner::validate
//! [Runner::apply]: core::Runner::apply

pub mod cache;
pub mod config;
pub mod content;
pub mod core;
pub mod logger;
pub mod network;
pub mod run_all;

#[doc(inline)]
pub use run_all::{apply_all, build_all, upload_all};

/// Re-exported so callers don't need to depend on `tokio-util` just to build a token.
pub use tokio_util::sync::CancellationToken;
