//! The convergence engine: desired-state trees, their resolution, and the walk that applies them.

pub mod applier;
pub mod configuration;
pub mod resource;
pub mod runner;

#[doc(inline)]
pub use applier::Applier;

#[doc(inline)]
pub use configuration::{Children, Configuration, Node};

#[doc(inline)]
pub use runner::Runner;

#[cfg(test)]
pub mod fixtures {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    /// A shared, append-only record of applier calls across a whole tree.
    pub type Log = Arc<Mutex<Vec<String>>>;

    pub fn log() -> Log {
        Arc::default()
    }

    pub fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// An [Applier] that records every call as `<name>:<method>` and becomes satisfied once
    /// applied.
    pub struct Spy {
        pub name: String,
        log: Log,
        satisfied: AtomicBool,
        fail_satisfied: bool,
        fail_apply: bool,
        fail_validate: bool,
        applies: AtomicUsize,
    }

    impl Spy {
        pub fn new(name: &str, log: &Log) -> Self {
            Spy {
                name: name.to_owned(),
                log: log.clone(),
                satisfied: AtomicBool::new(false),
                fail_satisfied: false,
                fail_apply: false,
                fail_validate: false,
                applies: AtomicUsize::new(0),
            }
        }

        pub fn already_satisfied(self) -> Self {
            self.satisfied.store(true, Ordering::SeqCst);
            self
        }

        pub fn failing_satisfied(mut self) -> Self {
            self.fail_satisfied = true;
            self
        }

        pub fn failing_apply(mut self) -> Self {
            self.fail_apply = true;
            self
        }

        pub fn failing_validate(mut self) -> Self {
            self.fail_validate = true;
            self
        }

        pub fn applies(&self) -> usize {
            self.applies.load(Ordering::SeqCst)
        }

        fn record(&self, method: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{method}", self.name));
        }
    }

    #[async_trait]
    impl Applier for Spy {
        async fn satisfied(&self, _cancel: &CancellationToken) -> anyhow::Result<bool> {
            self.record("satisfied");
            if self.fail_satisfied {
                bail!("{} probe failed", self.name);
            }
            Ok(self.satisfied.load(Ordering::SeqCst))
        }

        async fn apply(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
            self.record("apply");
            self.applies.fetch_add(1, Ordering::SeqCst);
            if self.fail_apply {
                bail!("{} exploded", self.name);
            }
            self.satisfied.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
            self.record("validate");
            if self.fail_validate {
                bail!("{} is invalid", self.name);
            }
            Ok(())
        }
    }

    /// A [Node] named `name` whose applier is a [Spy] of the same name.
    pub fn spy_node(name: &str, log: &Log) -> Node {
        Node::new(name).with_applier(Spy::new(name, log))
    }

    /// A [Configuration] whose builders fail.
    pub struct Broken {
        pub fail_applier: bool,
    }

    impl Configuration for Broken {
        fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
            if self.fail_applier {
                bail!("secret lookup failed");
            }
            Ok(None)
        }

        fn children(&self) -> anyhow::Result<Children> {
            bail!("children could not be built")
        }
    }
}
