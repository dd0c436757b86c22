use super::{matches, probe, validate_transport};
use crate::core::{Applier, Children, Configuration};
use crate::network::{quote, Transport};
use anyhow::bail;
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// A rule appended to an iptables chain.
///
/// The same rule words are used for `iptables -C` (the probe) and `iptables -A` (the apply), so
/// a rule that was appended is always found again.
#[derive(Clone)]
pub struct IptablesRule {
    transport: Arc<dyn Transport>,
    chain: String,
    rule: Vec<String>,
    port: Option<u16>,
}

impl IptablesRule {
    pub fn new(
        transport: Arc<dyn Transport>,
        chain: impl Into<String>,
        rule: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        IptablesRule {
            transport,
            chain: chain.into(),
            rule: rule.into_iter().map(Into::into).collect(),
            port: None,
        }
    }

    /// Accepts incoming traffic on `port` for `protocol` (`tcp`, `udp`, ...).
    pub fn allow_input(transport: Arc<dyn Transport>, port: u16, protocol: &str) -> Self {
        let mut rule = IptablesRule::new(
            transport,
            "INPUT",
            [
                "-p".to_owned(),
                protocol.to_owned(),
                "--dport".to_owned(),
                port.to_string(),
                "-j".to_owned(),
                "ACCEPT".to_owned(),
            ],
        );
        rule.port = Some(port);
        rule
    }

    /// The chain followed by the rule, quoted for the shell.
    fn words(&self) -> String {
        std::iter::once(&self.chain)
            .chain(&self.rule)
            .map(|word| quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Applier for IptablesRule {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let command = format!("iptables -C {}", self.words());
        probe(self.transport.as_ref(), cancel, &command).await
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let command = format!("iptables -A {}", self.words());
        self.transport.run_command(cancel, &command).await?;
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        static CHAIN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
        if !matches(&CHAIN, r"^[A-Za-z0-9_-]+$", &self.chain)? {
            bail!("invalid chain name: {:?}", self.chain);
        }
        if self.rule.is_empty() {
            bail!("rule is empty");
        }
        if self.port == Some(0) {
            bail!("port must be in 1..=65535");
        }
        validate_transport(self.transport.as_ref())
    }
}

impl Configuration for IptablesRule {
    fn name(&self) -> String {
        format!("IptablesRule({} {})", self.chain, self.rule.join(" "))
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for IptablesRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IptablesRule")
            .field("chain", &self.chain)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}
