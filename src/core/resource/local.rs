//! Appliers that run processes on the controller itself, e.g. `docker` and `kubectl`.

use crate::content::Content;
use crate::core::{Applier, Children, Configuration};
use crate::network::exit_message;
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::fmt;
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A local program run through [tokio::process].
///
/// Without a probe the command runs on every apply. With a probe it runs only while the probe
/// exits non-zero. If the [CancellationToken] fires, the child process is killed.
#[derive(Clone)]
pub struct LocalCommand {
    program: String,
    args: Vec<String>,
    stdin: Option<Arc<dyn Content>>,
    probe: Option<(String, Vec<String>)>,
}

impl LocalCommand {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        LocalCommand {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            probe: None,
        }
    }

    /// Feeds `content` to the command's standard input.
    pub fn with_stdin(mut self, content: impl Content + 'static) -> Self {
        self.stdin = Some(Arc::new(content));
        self
    }

    /// Skips the command while `program args...` exits zero.
    pub fn unless(
        mut self,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.probe = Some((program.into(), args.into_iter().map(Into::into).collect()));
        self
    }

    /// Builds `image` from `context_dir` unless the image already exists locally.
    pub fn docker_build(image: &str, context_dir: &str) -> Self {
        LocalCommand::new("docker", ["build", "-t", image, context_dir])
            .unless("docker", ["image", "inspect", image])
    }

    /// Pushes `image` unless the registry already has it.
    pub fn docker_push(image: &str) -> Self {
        LocalCommand::new("docker", ["push", image])
            .unless("docker", ["manifest", "inspect", image])
    }

    /// Applies `manifest` to the cluster behind kubeconfig context `context`.
    ///
    /// `kubectl apply` is idempotent by itself, so there is no probe.
    pub fn kubectl_apply(context: &str, manifest: impl Content + 'static) -> Self {
        LocalCommand::new("kubectl", ["--context", context, "apply", "-f", "-"])
            .with_stdin(manifest)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn probe(&self) -> Option<(&str, &[String])> {
        self.probe
            .as_ref()
            .map(|(program, args)| (program.as_str(), args.as_slice()))
    }

    /// The command line for logs and errors.
    fn command_line(&self) -> String {
        render(&self.program, &self.args)
    }
}

fn render(program: &str, args: &[String]) -> String {
    shlex::try_join(std::iter::once(program).chain(args.iter().map(String::as_str)))
        .unwrap_or_else(|_| format!("{program} {}", args.join(" ")))
}

/// Runs `program` to completion, writing `stdin` while it runs. Killed if `cancel` fires.
async fn run(
    cancel: &CancellationToken,
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
) -> anyhow::Result<Output> {
    let line = render(program, args);
    if cancel.is_cancelled() {
        bail!("command cancelled: {line}");
    }

    let mut child = Command::new(program)
        .args(args)
        .stdin(match stdin {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {line}"))?;
    debug!(command = %line, "running local command");

    let pipe = child.stdin.take();
    let write = async move {
        if let (Some(bytes), Some(mut pipe)) = (stdin, pipe) {
            pipe.write_all(bytes).await?;
            pipe.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    // Dropping the wait future on cancellation drops the child, which kills it.
    let (written, output) = tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("command cancelled: {line}"),
        result = async { tokio::join!(write, child.wait_with_output()) } => result,
    };
    let output = output.with_context(|| format!("failed to wait for {line}"))?;
    if output.status.success() {
        written.with_context(|| format!("failed to write stdin of {line}"))?;
    }
    Ok(output)
}

#[async_trait]
impl Applier for LocalCommand {
    async fn satisfied(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let Some((program, args)) = &self.probe else {
            return Ok(false);
        };
        let output = run(cancel, program, args, None).await?;
        Ok(output.status.success())
    }

    async fn apply(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let stdin = match &self.stdin {
            Some(content) => Some(content.content(cancel).await?),
            None => None,
        };
        let output = run(cancel, &self.program, &self.args, stdin.as_deref()).await?;
        if !output.status.success() {
            if !output.stderr.is_empty() {
                debug!(
                    command = %self.command_line(),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "local command failed",
                );
            }
            bail!(
                "command exited with {}: {}",
                exit_message(output.status.code()),
                self.command_line(),
            );
        }
        Ok(())
    }

    async fn validate(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        if self.program.trim().is_empty() {
            bail!("program is empty");
        }
        if self.args.iter().any(|arg| arg.is_empty()) {
            bail!("empty argument in {}", self.command_line());
        }
        if let Some((program, _)) = &self.probe {
            if program.trim().is_empty() {
                bail!("probe program is empty");
            }
        }
        Ok(())
    }
}

impl Configuration for LocalCommand {
    fn name(&self) -> String {
        format!("LocalCommand({})", self.command_line())
    }

    fn applier(&self) -> anyhow::Result<Option<Arc<dyn Applier>>> {
        Ok(Some(Arc::new(self.clone())))
    }

    fn children(&self) -> anyhow::Result<Children> {
        Ok(Children::new())
    }
}

impl fmt::Debug for LocalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.is_some())
            .field("probe", &self.probe)
            .finish()
    }
}
