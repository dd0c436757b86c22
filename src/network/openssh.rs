//! Contains the reference [Transport] implementation based on the [openssh] crate.

use super::{single_quote, wrap, Error, Host, Transport};
use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs commands on a [Host] over SSH, one fresh connection and session per call.
///
/// There is no connection pooling. Convergence runs are infrequent and issue few commands, so
/// the simpler lifecycle wins: nothing outlives the call that created it.
///
/// Every command runs as `sudo sh -c '...'` (see [wrap]). If the [CancellationToken] fires while
/// the command is running, the remote shell is killed with `pkill -KILL` before the call returns
/// [Error::Cancelled].
#[derive(Clone, Debug)]
pub struct SshTransport {
    host: Host,
}

impl SshTransport {
    pub fn new(host: Host) -> Self {
        SshTransport { host }
    }

    /// The host this transport connects to.
    pub fn host(&self) -> &Host {
        &self.host
    }

    async fn connect(&self) -> Result<Session, Error> {
        // openssh hands the key path to the ssh binary, which reports a missing key as a generic
        // connection failure. Check it here to keep the two failures apart.
        tokio::fs::File::open(&self.host.private_key)
            .await
            .map_err(|source| Error::Signer {
                path: self.host.private_key.clone(),
                source,
            })?;

        let mut builder = SessionBuilder::default();
        builder
            .user(self.host.user.clone())
            .port(self.host.port)
            .keyfile(&self.host.private_key)
            .known_hosts_check(KnownHosts::Add);

        builder
            .connect_mux(&self.host.address)
            .await
            .map_err(|e| Error::Connect {
                host: self.host.address.clone(),
                source: Box::new(e),
            })
    }

    /// Connects, runs `command`, and disconnects. Returns captured stdout if `capture` is set.
    async fn run(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdin: Option<&[u8]>,
        capture: bool,
    ) -> Result<Vec<u8>, Error> {
        let cancelled = || Error::Cancelled {
            command: command.to_owned(),
        };

        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            session = self.connect() => session?,
        };

        let marker = marker();
        let wrapped = wrap(command, &marker);
        debug!(host = %self.host.address, %command, "running remote command");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                kill(&session, &self.host.address, &marker).await;
                Err(cancelled())
            }
            result = execute(&session, command, &wrapped, stdin, capture) => result,
        };

        if let Err(error) = session.close().await {
            warn!(host = %self.host.address, %error, "failed to close SSH session");
        }
        result
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run_command(&self, cancel: &CancellationToken, command: &str) -> Result<(), Error> {
        self.run(cancel, command, None, false).await.map(|_| ())
    }

    async fn run_command_stdin(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdin: &[u8],
    ) -> Result<(), Error> {
        self.run(cancel, command, Some(stdin), false)
            .await
            .map(|_| ())
    }

    async fn run_command_stdout(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<Vec<u8>, Error> {
        self.run(cancel, command, None, true).await
    }

    fn validate(&self) -> Result<(), Error> {
        self.host.validate()
    }
}

/// Spawns `wrapped` on `session`, feeds it `stdin` while waiting for it to exit, and checks the
/// exit status. `command` is the unwrapped form used in errors.
async fn execute(
    session: &Session,
    command: &str,
    wrapped: &str,
    stdin: Option<&[u8]>,
    capture: bool,
) -> Result<Vec<u8>, Error> {
    let session_error = |e: openssh::Error| Error::Session {
        command: command.to_owned(),
        source: Box::new(e),
    };

    let mut remote = session.raw_command(wrapped);
    remote
        .stdin(match stdin {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        })
        .stdout(match capture {
            true => Stdio::piped(),
            false => Stdio::null(),
        })
        .stderr(Stdio::piped());
    let mut child = remote.spawn().await.map_err(session_error)?;

    let pipe = child.stdin().take();
    let write = async move {
        if let Some(bytes) = stdin {
            let mut pipe = pipe.ok_or_else(|| io::Error::other("stdin was not piped"))?;
            pipe.write_all(bytes).await?;
            pipe.flush().await?;
            // Dropping the pipe sends EOF, which `cat > path` needs in order to exit.
            pipe.shutdown().await?;
        }
        Ok::<(), io::Error>(())
    };

    let (written, output) = tokio::join!(write, child.wait_with_output());
    let output = output.map_err(session_error)?;

    if !output.status.success() {
        if !output.stderr.is_empty() {
            debug!(
                %command,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "remote command failed",
            );
        }
        return Err(Error::Command {
            command: command.to_owned(),
            code: output.status.code(),
        });
    }

    written.map_err(|source| Error::Stdin {
        command: command.to_owned(),
        source,
    })?;

    Ok(output.stdout)
}

/// Kills the remote shell started with `marker` as its `$0`.
async fn kill(session: &Session, host: &str, marker: &str) {
    let command = kill_command(marker);
    debug!(%host, %command, "killing cancelled remote command");
    match session.raw_command(&command).status().await {
        Ok(status) if status.success() => {}
        // pkill exits 1 when nothing matched, e.g. the command finished as we gave up on it.
        Ok(status) => debug!(%host, code = ?status.code(), "pkill matched nothing"),
        Err(error) => warn!(%host, %error, "failed to kill cancelled remote command"),
    }
}

/// Returns the command that kills every process whose command line ends with `marker`.
fn kill_command(marker: &str) -> String {
    format!("sudo pkill -KILL -f {}", single_quote(&kill_pattern(marker)))
}

/// The `pkill -f` pattern for `marker`, which is the last word of every wrapped command.
///
/// The first character is bracketed so the pattern does not match the `sudo pkill` command line
/// itself. The `$` keeps `...-3` from matching a sibling call marked `...-30`.
fn kill_pattern(marker: &str) -> String {
    let mut chars = marker.chars();
    match chars.next() {
        Some(first) => format!("[{first}]{}$", chars.as_str()),
        None => String::new(),
    }
}

/// Returns a marker unique to this controller process and call.
fn marker() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "converge-{}-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_millis(),
        COUNTER.fetch_add(1, Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    mod kill_command {
        use super::*;

        #[test]
        fn works() {
            assert_eq!(
                "sudo pkill -KILL -f '[c]onverge-1-2-3$'",
                kill_command("converge-1-2-3"),
            );
        }
    }

    mod kill_pattern {
        use super::*;
        use regex::Regex;

        fn matches(marker: &str, command_line: &str) -> bool {
            Regex::new(&kill_pattern(marker))
                .unwrap()
                .is_match(command_line)
        }

        #[test]
        fn matches_own_command() {
            let command_line = "sudo sh -c export LANG=C; sleep 60 converge-1-2-3";
            assert!(matches("converge-1-2-3", command_line));
        }

        #[test]
        fn skips_sibling_marker() {
            let command_line = "sudo sh -c export LANG=C; sleep 60 converge-1-2-30";
            assert!(!matches("converge-1-2-3", command_line));
        }

        #[test]
        fn skips_pkill_itself() {
            let command_line = "sudo pkill -KILL -f [c]onverge-1-2-3$";
            assert!(!matches("converge-1-2-3", command_line));
        }
    }

    mod marker {
        use super::*;

        #[test]
        fn is_unique() {
            assert_ne!(marker(), marker());
        }

        #[test]
        fn needs_no_quoting() {
            let marker = marker();
            assert_eq!(marker, crate::network::quote(&marker));
        }
    }

    mod run {
        use super::*;

        #[tokio::test]
        async fn missing_key_is_a_signer_error() {
            let transport = SshTransport::new(Host::new(
                "localhost",
                22,
                "nobody",
                "/nonexistent/converge/id_ed25519",
            ));

            let error = transport
                .run_command(&CancellationToken::new(), "true")
                .await
                .unwrap_err();

            match error {
                Error::Signer { path, .. } => {
                    assert_eq!(PathBuf::from("/nonexistent/converge/id_ed25519"), path)
                }
                e => panic!("expected Error::Signer but got: {e:?}"),
            }
        }

        #[tokio::test]
        async fn cancelled_token_short_circuits() {
            let transport = SshTransport::new(Host::new("localhost", 22, "nobody", "/dev/null"));
            let cancel = CancellationToken::new();
            cancel.cancel();

            let error = transport.run_command(&cancel, "true").await.unwrap_err();
            assert!(matches!(error, Error::Cancelled { .. }));
        }
    }

    mod validate {
        use super::*;

        #[test]
        fn checks_host() {
            let transport = SshTransport::new(Host::new("", 22, "nobody", "/dev/null"));
            assert!(transport.validate().is_err());
        }
    }
}
