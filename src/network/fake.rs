//! An in-memory [Transport] that understands the commands converge's resources send.
//!
//! [FakeHost] keeps a tiny model of a Linux machine (files, directories, modes, owners, systemd
//! units, iptables rules) and records every command it receives, so tests can assert both on
//! the resulting state and on which commands were issued.
//!
//! Unrecognized commands succeed unless they match a pattern registered with
//! [FakeHost::fail_on].

use super::{Error, Transport};
use async_trait::async_trait;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Commands that only inspect state. Everything else counts as a mutation.
const PROBES: &[&str] = &[
    "test ",
    "printf ",
    "stat ",
    "systemctl is-enabled ",
    "systemctl is-active ",
    "iptables -C ",
];

#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<State>,
}

/// The modelled machine. Public so tests can seed and inspect it directly.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub files: BTreeMap<String, Vec<u8>>,
    pub directories: BTreeSet<String>,
    pub modes: BTreeMap<String, u32>,
    pub owners: BTreeMap<String, String>,
    pub enabled: BTreeSet<String>,
    pub active: BTreeSet<String>,
    pub rules: Vec<String>,

    /// Every command received, in order.
    pub commands: Vec<String>,

    /// Bytes received on stdin, keyed by command.
    pub stdin: Vec<(String, Vec<u8>)>,

    /// Commands containing one of these substrings exit with code 1.
    pub fail_on: Vec<String>,

    /// Whether every call fails as if the host could not be reached.
    pub unreachable: bool,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks and returns the modelled machine.
    pub fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread can poison the lock; the data is still fine to read.
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Makes every command containing `pattern` exit with code 1.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.state().fail_on.push(pattern.into());
    }

    /// Makes every call fail with [Error::Connect].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Every command received that is not a probe.
    pub fn mutations(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| !is_probe(command))
            .collect()
    }

    /// Forgets recorded commands but keeps the modelled machine.
    pub fn clear_commands(&self) {
        let mut state = self.state();
        state.commands.clear();
        state.stdin.clear();
    }

    /// Returns the contents of a file, if it exists.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    fn handle(&self, command: &str, stdin: Option<&[u8]>) -> Result<Vec<u8>, Error> {
        let mut state = self.state();
        if state.unreachable {
            return Err(Error::Connect {
                host: "fake".into(),
                source: "host unreachable".into(),
            });
        }

        state.commands.push(command.to_owned());
        if let Some(bytes) = stdin {
            state.stdin.push((command.to_owned(), bytes.to_vec()));
        }

        let failure = || Error::Command {
            command: command.to_owned(),
            code: Some(1),
        };

        if state.fail_on.iter().any(|pattern| command.contains(pattern)) {
            return Err(failure());
        }

        // `printf ... | md5sum -c --status` is a pipeline, so split off the checker first.
        if let Some(line) = command.strip_suffix(" | md5sum -c --status") {
            let words = shlex::split(line).ok_or_else(failure)?;
            let [printf, _, hash, path] = words.as_slice() else {
                return Err(failure());
            };
            if printf != "printf" {
                return Err(failure());
            }
            let matches = state
                .files
                .get(path)
                .map(|contents| format!("{:x}", Md5::digest(contents)) == *hash)
                .unwrap_or(false);
            return if matches { Ok(vec![]) } else { Err(failure()) };
        }

        let words = shlex::split(command).ok_or_else(failure)?;
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        match words.as_slice() {
            ["test", "-d", path] => {
                if state.directories.contains(*path) {
                    Ok(vec![])
                } else {
                    Err(failure())
                }
            }
            ["mkdir", "-p", path] => {
                // Parents come along, and inherit setgid, as with the real thing.
                let mut current = String::new();
                for part in path.split('/').filter(|p| !p.is_empty()) {
                    let parent = state.modes.get(&current).copied().unwrap_or(0);
                    current.push('/');
                    current.push_str(part);
                    if state.directories.insert(current.clone()) && parent & 0o2000 != 0 {
                        state.modes.insert(current.clone(), 0o2755);
                    }
                }
                Ok(vec![])
            }
            ["cat", ">", path] => {
                let contents = stdin.unwrap_or_default().to_vec();
                state.files.insert(path.to_string(), contents);
                Ok(vec![])
            }
            ["stat", "-c", "%a", path] => {
                if !exists(&state, path) {
                    return Err(failure());
                }
                let mode = state.modes.get(*path).copied().unwrap_or(0o644);
                Ok(format!("{mode:o}\n").into_bytes())
            }
            ["stat", "-c", "%U:%G", path] => {
                if !exists(&state, path) {
                    return Err(failure());
                }
                let owner = state
                    .owners
                    .get(*path)
                    .cloned()
                    .unwrap_or_else(|| "root:root".into());
                Ok(format!("{owner}\n").into_bytes())
            }
            ["chmod", mode, path] => {
                if !exists(&state, path) {
                    return Err(failure());
                }
                let mut bits = u32::from_str_radix(mode, 8).map_err(|_| failure())?;
                // Up to four digits leave setuid/setgid on directories untouched.
                if mode.len() < 5 && state.directories.contains(*path) {
                    let current = state.modes.get(*path).copied().unwrap_or(0o644);
                    bits |= current & 0o6000;
                }
                state.modes.insert(path.to_string(), bits);
                Ok(vec![])
            }
            ["chown", owner, path] => {
                if !exists(&state, path) {
                    return Err(failure());
                }
                state.owners.insert(path.to_string(), owner.to_string());
                Ok(vec![])
            }
            ["systemctl", "is-enabled", name] => {
                if state.enabled.contains(*name) {
                    Ok(b"enabled\n".to_vec())
                } else {
                    Err(failure())
                }
            }
            ["systemctl", "is-active", "--quiet", name] => {
                if state.active.contains(*name) {
                    Ok(vec![])
                } else {
                    Err(failure())
                }
            }
            ["systemctl", "start", name] => {
                state.active.insert(name.to_string());
                Ok(vec![])
            }
            ["systemctl", "enable", name] => {
                state.enabled.insert(name.to_string());
                Ok(vec![])
            }
            ["iptables", "-C", rule @ ..] => {
                if state.rules.contains(&rule.join(" ")) {
                    Ok(vec![])
                } else {
                    Err(failure())
                }
            }
            ["iptables", "-A", rule @ ..] => {
                state.rules.push(rule.join(" "));
                Ok(vec![])
            }
            _ => Ok(vec![]),
        }
    }
}

fn exists(state: &State, path: &str) -> bool {
    state.files.contains_key(path) || state.directories.contains(path)
}

fn is_probe(command: &str) -> bool {
    PROBES.iter().any(|probe| command.starts_with(probe))
}

#[async_trait]
impl Transport for FakeHost {
    async fn run_command(&self, cancel: &CancellationToken, command: &str) -> Result<(), Error> {
        check_cancelled(cancel, command)?;
        self.handle(command, None).map(|_| ())
    }

    async fn run_command_stdin(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdin: &[u8],
    ) -> Result<(), Error> {
        check_cancelled(cancel, command)?;
        self.handle(command, Some(stdin)).map(|_| ())
    }

    async fn run_command_stdout(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<Vec<u8>, Error> {
        check_cancelled(cancel, command)?;
        self.handle(command, None)
    }
}

fn check_cancelled(cancel: &CancellationToken, command: &str) -> Result<(), Error> {
    match cancel.is_cancelled() {
        true => Err(Error::Cancelled {
            command: command.to_owned(),
        }),
        false => Ok(()),
    }
}
