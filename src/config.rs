//! Controller-side configuration: where converge keeps its files and which hosts it knows.

use crate::network::Host;
use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides [cache_dir].
pub const CACHE_DIR_VAR: &str = "CONVERGE_CACHE_DIR";

/// Returns a [PathBuf] to the directory where converge's configuration should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/.converge`.
/// Otherwise, it returns `.converge` inside the controller user's home directory.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = ".converge";

    #[cfg(test)]
    let mut path = {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
        path
    };

    #[cfg(not(test))]
    let mut path =
        home::home_dir().ok_or(anyhow!("could not determine the controller's home directory"))?;

    path.push(CONFIG_DIR);
    Ok(path)
}

/// Returns the default directory for locally generated artifacts (keys, certificates, secrets).
///
/// [CACHE_DIR_VAR] wins if it is set and non-empty. Nothing in the engine calls this on its own;
/// pass the result to [crate::cache::Cache::new].
pub fn cache_dir() -> anyhow::Result<PathBuf> {
    match env::var_os(CACHE_DIR_VAR) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Ok(config_dir()?.join("cache")),
    }
}

/// Loads an inventory file: a YAML mapping of host names to [Host] connection parameters.
///
/// ```yaml
/// web:
///   address: 10.0.0.2
///   user: deploy
///   private_key: /home/me/.ssh/id_ed25519
/// db:
///   address: db.example.org
///   port: 2222
///   user: deploy
///   private_key: /home/me/.ssh/id_ed25519
/// ```
///
/// Order is preserved from the source file.
pub fn load_inventory(path: impl AsRef<Path>) -> anyhow::Result<IndexMap<String, Host>> {
    let path = path.as_ref();
    let yaml = fs::read_to_string(path)
        .with_context(|| format!("failed to read inventory {}", path.display()))?;
    parse_inventory(&yaml).with_context(|| format!("failed to parse inventory {}", path.display()))
}

/// Parses the contents of an inventory file. See [load_inventory].
pub fn parse_inventory(yaml: &str) -> anyhow::Result<IndexMap<String, Host>> {
    let hosts: IndexMap<String, Host> = serde_yaml::from_str(yaml)?;
    for (name, host) in &hosts {
        host.validate()
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("invalid host {name}"))?;
    }
    Ok(hosts)
}
