use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use muzzle::DEFAULT_AGENT;

use crate::cli::Cli;

/// TOML config file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Agent launched when the command does not name it
    pub agent: Option<String>,
    /// Domains to allow in addition to the baseline
    pub allow_domains: Vec<String>,
    pub restrict_fs: Option<bool>,
}

/// Merged configuration from file + CLI
#[derive(Debug)]
pub struct MergedConfig {
    pub agent: String,
    pub allow_domains: Vec<String>,
    pub restrict_fs: bool,
    pub sandboxed: bool,
}

/// Load config from file
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let config: FileConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

/// Merge file config with CLI args
///
/// Domains are unioned. Filesystem restriction is on if either side asks.
pub fn merge_config(file: FileConfig, cli: &Cli) -> MergedConfig {
    let mut allow_domains = file.allow_domains;
    allow_domains.extend(cli.allow_domains.iter().cloned());

    MergedConfig {
        agent: file.agent.unwrap_or_else(|| DEFAULT_AGENT.to_string()),
        allow_domains,
        restrict_fs: cli.restrict_fs || file.restrict_fs.unwrap_or(false),
        sandboxed: !cli.no_sandbox,
    }
}
