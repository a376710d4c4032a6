//! Wrangler configuration reader.
//!
//! Loads the deployment configuration (`wrangler.json`, `wrangler.jsonc` or
//! `wrangler.toml`) and returns the D1 database entries for the selected
//! environment together with the path of the file they came from.
//!
//! # Example
//!
//! ```toml
//! [[d1_databases]]
//! binding = "DB"
//! database_name = "app"
//! database_id = "f0e1d2c3-b4a5-9687-7869-5a4b3c2d1e0f"
//! migrations_dir = "migrations"
//!
//! [env.staging]
//! [[env.staging.d1_databases]]
//! binding = "DB"
//! database_id = "0a1b2c3d-0000-0000-0000-000000000000"
//! ```
//!
//! `d1_databases` is not inherited: when an environment is selected, only
//! the entries inside its `[env.<name>]` section are returned.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File names probed during discovery, in priority order.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["wrangler.json", "wrangler.jsonc", "wrangler.toml"];

/// The subset of a wrangler configuration this crate reads.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WranglerConfig {
    #[serde(default)]
    pub d1_databases: Vec<D1DatabaseEntry>,
    #[serde(default)]
    pub env: HashMap<String, EnvironmentConfig>,
}

/// An `[env.<name>]` section.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub d1_databases: Option<Vec<D1DatabaseEntry>>,
}

/// One `[[d1_databases]]` entry.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct D1DatabaseEntry {
    pub binding: String,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub preview_database_id: Option<String>,
    #[serde(default)]
    pub migrations_dir: Option<String>,
    #[serde(default)]
    pub migrations_table: Option<String>,
}

impl D1DatabaseEntry {
    /// Id used for local emulation: preview id, then production id, then `""`.
    /// Empty strings count as unset.
    pub fn local_database_id(&self) -> &str {
        [&self.preview_database_id, &self.database_id]
            .into_iter()
            .filter_map(|id| id.as_deref())
            .find(|id| !id.is_empty())
            .unwrap_or("")
    }
}

/// Result of reading the configuration for one environment.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub d1_databases: Vec<D1DatabaseEntry>,
    /// `None` when no configuration file was found.
    pub config_path: Option<PathBuf>,
}

/// Read the configuration and select the D1 entries for `environment`.
///
/// With `config_path` set, exactly that file is read. Otherwise the current
/// directory and its ancestors are searched; if nothing is found an empty
/// configuration is returned.
pub fn read_config(config_path: Option<&Path>, environment: Option<&str>) -> Result<ResolvedConfig> {
    let path = match config_path {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_config_file(&cwd)
        }
    };

    let Some(path) = path else {
        tracing::debug!("no wrangler configuration file found");
        return Ok(ResolvedConfig::default());
    };

    let config = load_config(&path)?;
    let d1_databases = select_environment(config, environment);

    tracing::debug!(
        path = %path.display(),
        environment = environment.unwrap_or("<top-level>"),
        databases = d1_databases.len(),
        "loaded wrangler configuration"
    );

    Ok(ResolvedConfig {
        d1_databases,
        config_path: Some(path),
    })
}

/// Find the nearest configuration file, starting at `start` and walking up.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Parse a configuration file, picking the format from its extension.
pub fn load_config(path: &Path) -> Result<WranglerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        // JSON5 accepts the comments and trailing commas wrangler allows in JSONC.
        Some("json") | Some("jsonc") => json5::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        _ => bail!(
            "Unsupported config file: {}. Expected a .toml, .json or .jsonc file.",
            path.display()
        ),
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &WranglerConfig) -> Result<()> {
    let env_entries = config
        .env
        .values()
        .filter_map(|e| e.d1_databases.as_ref())
        .flatten();

    for entry in config.d1_databases.iter().chain(env_entries) {
        if entry.binding.trim().is_empty() {
            bail!("d1_databases entries must have a non-empty binding");
        }
    }
    Ok(())
}

fn select_environment(config: WranglerConfig, environment: Option<&str>) -> Vec<D1DatabaseEntry> {
    let Some(name) = environment else {
        return config.d1_databases;
    };

    match config.env.get(name) {
        Some(section) => match &section.d1_databases {
            Some(entries) => entries.clone(),
            None => {
                tracing::warn!(
                    environment = name,
                    "d1_databases is not inherited by environments; none configured under [env.{}]",
                    name
                );
                Vec::new()
            }
        },
        None => {
            tracing::warn!(
                environment = name,
                "no environment named '{}' in wrangler config; using top-level configuration",
                name
            );
            config.d1_databases
        }
    }
}
