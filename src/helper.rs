//! D1 binding resolution.
//!
//! [`D1Helper`] maps a logical binding name (as used in application code)
//! to something reachable: the emulated SQLite file under the local state
//! directory, or a credential bundle for the remote proxy.
//!
//! # Laziness
//!
//! Constructing a helper performs no I/O. The wrangler configuration is
//! read on the first call that needs it and kept for the life of the
//! instance. There is no shared cache between instances.
//!
//! # Copies
//!
//! [`with_remote_credentials`](D1Helper::with_remote_credentials) and
//! [`with_local_state_override`](D1Helper::with_local_state_override)
//! return a new helper and leave the receiver untouched, so one base helper
//! can produce several variants.
//!
//! # Example
//!
//! ```rust,no_run
//! use d1_helpers::helper::{D1Helper, D1HelperOptions};
//!
//! # fn example() -> anyhow::Result<()> {
//! let helper = D1Helper::get(Some("DB"), D1HelperOptions::default());
//! println!("local file: {}", helper.local_file_path()?.display());
//!
//! let remote = helper.with_remote_credentials(
//!     std::env::var("CLOUDFLARE_ACCOUNT_ID").ok().as_deref(),
//!     std::env::var("CLOUDFLARE_D1_TOKEN").ok().as_deref(),
//! )?;
//! println!("database: {}", remote.remote_credentials()?.database_id);
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::{self, D1DatabaseEntry};
use crate::db::LocalD1;
use crate::error::HelperError;
use crate::hash::{derive_local_id, D1_UNIQUE_KEY};
use crate::platform::{use_local_d1, use_proxy_d1, PlatformOptions};
use crate::proxy::{D1Credentials, ProxyD1};

/// Local state directory relative to the directory holding the config file.
pub const DEFAULT_STATE_SUFFIX: &str = ".wrangler/state/v3";

/// Options accepted by [`D1Helper::get`].
#[derive(Debug, Clone, Default)]
pub struct D1HelperOptions {
    /// Named environment (`[env.<name>]`) to read bindings from.
    pub environment: Option<String>,
    /// Explicit configuration file; discovered from the current directory when unset.
    pub config_path: Option<PathBuf>,
    /// API root for remote sessions; the public Cloudflare API when unset.
    pub api_base_url: Option<String>,
}

/// The selected `d1_databases` entry plus the directory of its config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConfig {
    pub entry: D1DatabaseEntry,
    pub config_dir: Option<PathBuf>,
}

impl BindingConfig {
    pub fn binding_name(&self) -> &str {
        &self.entry.binding
    }

    pub fn local_database_id(&self) -> &str {
        self.entry.local_database_id()
    }

    pub fn database_id(&self) -> &str {
        self.entry.database_id.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteCredentials {
    account_id: String,
    token: String,
}

/// SQLite URL for tooling that opens the local file directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFileCredentials {
    pub url: String,
}

/// Lazily resolved view of one D1 binding.
#[derive(Debug, Clone)]
pub struct D1Helper {
    requested_binding: String,
    environment: Option<String>,
    config_path: Option<PathBuf>,
    api_base_url: Option<String>,
    cfg: OnceLock<BindingConfig>,
    credentials: Option<RemoteCredentials>,
    persist_to: Option<PathBuf>,
}

impl D1Helper {
    /// Create a helper for `binding`. `None` or `""` means "the only
    /// configured database". No configuration is read yet.
    pub fn get(binding: Option<&str>, opts: D1HelperOptions) -> Self {
        Self {
            requested_binding: binding.unwrap_or_default().to_string(),
            environment: opts.environment,
            config_path: opts.config_path,
            api_base_url: opts.api_base_url,
            cfg: OnceLock::new(),
            credentials: None,
            persist_to: None,
        }
    }

    fn config(&self) -> Result<&BindingConfig> {
        if let Some(cfg) = self.cfg.get() {
            return Ok(cfg);
        }
        let loaded = load_binding_config(
            &self.requested_binding,
            self.config_path.as_deref(),
            self.environment.as_deref(),
        )?;
        Ok(self.cfg.get_or_init(|| loaded))
    }

    /// The requested binding name, or the configured one when none was requested.
    pub fn binding(&self) -> Result<String> {
        if !self.requested_binding.is_empty() {
            return Ok(self.requested_binding.clone());
        }
        Ok(self.config()?.binding_name().to_string())
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn local_database_id(&self) -> Result<String> {
        Ok(self.config()?.local_database_id().to_string())
    }

    pub fn database_id(&self) -> Result<String> {
        Ok(self.config()?.database_id().to_string())
    }

    pub fn migrations_dir(&self) -> Result<String> {
        Ok(self.config()?.entry.migrations_dir.clone().unwrap_or_default())
    }

    pub fn migrations_table(&self) -> Result<String> {
        Ok(self.config()?.entry.migrations_table.clone().unwrap_or_default())
    }

    /// Local state directory.
    ///
    /// The override from [`with_local_state_override`](Self::with_local_state_override)
    /// is returned as given (no `v3` suffix). Otherwise this is
    /// `<config dir>/.wrangler/state/v3`, relative to the current directory
    /// when it lies beneath it.
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.persist_to {
            return Ok(dir.clone());
        }
        let config_dir = self.config()?.config_dir.clone().unwrap_or_default();
        Ok(relative_to_cwd(&config_dir.join(DEFAULT_STATE_SUFFIX)))
    }

    /// Path of the emulated SQLite file for this binding.
    ///
    /// Fails with [`HelperError::LocalFileNotFound`] when the file does not
    /// exist; this never creates it.
    pub fn local_file_path(&self) -> Result<PathBuf> {
        let local_id = self.local_database_id()?;
        let path = local_file_location(&self.state_dir()?, &local_id);

        tracing::debug!(path = %path.display(), local_database_id = %local_id, "derived local D1 file");

        if !path.exists() {
            return Err(HelperError::LocalFileNotFound {
                path,
                database_id: local_id,
            }
            .into());
        }
        Ok(path)
    }

    /// `{ url: "file:<path>" }` for migration tooling.
    pub fn local_file_credentials(&self) -> Result<LocalFileCredentials> {
        Ok(LocalFileCredentials {
            url: format!("file:{}", self.local_file_path()?.display()),
        })
    }

    /// Copy of this helper carrying remote credentials.
    ///
    /// Missing or whitespace-only values fail with
    /// [`HelperError::MissingCredential`].
    pub fn with_remote_credentials(
        &self,
        account_id: Option<&str>,
        token: Option<&str>,
    ) -> Result<Self> {
        let account_id = require_credential(account_id, "accountId")?;
        let token = require_credential(token, "d1Token")?;

        Ok(Self {
            credentials: Some(RemoteCredentials { account_id, token }),
            ..self.clone()
        })
    }

    /// Copy of this helper whose state directory is pinned to `path`.
    pub fn with_local_state_override(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            persist_to: Some(path.into()),
            ..self.clone()
        }
    }

    /// Credentials for the remote proxy, using the local database id.
    pub fn remote_credentials(&self) -> Result<D1Credentials> {
        let Some(creds) = &self.credentials else {
            return Err(HelperError::CredentialsNotSet.into());
        };

        Ok(D1Credentials {
            account_id: creds.account_id.clone(),
            token: creds.token.clone(),
            database_id: self.local_database_id()?,
        })
    }

    /// Run `work` against the local emulated database for this binding.
    ///
    /// The platform is disposed after `work` finishes, whether it succeeded or not.
    pub async fn run_local<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(LocalD1) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let binding = self.binding()?;
        let options = PlatformOptions {
            environment: self.environment.clone(),
            config_path: self.config_path.clone(),
            persist_to: self.persist_to.clone(),
        };
        use_local_d1(&binding, &options, work).await
    }

    /// Run `work` against the remote database through the HTTP proxy.
    pub async fn run_remote<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(ProxyD1) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let credentials = self.remote_credentials()?;
        use_proxy_d1(&credentials, self.api_base_url.as_deref(), work).await
    }
}

fn require_credential(value: Option<&str>, field: &'static str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(HelperError::MissingCredential { field }.into()),
    }
}

/// Select the D1 entry for `requested` from the configuration.
///
/// With no binding requested, exactly one configured database is required.
/// Binding names match exactly (case-sensitive).
pub fn load_binding_config(
    requested: &str,
    config_path: Option<&Path>,
    environment: Option<&str>,
) -> Result<BindingConfig> {
    let resolved = config::read_config(config_path, environment)?;
    let entry = select_entry(requested, resolved.d1_databases)?;

    let config_dir = resolved
        .config_path
        .as_deref()
        .map(|p| p.parent().map(Path::to_path_buf).unwrap_or_default());

    tracing::debug!(binding = %entry.binding, "resolved D1 binding");

    Ok(BindingConfig { entry, config_dir })
}

fn select_entry(requested: &str, entries: Vec<D1DatabaseEntry>) -> Result<D1DatabaseEntry> {
    if requested.is_empty() && entries.len() > 1 {
        return Err(HelperError::AmbiguousConfig.into());
    }

    let found = if requested.is_empty() {
        entries.into_iter().next()
    } else {
        entries.into_iter().find(|e| e.binding == requested)
    };

    found.ok_or_else(|| {
        HelperError::ConfigNotFound {
            binding: requested.to_string(),
        }
        .into()
    })
}

/// `<state_dir>/d1/miniflare-D1DatabaseObject/<derived id>.sqlite`
pub fn local_file_location(state_dir: &Path, local_database_id: &str) -> PathBuf {
    state_dir
        .join("d1")
        .join(D1_UNIQUE_KEY)
        .join(format!("{}.sqlite", derive_local_id(D1_UNIQUE_KEY, local_database_id)))
}

/// Express `path` relative to the current directory when it lies beneath it.
pub(crate) fn relative_to_cwd(path: &Path) -> PathBuf {
    if path.is_relative() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => match path.strip_prefix(&cwd) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
