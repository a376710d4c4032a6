//! Error kinds raised while resolving D1 bindings.
//!
//! Every fallible function in this crate returns [`anyhow::Result`]. The
//! failures that callers may want to tell apart are raised as a
//! [`HelperError`] inside the `anyhow::Error`, so they can be recovered with
//! `err.downcast_ref::<HelperError>()`:
//!
//! ```rust
//! use d1_helpers::error::HelperError;
//!
//! let err: anyhow::Error = HelperError::AmbiguousConfig.into();
//! assert!(matches!(
//!     err.downcast_ref::<HelperError>(),
//!     Some(HelperError::AmbiguousConfig)
//! ));
//! ```

use std::path::PathBuf;

/// Identity and credential failures. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    /// More than one D1 database is configured and no binding was requested.
    #[error("There are more than one D1 database in wrangler config. Please specify which.")]
    AmbiguousConfig,

    /// The requested binding has no `d1_databases` entry.
    #[error("Could not find wrangler config for D1 binding: [{binding}]")]
    ConfigNotFound { binding: String },

    /// The local platform has no live D1 binding with this name.
    #[error("Could not find D1 binding: [{binding}]. Check your wrangler config file.")]
    BindingNotFound { binding: String },

    /// The derived SQLite file is missing from the local state directory.
    #[error("Could not find Sqlite file: [{}] for databaseId [{database_id}]", path.display())]
    LocalFileNotFound { path: PathBuf, database_id: String },

    /// A credential passed to `with_remote_credentials` is missing or blank.
    #[error("cloudflare {field} is empty. Check your env vars.")]
    MissingCredential { field: &'static str },

    /// `remote_credentials` was read before credentials were attached.
    #[error("cloudflare accountId and/or cloudflare d1Token not set. Call .with_remote_credentials() first.")]
    CredentialsNotSet,
}

impl HelperError {
    /// True for the not-found family (config entry, live binding, local file).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HelperError::ConfigNotFound { .. }
                | HelperError::BindingNotFound { .. }
                | HelperError::LocalFileNotFound { .. }
        )
    }

    /// True for credential validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            HelperError::MissingCredential { .. } | HelperError::CredentialsNotSet
        )
    }
}
