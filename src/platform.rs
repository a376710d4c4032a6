//! Local platform proxy and scoped database access.
//!
//! [`get_platform_proxy`] plays the part of the local emulation runtime: it
//! reads the wrangler configuration for an environment and opens every
//! configured D1 binding on its emulated SQLite file. The returned
//! [`PlatformProxy`] owns those connections until [`dispose`](PlatformProxy::dispose)
//! is called.
//!
//! [`use_local_d1`] and [`use_proxy_d1`] wrap a caller's work function with
//! acquisition and release of the database, the way
//! [`D1Helper::run_local`](crate::helper::D1Helper::run_local) and
//! [`D1Helper::run_remote`](crate::helper::D1Helper::run_remote) use them.

use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::config;
use crate::db::{self, LocalD1};
use crate::error::HelperError;
use crate::helper::{local_file_location, relative_to_cwd, DEFAULT_STATE_SUFFIX};
use crate::proxy::{D1Credentials, ProxyD1};

/// Where and how to start the local platform.
#[derive(Debug, Clone, Default)]
pub struct PlatformOptions {
    pub environment: Option<String>,
    pub config_path: Option<PathBuf>,
    /// State directory used as given; defaults to `<config dir>/.wrangler/state/v3`.
    pub persist_to: Option<PathBuf>,
}

/// Live local bindings, keyed by binding name.
#[derive(Debug)]
pub struct PlatformProxy {
    pub env: HashMap<String, LocalD1>,
    pub state_dir: PathBuf,
}

impl PlatformProxy {
    /// Look up a live binding.
    pub fn binding(&self, name: &str) -> Result<&LocalD1> {
        self.env.get(name).ok_or_else(|| {
            HelperError::BindingNotFound {
                binding: name.to_string(),
            }
            .into()
        })
    }

    /// Close every open database.
    pub async fn dispose(self) {
        for (name, db) in self.env {
            tracing::debug!(binding = %name, "closing local D1 binding");
            db.close().await;
        }
    }
}

/// Open all D1 bindings of the configured environment on local SQLite files.
///
/// Each binding is stored under its local database id, the same file
/// [`D1Helper::local_file_path`](crate::helper::D1Helper::local_file_path) derives.
pub async fn get_platform_proxy(options: &PlatformOptions) -> Result<PlatformProxy> {
    let resolved = config::read_config(options.config_path.as_deref(), options.environment.as_deref())?;

    let state_dir = match &options.persist_to {
        Some(dir) => dir.clone(),
        None => {
            let config_dir = resolved
                .config_path
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            relative_to_cwd(&config_dir.join(DEFAULT_STATE_SUFFIX))
        }
    };

    let mut env = HashMap::new();
    for entry in &resolved.d1_databases {
        let path = local_file_location(&state_dir, entry.local_database_id());
        tracing::debug!(binding = %entry.binding, path = %path.display(), "opening local D1 binding");

        let pool = match db::connect(&path).await {
            Ok(pool) => pool,
            Err(e) => {
                PlatformProxy { env, state_dir }.dispose().await;
                return Err(e);
            }
        };
        env.insert(entry.binding.clone(), LocalD1::new(&entry.binding, pool));
    }

    Ok(PlatformProxy { env, state_dir })
}

/// Run `work` with the local D1 database bound to `binding`.
///
/// The platform is disposed after `work` returns, on success and on error.
/// A missing binding fails with [`HelperError::BindingNotFound`].
pub async fn use_local_d1<F, Fut, T>(binding: &str, options: &PlatformOptions, work: F) -> Result<T>
where
    F: FnOnce(LocalD1) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let platform = get_platform_proxy(options).await?;

    let db = match platform.binding(binding).cloned() {
        Ok(db) => db,
        Err(e) => {
            platform.dispose().await;
            return Err(e);
        }
    };

    let result = work(db).await;
    platform.dispose().await;
    result
}

/// Run `work` with a remote proxy session built from `credentials`.
///
/// `api_base_url` replaces the public Cloudflare API root when set.
pub async fn use_proxy_d1<F, Fut, T>(
    credentials: &D1Credentials,
    api_base_url: Option<&str>,
    work: F,
) -> Result<T>
where
    F: FnOnce(ProxyD1) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let db = match api_base_url {
        Some(base_url) => ProxyD1::connect_to(credentials, base_url),
        None => ProxyD1::connect(credentials),
    };
    work(db).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{derive_local_id, D1_UNIQUE_KEY};
    use crate::session::D1Session;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PlatformOptions) {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("wrangler.toml");
        fs::write(
            &config_path,
            r#"
[[d1_databases]]
binding = "DB"
database_id = "prod-id"
preview_database_id = "preview-id"

[[d1_databases]]
binding = "CACHE"
"#,
        )
        .unwrap();

        let options = PlatformOptions {
            environment: None,
            config_path: Some(config_path),
            persist_to: Some(tmp.path().join("state")),
        };
        (tmp, options)
    }

    #[tokio::test]
    async fn test_platform_opens_hashed_files() {
        let (tmp, options) = setup();
        let platform = get_platform_proxy(&options).await.unwrap();
        assert_eq!(platform.env.len(), 2);
        platform.dispose().await;

        let dir = tmp.path().join("state").join("d1").join(D1_UNIQUE_KEY);
        assert!(dir
            .join(format!("{}.sqlite", derive_local_id(D1_UNIQUE_KEY, "preview-id")))
            .exists());
        assert!(dir
            .join(format!("{}.sqlite", derive_local_id(D1_UNIQUE_KEY, "")))
            .exists());
    }

    #[tokio::test]
    async fn test_use_local_d1_missing_binding() {
        let (_tmp, options) = setup();
        let err = use_local_d1("NOPE", &options, |_db| async { Ok(()) })
            .await
            .unwrap_err();
        match err.downcast_ref::<HelperError>() {
            Some(HelperError::BindingNotFound { binding }) => assert_eq!(binding, "NOPE"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_use_local_d1_runs_work_and_persists() {
        let (_tmp, options) = setup();

        use_local_d1("DB", &options, |db| async move {
            db.run("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", &[])
                .await?;
            db.run("INSERT INTO notes (body) VALUES (?)", &[json!("hello")])
                .await?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();

        let count = use_local_d1("DB", &options, |db| async move {
            let rows = db.all("SELECT COUNT(*) AS n FROM notes", &[]).await?;
            Ok::<_, anyhow::Error>(rows.into_objects()[0]["n"].clone())
        })
        .await
        .unwrap();
        assert_eq!(count, json!(1));
    }

    #[tokio::test]
    async fn test_use_local_d1_disposes_on_error() {
        let (_tmp, options) = setup();

        let mut captured: Option<LocalD1> = None;
        let err = use_local_d1("DB", &options, |db| {
            captured = Some(db.clone());
            async move { Err::<(), _>(anyhow::anyhow!("work failed")) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "work failed");

        assert!(captured.unwrap().pool().is_closed());
    }
}
