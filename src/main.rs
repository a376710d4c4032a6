//! # D1 Helpers CLI (`d1h`)
//!
//! Inspect and query the D1 databases declared in a wrangler configuration.
//!
//! ## Usage
//!
//! ```bash
//! d1h [--config wrangler.toml] [--env staging] [--binding DB] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `d1h info` | Show the resolved binding, ids, migrations and state dir |
//! | `d1h local-file` | Print the path of the emulated SQLite file |
//! | `d1h credentials` | Print connection credentials as JSON |
//! | `d1h hash <name>` | Derive the local file id for a database id |
//! | `d1h query "<sql>"` | Run SQL against the local or remote database |
//!
//! Remote commands read `CLOUDFLARE_ACCOUNT_ID` and `CLOUDFLARE_D1_TOKEN`
//! from the environment. Set `RUST_LOG=debug` to trace resolution.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use d1_helpers::hash::{derive_local_id, D1_UNIQUE_KEY};
use d1_helpers::{D1Helper, D1HelperOptions, D1Session, QueryMethod};

const ACCOUNT_ID_VAR: &str = "CLOUDFLARE_ACCOUNT_ID";
const D1_TOKEN_VAR: &str = "CLOUDFLARE_D1_TOKEN";

/// D1 Helpers CLI: resolve and query local or remote Cloudflare D1 databases.
#[derive(Parser)]
#[command(
    name = "d1h",
    about = "Resolve and query local or remote Cloudflare D1 databases",
    version
)]
struct Cli {
    /// Path to the wrangler configuration file.
    ///
    /// Defaults to the nearest wrangler.json, wrangler.jsonc or
    /// wrangler.toml in the current directory or its parents.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Named environment (`[env.<name>]`) to read bindings from.
    #[arg(long = "env", global = true)]
    environment: Option<String>,

    /// D1 binding name. Optional when exactly one database is configured.
    #[arg(long, global = true)]
    binding: Option<String>,

    /// Local state directory, used as given (no `v3` suffix is added).
    #[arg(long, global = true)]
    persist_to: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved binding configuration.
    Info,

    /// Print the path of the local SQLite file.
    ///
    /// Fails if the file does not exist yet; start the local dev server
    /// once to create it.
    LocalFile,

    /// Print credentials as JSON for migration tooling.
    ///
    /// Local: `{"url": "file:<path>"}`. Remote: `{"accountId", "token", "databaseId"}`.
    Credentials {
        /// Print remote API credentials instead of the local file URL.
        #[arg(long)]
        remote: bool,
    },

    /// Derive the local file id for a database id.
    Hash {
        /// Database id (preview id or production id).
        name: String,

        /// Namespace key of the emulated object.
        #[arg(long, default_value = D1_UNIQUE_KEY)]
        unique_key: String,
    },

    /// Run a SQL statement and print the rows as JSON.
    Query {
        /// SQL text. Use `?` placeholders for parameters.
        sql: String,

        /// Positional parameter, parsed as JSON when possible (repeatable).
        #[arg(long = "param")]
        params: Vec<String>,

        /// Result shape: `all`, `run`, `values` (positional rows) or `get` (objects).
        #[arg(long, default_value = "all")]
        method: QueryMethod,

        /// Query the remote database through the REST API.
        #[arg(long)]
        remote: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let helper = D1Helper::get(
        cli.binding.as_deref(),
        D1HelperOptions {
            environment: cli.environment.clone(),
            config_path: cli.config.clone(),
            ..Default::default()
        },
    );
    let helper = match cli.persist_to {
        Some(dir) => helper.with_local_state_override(dir),
        None => helper,
    };

    match cli.command {
        Commands::Info => run_info(&helper)?,
        Commands::LocalFile => {
            println!("{}", helper.local_file_path()?.display());
        }
        Commands::Credentials { remote } => {
            let json = if remote {
                serde_json::to_string_pretty(&with_env_credentials(&helper)?.remote_credentials()?)?
            } else {
                serde_json::to_string_pretty(&helper.local_file_credentials()?)?
            };
            println!("{}", json);
        }
        Commands::Hash { name, unique_key } => {
            println!("{}", derive_local_id(&unique_key, &name));
        }
        Commands::Query {
            sql,
            params,
            method,
            remote,
        } => {
            let params: Vec<Value> = params.iter().map(String::as_str).map(parse_param).collect();
            let rows = if remote {
                with_env_credentials(&helper)?
                    .run_remote(|db| async move { db.execute(&sql, &params, method).await })
                    .await?
            } else {
                helper
                    .run_local(|db| async move { db.execute(&sql, &params, method).await })
                    .await?
            };
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

fn run_info(helper: &D1Helper) -> Result<()> {
    let or_none = |s: String| if s.is_empty() { "(none)".to_string() } else { s };

    println!("binding:           {}", helper.binding()?);
    println!(
        "environment:       {}",
        helper.environment().unwrap_or("(top-level)")
    );
    println!("database_id:       {}", or_none(helper.database_id()?));
    println!("local_database_id: {}", or_none(helper.local_database_id()?));
    println!("migrations_dir:    {}", or_none(helper.migrations_dir()?));
    println!("migrations_table:  {}", or_none(helper.migrations_table()?));
    println!("state_dir:         {}", helper.state_dir()?.display());
    Ok(())
}

fn with_env_credentials(helper: &D1Helper) -> Result<D1Helper> {
    let account_id = std::env::var(ACCOUNT_ID_VAR).ok();
    let token = std::env::var(D1_TOKEN_VAR).ok();
    helper.with_remote_credentials(account_id.as_deref(), token.as_deref())
}

/// Parse a `--param` value as JSON, falling back to a plain string.
fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
