use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn d1h_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("d1h");
    path
}

const SINGLE_DB: &str = r#"
name = "app"

[[d1_databases]]
binding = "DB"
database_name = "app"
database_id = "prod-id"
preview_database_id = "local-db"
migrations_dir = "drizzle"
migrations_table = "__drizzle_migrations"

[env.staging]
[[env.staging.d1_databases]]
binding = "DB"
database_id = "staging-id"
"#;

const TWO_DBS: &str = r#"
[[d1_databases]]
binding = "DB"
database_id = "prod-id"

[[d1_databases]]
binding = "ANALYTICS"
database_id = "analytics-id"
"#;

fn setup_test_env(config: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("wrangler.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

fn run_d1h(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = d1h_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("CLOUDFLARE_ACCOUNT_ID")
        .env_remove("CLOUDFLARE_D1_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run d1h binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_hash_reference_value() {
    let (_tmp, config_path) = setup_test_env(SINGLE_DB);
    let (stdout, stderr, success) = run_d1h(&config_path, &["hash", "abc123"]);
    assert!(success, "hash failed: {}", stderr);
    assert_eq!(
        stdout.trim(),
        "27464c850a84dbd4a666ea9cc54f7c5a7dac0cc11cbbd32c16573ed30597b7ad"
    );
}

#[test]
fn test_info_single_database() {
    let (tmp, config_path) = setup_test_env(SINGLE_DB);
    let (stdout, stderr, success) = run_d1h(&config_path, &["info"]);
    assert!(success, "info failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("binding:           DB"));
    assert!(stdout.contains("database_id:       prod-id"));
    assert!(stdout.contains("local_database_id: local-db"));
    assert!(stdout.contains("migrations_dir:    drizzle"));
    assert!(stdout.contains("migrations_table:  __drizzle_migrations"));

    let expected_state = tmp.path().join(".wrangler/state/v3");
    assert!(stdout.contains(&expected_state.display().to_string()));
}

#[test]
fn test_info_environment() {
    let (_tmp, config_path) = setup_test_env(SINGLE_DB);
    let (stdout, stderr, success) = run_d1h(&config_path, &["--env", "staging", "info"]);
    assert!(success, "info failed: {}", stderr);
    assert!(stdout.contains("environment:       staging"));
    assert!(stdout.contains("local_database_id: staging-id"));
    assert!(stdout.contains("migrations_dir:    (none)"));
}

#[test]
fn test_info_ambiguous_requires_binding() {
    let (_tmp, config_path) = setup_test_env(TWO_DBS);

    let (_, stderr, success) = run_d1h(&config_path, &["info"]);
    assert!(!success);
    assert!(stderr.contains("more than one D1 database"), "stderr={}", stderr);

    let (stdout, stderr, success) = run_d1h(&config_path, &["--binding", "ANALYTICS", "info"]);
    assert!(success, "info failed: {}", stderr);
    assert!(stdout.contains("database_id:       analytics-id"));
}

#[test]
fn test_info_unknown_binding() {
    let (_tmp, config_path) = setup_test_env(TWO_DBS);
    let (_, stderr, success) = run_d1h(&config_path, &["--binding", "db", "info"]);
    assert!(!success);
    assert!(stderr.contains("Could not find wrangler config for D1 binding: [db]"));
}

#[test]
fn test_local_file_missing() {
    let (tmp, config_path) = setup_test_env(SINGLE_DB);
    let state = tmp.path().join("state");
    let (_, stderr, success) = run_d1h(
        &config_path,
        &["--persist-to", state.to_str().unwrap(), "local-file"],
    );
    assert!(!success);
    assert!(stderr.contains("Could not find Sqlite file"));
    assert!(stderr.contains("local-db"));
    assert!(stderr.contains("e833abeb83abd38e60de8166ab13bbd4d7a5636dc148a7fd8ec47b7678c87854.sqlite"));
}

#[test]
fn test_local_query_roundtrip() {
    let (tmp, config_path) = setup_test_env(SINGLE_DB);
    let state = tmp.path().join("state");
    let state_arg = state.to_str().unwrap();

    let (_, stderr, success) = run_d1h(
        &config_path,
        &[
            "--persist-to",
            state_arg,
            "query",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            "--method",
            "run",
        ],
    );
    assert!(success, "create failed: {}", stderr);

    let (_, stderr, success) = run_d1h(
        &config_path,
        &[
            "--persist-to",
            state_arg,
            "query",
            "INSERT INTO users (id, name) VALUES (?, ?)",
            "--param",
            "7",
            "--param",
            "ada",
            "--method",
            "run",
        ],
    );
    assert!(success, "insert failed: {}", stderr);

    let (stdout, stderr, success) = run_d1h(
        &config_path,
        &["--persist-to", state_arg, "query", "SELECT id, name FROM users"],
    );
    assert!(success, "select failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["columns"], serde_json::json!(["id", "name"]));
    assert_eq!(value["rows"], serde_json::json!([[7, "ada"]]));

    let (stdout, _, success) = run_d1h(
        &config_path,
        &[
            "--persist-to",
            state_arg,
            "query",
            "SELECT name FROM users WHERE id = ?",
            "--param",
            "7",
            "--method",
            "get",
        ],
    );
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["rows"], serde_json::json!([{ "name": "ada" }]));

    // The resolver finds the file the local platform created.
    let (stdout, stderr, success) =
        run_d1h(&config_path, &["--persist-to", state_arg, "local-file"]);
    assert!(success, "local-file failed: {}", stderr);
    let path = PathBuf::from(stdout.trim());
    assert!(path.exists());
    assert!(path.starts_with(&state));

    let (stdout, _, success) =
        run_d1h(&config_path, &["--persist-to", state_arg, "credentials"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["url"], format!("file:{}", path.display()));
}

#[test]
fn test_remote_credentials_require_env() {
    let (_tmp, config_path) = setup_test_env(SINGLE_DB);
    let (_, stderr, success) = run_d1h(&config_path, &["credentials", "--remote"]);
    assert!(!success);
    assert!(stderr.contains("accountId is empty"));
}

#[test]
fn test_remote_credentials_from_env() {
    let (_tmp, config_path) = setup_test_env(SINGLE_DB);
    let output = Command::new(d1h_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["credentials", "--remote"])
        .env("CLOUDFLARE_ACCOUNT_ID", "acc-123")
        .env("CLOUDFLARE_D1_TOKEN", "tok-456")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["accountId"], "acc-123");
    assert_eq!(value["token"], "tok-456");
    assert_eq!(value["databaseId"], "local-db");
}

#[test]
fn test_remote_blank_token_rejected() {
    let (_tmp, config_path) = setup_test_env(SINGLE_DB);
    let output = Command::new(d1h_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["query", "SELECT 1", "--remote"])
        .env("CLOUDFLARE_ACCOUNT_ID", "acc-123")
        .env("CLOUDFLARE_D1_TOKEN", "   ")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("d1Token is empty"));
}
