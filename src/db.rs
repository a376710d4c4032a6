//! SQLite access to emulated D1 databases.
//!
//! The local runtime keeps each D1 database in a plain SQLite file. This
//! module opens those files with an `sqlx` pool and exposes them through
//! [`LocalD1`], which implements [`D1Session`] with the same row shapes as
//! the remote proxy.
//!
//! # Value mapping
//!
//! | SQLite storage class | JSON |
//! |----------------------|------|
//! | `NULL` | `null` |
//! | `INTEGER` | number |
//! | `REAL` | number (`null` for NaN/inf) |
//! | `TEXT` | string |
//! | `BLOB` | array of byte values |

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Executor, Row, Sqlite, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;

use crate::session::{D1Session, ObjectRows, ProxyRows, QueryMethod, RawRows};

/// Open a connection pool on a D1 SQLite file.
///
/// The file and its parent directories are created when missing, the way
/// the local runtime does when a binding is first used.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open D1 database: {}", db_path.display()))?;

    Ok(pool)
}

/// Local query session over one emulated D1 database.
#[derive(Debug, Clone)]
pub struct LocalD1 {
    binding: String,
    pool: SqlitePool,
}

impl LocalD1 {
    pub fn new(binding: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            binding: binding.into(),
            pool,
        }
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// The underlying pool, for callers that want to use `sqlx` directly.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<SqliteRow>> {
        let query = bind_params(sqlx::query(sql), params);
        let rows = query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("D1 query failed on binding {}", self.binding))?;
        Ok(rows)
    }

    async fn column_names(&self, sql: &str, rows: &[SqliteRow]) -> Option<Vec<String>> {
        if let Some(first) = rows.first() {
            return Some(first.columns().iter().map(|c| c.name().to_string()).collect());
        }
        // No rows to read names from; ask SQLite to describe the statement.
        let described = (&self.pool).describe(sql).await.ok()?;
        Some(described.columns().iter().map(|c| c.name().to_string()).collect())
    }
}

#[async_trait]
impl D1Session for LocalD1 {
    async fn execute(&self, sql: &str, params: &[Value], method: QueryMethod) -> Result<ProxyRows> {
        let rows = self.fetch(sql, params).await?;

        if method.wants_objects() {
            let objects = rows.iter().map(row_to_object).collect::<Result<Vec<_>>>()?;
            return Ok(ProxyRows::Objects(ObjectRows { rows: objects }));
        }

        let columns = self.column_names(sql, &rows).await;
        let values = rows.iter().map(row_to_values).collect::<Result<Vec<_>>>()?;
        Ok(ProxyRows::Raw(RawRows {
            columns,
            rows: values,
        }))
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn row_to_values(row: &SqliteRow) -> Result<Vec<Value>> {
    (0..row.len()).map(|i| column_value(row, i)).collect()
}

fn row_to_object(row: &SqliteRow) -> Result<Map<String, Value>> {
    row.columns()
        .iter()
        .map(|col| Ok((col.name().to_string(), column_value(row, col.ordinal())?)))
        .collect()
}

fn column_value(row: &SqliteRow, idx: usize) -> Result<Value> {
    let storage_class = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" | "NUMERIC" => serde_json::Number::from_f64(row.try_get_unchecked::<f64, _>(idx)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => Value::from(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        _ => Value::from(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn seeded() -> (TempDir, LocalD1) {
        let tmp = TempDir::new().unwrap();
        let pool = connect(&tmp.path().join("nested").join("db.sqlite")).await.unwrap();
        sqlx::query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO users (id, name, score, avatar) VALUES (1, 'ada', 9.5, x'0102'), (2, 'bob', NULL, NULL)")
            .execute(&pool)
            .await
            .unwrap();
        (tmp, LocalD1::new("DB", pool))
    }

    #[tokio::test]
    async fn test_connect_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a").join("b").join("db.sqlite");
        let pool = connect(&path).await.unwrap();
        pool.close().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_all_returns_raw_rows() {
        let (_tmp, db) = seeded().await;
        let rows = db
            .all("SELECT id, name, score, avatar FROM users ORDER BY id", &[])
            .await
            .unwrap();

        let ProxyRows::Raw(raw) = rows else {
            panic!("expected raw rows");
        };
        assert_eq!(
            raw.columns,
            Some(vec![
                "id".to_string(),
                "name".to_string(),
                "score".to_string(),
                "avatar".to_string()
            ])
        );
        assert_eq!(raw.rows[0], vec![json!(1), json!("ada"), json!(9.5), json!([1, 2])]);
        assert_eq!(raw.rows[1], vec![json!(2), json!("bob"), Value::Null, Value::Null]);
        db.close().await;
    }

    #[tokio::test]
    async fn test_get_returns_objects_with_params() {
        let (_tmp, db) = seeded().await;
        let rows = db
            .get("SELECT id, name FROM users WHERE name = ?", &[json!("bob")])
            .await
            .unwrap();

        let ProxyRows::Objects(objects) = rows else {
            panic!("expected object rows");
        };
        assert_eq!(objects.rows.len(), 1);
        assert_eq!(objects.rows[0]["id"], json!(2));
        db.close().await;
    }

    #[tokio::test]
    async fn test_empty_result_still_has_columns() {
        let (_tmp, db) = seeded().await;
        let rows = db
            .all("SELECT id, name FROM users WHERE id = ?", &[json!(99)])
            .await
            .unwrap();
        let ProxyRows::Raw(raw) = rows else {
            panic!("expected raw rows");
        };
        assert!(raw.rows.is_empty());
        assert_eq!(raw.columns, Some(vec!["id".to_string(), "name".to_string()]));
        db.close().await;
    }

    #[tokio::test]
    async fn test_run_insert_then_read() {
        let (_tmp, db) = seeded().await;
        db.run(
            "INSERT INTO users (id, name, score) VALUES (?, ?, ?)",
            &[json!(3), json!("cy"), json!(1.25)],
        )
        .await
        .unwrap();

        let rows = db.all("SELECT COUNT(*) AS n FROM users", &[]).await.unwrap();
        assert_eq!(rows.into_objects()[0]["n"], json!(3));
        db.close().await;
    }

    #[tokio::test]
    async fn test_bad_sql_names_binding() {
        let (_tmp, db) = seeded().await;
        let err = db.all("SELECT * FROM missing", &[]).await.unwrap_err();
        assert!(format!("{:#}", err).contains("binding DB"));
        db.close().await;
    }
}
